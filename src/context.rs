//! Caller-owned application context.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, Settings};
use crate::extractors::ExtractorRouter;
use crate::llm::{CompletionService, LlmClient, LlmError};
use crate::repository::{StoreError, TableStore};
use crate::schema_processor::SchemaProcessor;

/// Failures while assembling the context. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open table store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to create completion client: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the pipeline and chat components share.
pub struct AppContext {
    pub settings: Settings,
    pub store: TableStore,
    pub llm: Arc<dyn CompletionService>,
    pub router: Arc<ExtractorRouter>,
    pub processor: SchemaProcessor,
}

impl AppContext {
    /// Build the context from validated settings with the HTTP completion client.
    pub async fn from_settings(settings: Settings) -> Result<Self, ContextError> {
        settings.validate()?;
        settings.ensure_directories()?;

        let llm = LlmClient::new(settings.llm.clone())?;
        let store = TableStore::open(&settings.database_path()).await?;
        debug!(
            "Context ready: store {}, model {}",
            store.db_path().display(),
            settings.llm.model
        );

        Ok(Self::new(settings, store, Arc::new(llm)))
    }

    /// Assemble a context from already constructed parts.
    pub fn new(settings: Settings, store: TableStore, llm: Arc<dyn CompletionService>) -> Self {
        Self {
            settings,
            store,
            llm,
            router: Arc::new(ExtractorRouter::new()),
            processor: SchemaProcessor::new(),
        }
    }
}
