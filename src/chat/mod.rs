//! Natural-language questions over the stored tables.
//!
//! A question goes through a feasibility check and then a bounded SQL
//! generation loop. The answer is either a statement that has been shown to
//! run against the current store, or [`SqlOutcome::Impossible`].

mod feasibility;
mod prompts;
mod sql_generator;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::llm::CompletionService;
use crate::models::{StoreSummary, StoredTable};
use crate::repository::{RawResult, StoreError, TableStore};

pub use feasibility::{keyword_fallback, parse_response, Feasibility, FeasibilityClassifier};
pub use sql_generator::{
    extract_statement, is_mutating, AttemptFailure, GenerationOutcome, SqlGenerator,
    SqlGeneratorConfig,
};

/// Text returned when no statement can answer a question.
pub const IMPOSSIBLE: &str = "IMPOSSIBLE";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Refusing to run a modifying statement on a read-only store: {0}")]
    ReadOnly(String),
}

/// Answer to a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlOutcome {
    Statement(String),
    Impossible,
}

impl SqlOutcome {
    pub fn statement(&self) -> Option<&str> {
        match self {
            SqlOutcome::Statement(sql) => Some(sql),
            SqlOutcome::Impossible => None,
        }
    }

    pub fn is_impossible(&self) -> bool {
        matches!(self, SqlOutcome::Impossible)
    }
}

impl fmt::Display for SqlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlOutcome::Statement(sql) => f.write_str(sql),
            SqlOutcome::Impossible => f.write_str(IMPOSSIBLE),
        }
    }
}

impl From<GenerationOutcome> for SqlOutcome {
    fn from(outcome: GenerationOutcome) -> Self {
        match outcome.statement {
            Some(sql) => SqlOutcome::Statement(sql),
            None => SqlOutcome::Impossible,
        }
    }
}

/// Orchestrates the query path over one store.
pub struct TableChat {
    store: TableStore,
    classifier: FeasibilityClassifier,
    generator: SqlGenerator,
}

impl TableChat {
    pub fn new(
        store: TableStore,
        llm: Arc<dyn CompletionService>,
        config: SqlGeneratorConfig,
    ) -> Self {
        Self {
            classifier: FeasibilityClassifier::new(llm.clone(), config.attempt_timeout),
            generator: SqlGenerator::new(llm, config),
            store,
        }
    }

    /// Chat over the context's store with limits taken from its settings.
    pub fn from_context(ctx: &AppContext) -> Self {
        let config = SqlGeneratorConfig {
            max_attempts: ctx.settings.max_sql_attempts,
            attempt_timeout: Duration::from_secs(ctx.settings.llm.timeout_secs),
            allow_mutations: ctx.settings.allow_mutations,
            ..Default::default()
        };
        Self::new(ctx.store.clone(), ctx.llm.clone(), config)
    }

    /// Answer a question with a validated statement or `Impossible`.
    ///
    /// Never fails: store errors are logged and reported as `Impossible`.
    pub async fn ask(&self, question: &str) -> SqlOutcome {
        match self.try_ask(question).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Question could not be processed: {}", e);
                SqlOutcome::Impossible
            }
        }
    }

    /// [`ask`](Self::ask) rendered as text: the statement or `IMPOSSIBLE`.
    pub async fn ask_text(&self, question: &str) -> String {
        self.ask(question).await.to_string()
    }

    async fn try_ask(&self, question: &str) -> Result<SqlOutcome, StoreError> {
        info!("Question: {}", question);
        let tables = self.store.list_tables().await?;
        if tables.is_empty() {
            info!("No tables stored; question cannot be answered");
            return Ok(SqlOutcome::Impossible);
        }

        let feasibility = self.classifier.classify(question, &tables).await;
        if !feasibility.is_fulfillable {
            return Ok(SqlOutcome::Impossible);
        }

        let outcome = self.generator.generate(question, &tables, &self.store).await;
        Ok(outcome.into())
    }

    /// Feasibility verdict only, without generating SQL.
    pub async fn analyze(&self, question: &str) -> Result<Feasibility, StoreError> {
        let tables = self.store.list_tables().await?;
        Ok(self.classifier.classify(question, &tables).await)
    }

    pub async fn list_tables(&self) -> Result<Vec<StoredTable>, StoreError> {
        self.store.list_tables().await
    }

    pub async fn database_summary(&self) -> Result<StoreSummary, StoreError> {
        self.store.summary().await
    }

    /// Execute a statement, typically one returned by [`ask`](Self::ask).
    ///
    /// Modifying statements are refused unless mutations are allowed.
    pub async fn run_statement(&self, sql: &str) -> Result<RawResult, ChatError> {
        if !self.generator.config().allow_mutations && is_mutating(sql) {
            return Err(ChatError::ReadOnly(sql.trim().to_string()));
        }
        Ok(self.store.execute_raw(sql, Vec::<Value>::new()).await?)
    }
}
