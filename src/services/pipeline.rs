//! Document processing: extraction through reconstruction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::artifacts::DocumentArtifacts;
use super::summarizer::TableSummarizer;
use crate::context::AppContext;
use crate::extractors::{document_stem, ExtractError, ExtractionMethod};
use crate::models::{Description, TableSchema};
use crate::reconstruct::{DocumentReconstructor, ReplacementReport};
use crate::repository::StoreError;
use crate::schema_processor::schema_summary;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write artifacts: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Short description of the document's domain, passed to the summarizer.
    pub context_hint: Option<String>,
    /// Where artifacts go; the configured output directory when `None`.
    pub output_dir: Option<PathBuf>,
    pub save_outputs: bool,
    pub clear_store_on_start: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            context_hint: None,
            output_dir: None,
            save_outputs: true,
            clear_store_on_start: false,
        }
    }
}

/// What happened to one table of a document.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub table_id: String,
    pub label: Option<String>,
    pub schema_ok: bool,
    pub description_ok: bool,
    pub stored: bool,
    pub error: Option<String>,
}

/// Result of processing one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub source_file: PathBuf,
    pub session_id: String,
    pub method: ExtractionMethod,
    pub total_tables: usize,
    pub successful_tables: usize,
    pub tables: Vec<TableOutcome>,
    pub replacement: ReplacementReport,
    #[serde(skip)]
    pub processed_document: String,
    pub artifacts: Vec<PathBuf>,
}

/// One entry of a batch run.
#[derive(Debug)]
pub struct BatchItem {
    pub path: PathBuf,
    pub result: Result<DocumentReport, PipelineError>,
}

/// Per-file results of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

/// Runs documents through extraction, schema inference, description,
/// storage and reconstruction.
pub struct DocumentPipeline<'a> {
    ctx: &'a AppContext,
    summarizer: TableSummarizer,
    reconstructor: DocumentReconstructor,
    options: PipelineOptions,
}

impl<'a> DocumentPipeline<'a> {
    pub fn new(ctx: &'a AppContext, options: PipelineOptions) -> Self {
        Self {
            ctx,
            summarizer: TableSummarizer::new(
                ctx.llm.clone(),
                ctx.settings.llm.enabled,
                Duration::from_secs(ctx.settings.llm.timeout_secs),
            ),
            reconstructor: DocumentReconstructor::new(),
            options,
        }
    }

    /// Process one document.
    ///
    /// A table that fails to parse, describe or store is recorded as failed
    /// and the remaining tables are still processed. The processing session
    /// is finalized exactly once, including when extraction fails.
    pub async fn process(&self, path: &Path) -> Result<DocumentReport, PipelineError> {
        if self.options.clear_store_on_start {
            self.ctx.store.clear().await?;
        }
        self.process_document(path).await
    }

    /// Process several documents; a failing file never stops the batch.
    ///
    /// With `clear_store_on_start` the store is cleared once, before the
    /// first document.
    pub async fn process_batch(&self, paths: &[PathBuf]) -> Result<BatchReport, PipelineError> {
        if self.options.clear_store_on_start {
            self.ctx.store.clear().await?;
        }

        let mut report = BatchReport::default();
        for path in paths {
            let result = self.process_document(path).await;
            if let Err(ref e) = result {
                warn!("Failed to process {}: {}", path.display(), e);
            }
            report.items.push(BatchItem {
                path: path.clone(),
                result,
            });
        }
        info!(
            "Batch complete: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    async fn process_document(&self, path: &Path) -> Result<DocumentReport, PipelineError> {
        let store = &self.ctx.store;
        let source_file = source_name(path);
        let session = store.create_session(&source_file).await?;
        info!("Processing {} (session {})", path.display(), session.session_id);

        let router = Arc::clone(&self.ctx.router);
        let owned = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || router.extract(&owned)).await;
        let extraction = match extracted {
            Ok(Ok(extraction)) => extraction,
            Ok(Err(e)) => {
                warn!("Extraction failed for {}: {}", path.display(), e);
                store.finalize_session(&session.session_id, 0, 0).await?;
                return Err(e.into());
            }
            Err(e) => {
                warn!("Extraction task failed for {}: {}", path.display(), e);
                store.finalize_session(&session.session_id, 0, 0).await?;
                return Err(e.into());
            }
        };
        debug!(
            "Extracted {} tables from {} via {:?}",
            extraction.tables.len(),
            path.display(),
            extraction.method
        );

        let schemas = self.ctx.processor.extract_all(&extraction.tables);
        let summary = schema_summary(&schemas);
        debug!(
            "Schemas for {}: {}/{} parsed, {} rows, {} columns",
            path.display(),
            summary.successful_tables,
            summary.total_tables,
            summary.total_rows,
            summary.total_columns
        );
        let descriptions = self
            .summarizer
            .describe_all(&schemas, self.options.context_hint.as_deref())
            .await;

        let mut outcomes = Vec::with_capacity(schemas.len());
        for (schema, description) in schemas.iter().zip(&descriptions) {
            outcomes.push(
                self.store_table(schema, description, &source_file, &session.session_id)
                    .await,
            );
        }
        let successful_tables = outcomes.iter().filter(|o| o.stored).count();

        let (chunks, replacement) = self.reconstructor.replace(
            &extraction.chunks,
            &extraction.table_positions,
            &descriptions,
        );
        let processed_document = self.reconstructor.create_document(&chunks);

        store
            .finalize_session(
                &session.session_id,
                outcomes.len() as u64,
                successful_tables as u64,
            )
            .await?;

        let artifacts = if self.options.save_outputs {
            let output_dir = self
                .options
                .output_dir
                .clone()
                .unwrap_or_else(|| self.ctx.settings.output_dir.clone());
            let stem = document_stem(path);
            DocumentArtifacts {
                stem: &stem,
                original: &extraction.flowed_text,
                processed: &processed_document,
                schemas: &schemas,
                descriptions: &descriptions,
                report: &replacement,
            }
            .write(&output_dir)?
        } else {
            Vec::new()
        };

        info!(
            "Processed {}: {}/{} tables stored, {} replaced",
            path.display(),
            successful_tables,
            outcomes.len(),
            replacement.successful_replacements
        );

        Ok(DocumentReport {
            source_file: path.to_path_buf(),
            session_id: session.session_id,
            method: extraction.method,
            total_tables: outcomes.len(),
            successful_tables,
            tables: outcomes,
            replacement,
            processed_document,
            artifacts,
        })
    }

    async fn store_table(
        &self,
        schema: &TableSchema,
        description: &Description,
        source_file: &str,
        session_id: &str,
    ) -> TableOutcome {
        let mut outcome = TableOutcome {
            table_id: schema.table_id.clone(),
            label: schema.label.clone(),
            schema_ok: schema.success,
            description_ok: description.is_success(),
            stored: false,
            error: None,
        };

        if !schema.success {
            outcome.error = schema.error.clone();
            return outcome;
        }

        let content = description.is_success().then_some(description.content.as_str());
        match self
            .ctx
            .store
            .upsert_table(schema, content, source_file, Some(session_id))
            .await
        {
            Ok(()) => {
                debug!("Stored table {} ({} rows)", schema.table_id, schema.row_count);
                outcome.stored = true;
            }
            Err(e) => {
                warn!("Failed to store table {}: {}", schema.table_id, e);
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
