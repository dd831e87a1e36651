//! Service layer for document processing and result handling.
//!
//! This module contains domain logic separated from UI concerns.
//! Services are used by the CLI and can be embedded by other front ends.

mod artifacts;
pub mod export;
pub mod pipeline;
pub mod summarizer;

pub use artifacts::DocumentArtifacts;
pub use export::{export_results, ExportError, ExportFormat};
pub use pipeline::{
    BatchItem, BatchReport, DocumentPipeline, DocumentReport, PipelineError, PipelineOptions,
    TableOutcome,
};
pub use summarizer::TableSummarizer;
