//! Format-specific table extraction.
//!
//! Each extractor turns a document into its raw tables plus a flowed,
//! line-oriented text rendering in which every table appears as a pipe
//! table. The flowed text is segmented into chunks so that generated
//! descriptions can later be put back in place of the tables.

pub mod flow;
pub mod grid;
mod html;
mod router;
mod spreadsheet;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::models::RawTable;

pub use flow::{
    chunk_spans, parse_pipe_tables, split_into_chunks, table_chunk_positions, FlowDocument,
};
pub use grid::Grid;
pub use html::HtmlExtractor;
pub use router::{ExtractorInfo, ExtractorRouter};
pub use spreadsheet::SpreadsheetExtractor;

/// Errors that can occur during extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("No extractor available for: {}", .0.display())]
    NoExtractor(PathBuf),

    #[error("Failed to parse document: {0}")]
    Parse(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the tables of a document were found. Spreadsheet methods are
/// ordered from richest to most degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Table elements of an HTML document.
    Html,
    /// Rectangular regions detected inside spreadsheet sheets.
    SheetRegions,
    /// Pipe-table runs re-parsed from the markdown rendering of the sheets.
    SheetMarkdown,
    /// One table per non-empty sheet.
    WholeSheets,
}

/// Everything an extractor produces for one document.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub source_file: PathBuf,
    pub method: ExtractionMethod,
    pub tables: Vec<RawTable>,
    /// Whole document as line-oriented text with tables as pipe tables.
    pub flowed_text: String,
    /// Flowed text split into table and prose chunks.
    pub chunks: Vec<String>,
    /// Indices into `chunks` of the table-bearing chunks, in document order.
    pub table_positions: Vec<usize>,
}

impl Extraction {
    /// Segment a flowed document and assemble the extraction result.
    ///
    /// A chunk is a table position when it is table-bearing and starts where
    /// the extractor rendered one of its tables.
    pub fn from_document(
        source_file: &Path,
        method: ExtractionMethod,
        tables: Vec<RawTable>,
        document: FlowDocument,
    ) -> Self {
        let (flowed_text, table_offsets) = document.into_parts();
        let (offsets, chunks): (Vec<usize>, Vec<String>) =
            chunk_spans(&flowed_text).into_iter().unzip();
        let table_positions: Vec<usize> = table_chunk_positions(&chunks)
            .into_iter()
            .filter(|&index| table_offsets.contains(&offsets[index]))
            .collect();

        if table_positions.len() != tables.len() {
            warn!(
                "{}: {} tables but {} table chunks",
                source_file.display(),
                tables.len(),
                table_positions.len()
            );
        }

        Self {
            source_file: source_file.to_path_buf(),
            method,
            tables,
            flowed_text,
            chunks,
            table_positions,
        }
    }
}

/// A document format that tables can be extracted from.
pub trait TableExtractor: Send + Sync {
    /// Short name used for registration and diagnostics.
    fn name(&self) -> &'static str;

    /// Lowercase file extensions (without the dot) this extractor handles.
    fn extensions(&self) -> &[&'static str];

    /// Whether this extractor can handle the given file.
    fn supports(&self, path: &Path) -> bool {
        extension_of(path)
            .map(|ext| self.extensions().contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Extract raw tables and flowed text from a file.
    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError>;
}

/// Lowercased extension of a path, without the leading dot.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// File stem used as the prefix of table identifiers.
pub(crate) fn document_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("document")
        .to_string()
}

/// Globally unique table identifier: source stem plus 1-based ordinal.
pub fn table_id(stem: &str, index: usize) -> String {
    format!("{}_table_{}", stem, index + 1)
}
