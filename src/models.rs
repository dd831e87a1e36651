//! Domain models shared by extraction, storage and the query path.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of table content keyed by column name.
pub type RowData = serde_json::Map<String, Value>;

/// Inferred type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    #[serde(other)]
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table as found in a source document, before any normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    /// Identifier derived from the source file stem and the table ordinal.
    pub table_id: String,
    /// Zero-based position among the tables of the source document.
    pub index: usize,
    /// Table markup (an HTML `<table>` element).
    pub markup: String,
    /// Human-readable origin, e.g. a sheet name.
    pub label: Option<String>,
}

/// Normalized shape of one table.
///
/// Callers must check `success` before using the columns or rows; a schema
/// that failed to parse carries the reason in `error` and no columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub columns: Vec<String>,
    pub column_types: BTreeMap<String, ColumnType>,
    pub row_count: usize,
    pub sample_rows: Vec<RowData>,
    /// True when multi-level headers were joined into single names.
    pub flattened: bool,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every row of the table, used when persisting.
    #[serde(skip)]
    pub rows: Vec<RowData>,
}

impl TableSchema {
    /// Build an unsuccessful schema for a table that could not be parsed.
    pub fn failed(table_id: &str, label: Option<String>, error: impl Into<String>) -> Self {
        Self {
            table_id: table_id.to_string(),
            label,
            columns: Vec::new(),
            column_types: BTreeMap::new(),
            row_count: 0,
            sample_rows: Vec::new(),
            flattened: false,
            success: false,
            error: Some(error.into()),
            rows: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Inferred type of a column, `Unknown` if the column does not exist.
    pub fn column_type(&self, column: &str) -> ColumnType {
        self.column_types
            .get(column)
            .copied()
            .unwrap_or(ColumnType::Unknown)
    }
}

/// Outcome of generating a description for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionStatus {
    Success,
    Error,
}

/// Natural-language description of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub table_id: String,
    pub content: String,
    pub status: DescriptionStatus,
}

impl Description {
    pub fn success(table_id: &str, content: impl Into<String>) -> Self {
        Self {
            table_id: table_id.to_string(),
            content: content.into(),
            status: DescriptionStatus::Success,
        }
    }

    pub fn error(table_id: &str, reason: impl Into<String>) -> Self {
        Self {
            table_id: table_id.to_string(),
            content: reason.into(),
            status: DescriptionStatus::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DescriptionStatus::Success
    }
}

/// Table metadata as persisted in the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredTable {
    pub table_id: String,
    pub source_file: String,
    pub row_count: u64,
    pub column_count: u64,
    pub column_names: Vec<String>,
    pub column_types: BTreeMap<String, ColumnType>,
    pub description: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One persisted row of a stored table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRow {
    pub table_id: String,
    pub row_index: u64,
    pub row_data: RowData,
}

/// A single document-processing run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSession {
    pub session_id: String,
    pub source_file: String,
    pub total_tables: u64,
    pub successful_tables: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingSession {
    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub total_tables: u64,
    pub total_rows: u64,
    pub total_sessions: u64,
    pub unique_sources: u64,
}
