//! Export of query results to files.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::repository::RawResult;

/// Widest column in the text rendering.
const MAX_TEXT_WIDTH: usize = 50;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Statement returned no result set ({0} rows affected)")]
    NoResultSet(usize),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Text,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" => Ok(ExportFormat::Text),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Write a result set to `query_results_<timestamp>.<ext>` in `output_dir`.
pub fn export_results(
    result: &RawResult,
    format: ExportFormat,
    output_dir: &Path,
    query: Option<&str>,
) -> Result<PathBuf, ExportError> {
    let (columns, rows) = match result {
        RawResult::Rows { columns, rows } => (columns, rows),
        RawResult::Affected(n) => return Err(ExportError::NoResultSet(*n)),
    };

    fs::create_dir_all(output_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
    let path = output_dir.join(format!("query_results_{}.{}", timestamp, format.extension()));

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    match format {
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(columns)?;
            for record in &cells {
                writer.write_record(record)?;
            }
            writer.flush()?;
        }
        ExportFormat::Json => {
            let document = json!({
                "metadata": {
                    "exported_at": Utc::now().to_rfc3339(),
                    "total_rows": rows.len(),
                    "query": query,
                },
                "columns": columns,
                "results": rows,
            });
            fs::write(&path, serde_json::to_string_pretty(&document)?)?;
        }
        ExportFormat::Text => {
            fs::write(&path, render_text(columns, &cells, query))?;
        }
    }

    info!("Exported {} rows to {}", rows.len(), path.display());
    Ok(path)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_text(columns: &[String], cells: &[Vec<String>], query: Option<&str>) -> String {
    let rule = "=".repeat(60);
    let mut out = format!("{rule}\nQUERY RESULTS\n{rule}\n");
    if let Some(query) = query {
        out.push_str(&format!("Query: {}\n", query));
    }
    out.push_str(&format!("Exported: {}\n", Utc::now().to_rfc3339()));
    out.push_str(&format!("Total Rows: {}\n{rule}\n\n", cells.len()));

    if cells.is_empty() {
        out.push_str("No results found.\n");
        return out;
    }

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_TEXT_WIDTH)
        })
        .collect();

    let header = format_text_row(columns, &widths);
    out.push_str(&header);
    out.push('\n');
    out.push_str(&"-".repeat(header.chars().count()));
    out.push('\n');
    for row in cells {
        out.push_str(format_text_row(row, &widths).trim_end());
        out.push('\n');
    }
    out
}

fn format_text_row(values: &[String], widths: &[usize]) -> String {
    values
        .iter()
        .zip(widths)
        .map(|(v, &w)| {
            let clipped: String = v.chars().take(w).collect();
            format!("{:<width$}", clipped, width = w)
        })
        .collect::<Vec<_>>()
        .join(" | ")
}
