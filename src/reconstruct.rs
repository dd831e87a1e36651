//! Replacement of table chunks with their generated descriptions.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::Description;

/// Comment placed at the top of every processed document.
pub const PROVENANCE_MARKER: &str = "<!-- This document has been processed with table descriptions -->";

/// Result of one attempted replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStatus {
    Replaced,
    /// The description for this position was not successful.
    DescriptionFailed,
    /// No description exists for this position.
    MissingDescription,
    /// The position does not refer to an existing chunk.
    InvalidPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacementDetail {
    pub position: usize,
    pub table_id: Option<String>,
    pub original_length: usize,
    pub new_length: usize,
    pub status: ReplacementStatus,
}

/// Observability record of a reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplacementReport {
    pub total_tables: usize,
    pub successful_replacements: usize,
    pub failed_replacements: usize,
    pub details: Vec<ReplacementDetail>,
}

impl ReplacementReport {
    /// Human-readable rendering of the report.
    pub fn render(&self) -> String {
        let mut out = String::from("Table Replacement Report\n========================\n\n");
        out.push_str(&format!("Total tables: {}\n", self.total_tables));
        out.push_str(&format!(
            "Successful replacements: {}\n",
            self.successful_replacements
        ));
        out.push_str(&format!("Failed replacements: {}\n\n", self.failed_replacements));

        for detail in &self.details {
            out.push_str(&format!(
                "Position {}: {} ({:?}) {} -> {} chars\n",
                detail.position,
                detail.table_id.as_deref().unwrap_or("-"),
                detail.status,
                detail.original_length,
                detail.new_length
            ));
        }
        out
    }
}

/// Rebuilds documents with table chunks swapped for description stubs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentReconstructor;

impl DocumentReconstructor {
    pub fn new() -> Self {
        Self
    }

    /// Stub text that stands in for a table.
    pub fn stub(table_id: &str, description: &str) -> String {
        format!("Table {} Summary: {}", table_id, description.trim())
    }

    /// Replace the chunk at `table_positions[i]` with the stub for
    /// `descriptions[i]` when that description succeeded.
    ///
    /// The output has the same number of chunks in the same order; chunks
    /// that are not replaced are returned unchanged.
    pub fn replace(
        &self,
        chunks: &[String],
        table_positions: &[usize],
        descriptions: &[Description],
    ) -> (Vec<String>, ReplacementReport) {
        let mut output = chunks.to_vec();
        let mut report = ReplacementReport {
            total_tables: table_positions.len(),
            ..Default::default()
        };

        for (i, &position) in table_positions.iter().enumerate() {
            let description = descriptions.get(i);
            let original_length = chunks.get(position).map(|c| c.chars().count()).unwrap_or(0);

            let (status, new_length) = match (chunks.get(position), description) {
                (None, _) => (ReplacementStatus::InvalidPosition, 0),
                (Some(_), None) => (ReplacementStatus::MissingDescription, original_length),
                (Some(_), Some(d)) if !d.is_success() => {
                    (ReplacementStatus::DescriptionFailed, original_length)
                }
                (Some(_), Some(d)) => {
                    let stub = Self::stub(&d.table_id, &d.content);
                    let length = stub.chars().count();
                    output[position] = stub;
                    (ReplacementStatus::Replaced, length)
                }
            };

            if status == ReplacementStatus::Replaced {
                report.successful_replacements += 1;
            }
            report.details.push(ReplacementDetail {
                position,
                table_id: description.map(|d| d.table_id.clone()),
                original_length,
                new_length,
                status,
            });
        }

        report.failed_replacements = report.total_tables - report.successful_replacements;
        (output, report)
    }

    /// Join chunks with blank lines under the provenance marker.
    pub fn create_document(&self, chunks: &[String]) -> String {
        format!("{}\n\n{}", PROVENANCE_MARKER, chunks.join("\n\n"))
    }
}

static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Table (\S+) Summary: (.+)$").expect("table reference pattern is valid")
});

/// Find description stubs in a processed document as `(table_id, description)` pairs.
pub fn table_references(document: &str) -> Vec<(String, String)> {
    TABLE_REFERENCE
        .captures_iter(document)
        .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()))
        .collect()
}
