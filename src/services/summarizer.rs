//! Natural-language table descriptions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, CompletionService};
use crate::models::{Description, TableSchema};

/// Prompt for describing one table. Placeholders: {context}, {table_id},
/// {rows}, {columns}, {column_names}, {column_types}, {samples}.
pub const DESCRIBE_TABLE_PROMPT: &str = r#"Analyze this table and provide a clear, concise description of what it contains and what it is for.{context}

Table ID: {table_id}
Dimensions: {rows} rows x {columns} columns
Column names: {column_names}

Column types:
{column_types}
{samples}
Describe the kind of data in the table, its purpose, and its most important columns in 2-3 sentences.

Respond with ONLY the description, no additional text or formatting."#;

const SAMPLE_ROWS_IN_PROMPT: usize = 3;
const FALLBACK_COLUMNS: usize = 5;

/// Generates descriptions for extracted tables.
pub struct TableSummarizer {
    llm: Arc<dyn CompletionService>,
    enabled: bool,
    timeout: Duration,
}

impl TableSummarizer {
    pub fn new(llm: Arc<dyn CompletionService>, enabled: bool, timeout: Duration) -> Self {
        Self {
            llm,
            enabled,
            timeout,
        }
    }

    /// Describe one table.
    ///
    /// Unsuccessful schemas, completion failures and calls that outlast the
    /// timeout produce an error description. With generation disabled the
    /// structural fallback is used.
    pub async fn describe(&self, schema: &TableSchema, context_hint: Option<&str>) -> Description {
        if !schema.success {
            let reason = schema.error.as_deref().unwrap_or("schema extraction failed");
            return Description::error(
                &schema.table_id,
                format!("Unable to describe table {}: {}", schema.table_id, reason),
            );
        }
        if !self.enabled {
            return Description::success(&schema.table_id, Self::fallback(schema));
        }

        let request = CompletionRequest::prompt(build_prompt(schema, context_hint))
            .with_max_tokens(300)
            .with_temperature(0.3);

        debug!("Describing table {}", schema.table_id);
        match tokio::time::timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(response)) => {
                let text = response.text.trim();
                if text.is_empty() {
                    Description::error(&schema.table_id, "Empty description response")
                } else {
                    Description::success(&schema.table_id, text)
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to describe table {}: {}", schema.table_id, e);
                Description::error(
                    &schema.table_id,
                    format!("Failed to generate description: {}", e),
                )
            }
            Err(_) => {
                warn!(
                    "Describing table {} timed out after {:?}",
                    schema.table_id, self.timeout
                );
                Description::error(
                    &schema.table_id,
                    format!("Description timed out after {:?}", self.timeout),
                )
            }
        }
    }

    /// Describe tables one after another, keeping the input order.
    pub async fn describe_all(
        &self,
        schemas: &[TableSchema],
        context_hint: Option<&str>,
    ) -> Vec<Description> {
        let mut descriptions = Vec::with_capacity(schemas.len());
        for schema in schemas {
            descriptions.push(self.describe(schema, context_hint).await);
        }

        let successful = descriptions.iter().filter(|d| d.is_success()).count();
        info!(
            "Generated {}/{} table descriptions",
            successful,
            descriptions.len()
        );
        descriptions
    }

    /// Structural description used when generation is disabled.
    pub fn fallback(schema: &TableSchema) -> String {
        let mut columns = schema
            .columns
            .iter()
            .take(FALLBACK_COLUMNS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if schema.columns.len() > FALLBACK_COLUMNS {
            columns.push_str("...");
        }
        format!(
            "Table with {} rows and {} columns. Columns: {}",
            schema.row_count,
            schema.column_count(),
            columns
        )
    }
}

fn build_prompt(schema: &TableSchema, context_hint: Option<&str>) -> String {
    let context = context_hint
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!(" The table comes from a {} document.", c.trim()))
        .unwrap_or_default();

    let column_types = schema
        .columns
        .iter()
        .map(|c| format!("- {}: {}", c, schema.column_type(c)))
        .collect::<Vec<_>>()
        .join("\n");

    let mut samples = String::new();
    if !schema.sample_rows.is_empty() {
        samples.push_str("\nSample rows:\n");
        for (i, row) in schema.sample_rows.iter().take(SAMPLE_ROWS_IN_PROMPT).enumerate() {
            let row = Value::Object(row.clone());
            samples.push_str(&format!("Row {}: {}\n", i + 1, row));
        }
    }

    DESCRIBE_TABLE_PROMPT
        .replace("{context}", &context)
        .replace("{table_id}", &schema.table_id)
        .replace("{rows}", &schema.row_count.to_string())
        .replace("{columns}", &schema.column_count().to_string())
        .replace("{column_names}", &schema.columns.join(", "))
        .replace("{column_types}", &column_types)
        .replace("{samples}", &samples)
}
