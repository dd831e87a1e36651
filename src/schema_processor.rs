//! Normalization of raw tables into flat, typed schemas.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::extractors::Grid;
use crate::models::{ColumnType, RawTable, RowData, TableSchema};

/// Number of rows kept as `sample_rows`.
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Fraction of non-empty values that must parse for a type to be assigned.
pub const DEFAULT_TYPE_THRESHOLD: f64 = 0.8;

const BOOLEAN_WORDS: &[&str] = &["true", "false", "yes", "no", "on", "off", "1", "0"];

/// Turns raw tables into [`TableSchema`]s. Stateless and free of I/O.
#[derive(Debug, Clone)]
pub struct SchemaProcessor {
    sample_size: usize,
    type_threshold: f64,
}

impl Default for SchemaProcessor {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            type_threshold: DEFAULT_TYPE_THRESHOLD,
        }
    }
}

impl SchemaProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_type_threshold(mut self, threshold: f64) -> Self {
        self.type_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Derive the schema of one table.
    ///
    /// Never fails: markup that cannot be turned into a grid yields a schema
    /// with `success == false` and the reason in `error`.
    pub fn extract_schema(&self, table: &RawTable) -> TableSchema {
        let grid = match Grid::from_markup(&table.markup) {
            Ok(grid) if !grid.is_empty() => grid,
            Ok(_) => {
                warn!("Table {} has no cells", table.table_id);
                return TableSchema::failed(&table.table_id, table.label.clone(), "table has no cells");
            }
            Err(e) => {
                warn!("Could not parse table {}: {}", table.table_id, e);
                return TableSchema::failed(&table.table_id, table.label.clone(), e.to_string());
            }
        };

        let header_rows = grid.header_rows.max(1);
        let (levels, body) = grid.rows.split_at(header_rows);

        let columns = unique_names(
            (0..grid.width())
                .map(|index| flatten_header(levels, index))
                .collect(),
        );

        let column_types: BTreeMap<String, ColumnType> = columns
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let values: Vec<&str> = body.iter().map(|row| row[index].as_str()).collect();
                (name.clone(), infer_type(&values, self.type_threshold))
            })
            .collect();

        let rows: Vec<RowData> = body
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(row)
                    .map(|(name, raw)| (name.clone(), typed_value(raw, column_types[name])))
                    .collect()
            })
            .collect();

        TableSchema {
            table_id: table.table_id.clone(),
            label: table.label.clone(),
            columns,
            column_types,
            row_count: rows.len(),
            sample_rows: rows.iter().take(self.sample_size).cloned().collect(),
            flattened: header_rows > 1,
            success: true,
            error: None,
            rows,
        }
    }

    /// Derive schemas for every table, in order.
    pub fn extract_all(&self, tables: &[RawTable]) -> Vec<TableSchema> {
        tables.iter().map(|table| self.extract_schema(table)).collect()
    }
}

/// Join the meaningful header segments of one column.
fn flatten_header(levels: &[Vec<String>], index: usize) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for level in levels {
        let segment = level[index].trim();
        if is_placeholder(segment) || segments.last() == Some(&segment) {
            continue;
        }
        segments.push(segment);
    }
    if segments.is_empty() {
        format!("col_{}", index)
    } else {
        segments.join("_")
    }
}

fn is_placeholder(segment: &str) -> bool {
    segment.is_empty() || segment.starts_with("Unnamed")
}

/// Suffix repeated names with `_2`, `_3`, ... so every column is unique.
fn unique_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if seen.insert(name.clone()) {
                return name;
            }
            let mut n = 2;
            loop {
                let candidate = format!("{}_{}", name, n);
                if seen.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

fn is_integer(value: &str) -> bool {
    value.parse::<i64>().is_ok()
}

fn is_float(value: &str) -> bool {
    value.parse::<f64>().is_ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    let lower = value.to_ascii_lowercase();
    if !BOOLEAN_WORDS.contains(&lower.as_str()) {
        return None;
    }
    Some(matches!(lower.as_str(), "true" | "yes" | "on" | "1"))
}

/// Infer a column type from its values.
///
/// Empty values and `-` are ignored. Integer, float and boolean are tried
/// in that order; the first one matching at least `threshold` of the
/// remaining values wins, otherwise the column is a string column.
pub fn infer_type(values: &[&str], threshold: f64) -> ColumnType {
    let present: Vec<&str> = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty() && *value != "-")
        .collect();
    if present.is_empty() {
        return ColumnType::String;
    }

    let total = present.len() as f64;
    let share = |parses: &dyn Fn(&str) -> bool| {
        present.iter().filter(|value| parses(value)).count() as f64 / total
    };

    if share(&is_integer) >= threshold {
        ColumnType::Integer
    } else if share(&is_float) >= threshold {
        ColumnType::Float
    } else if share(&|value| parse_bool(value).is_some()) >= threshold {
        ColumnType::Boolean
    } else {
        ColumnType::String
    }
}

/// Convert a cell to JSON according to its column type.
///
/// Cells that do not parse as the column type keep their text.
fn typed_value(raw: &str, column_type: ColumnType) -> Value {
    let value = raw.trim();
    if value.is_empty() {
        return Value::String(String::new());
    }
    let typed = match column_type {
        ColumnType::Integer => value.parse::<i64>().ok().map(Value::from),
        ColumnType::Float => value
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        ColumnType::Boolean => parse_bool(value).map(Value::Bool),
        ColumnType::String | ColumnType::Unknown => None,
    };
    typed.unwrap_or_else(|| Value::String(value.to_string()))
}

/// Aggregate view over the schemas of one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaSummary {
    pub total_tables: usize,
    pub successful_tables: usize,
    pub failed_tables: usize,
    pub total_rows: usize,
    pub total_columns: usize,
    pub type_distribution: BTreeMap<String, usize>,
}

pub fn schema_summary(schemas: &[TableSchema]) -> SchemaSummary {
    let mut summary = SchemaSummary {
        total_tables: schemas.len(),
        ..Default::default()
    };
    for schema in schemas.iter().filter(|schema| schema.success) {
        summary.successful_tables += 1;
        summary.total_rows += schema.row_count;
        summary.total_columns += schema.column_count();
        for column_type in schema.column_types.values() {
            *summary
                .type_distribution
                .entry(column_type.to_string())
                .or_default() += 1;
        }
    }
    summary.failed_tables = summary.total_tables - summary.successful_tables;
    summary
}
