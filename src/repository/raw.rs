//! Raw statement execution, dry runs and backups over rusqlite.
//!
//! Diesel needs result types known at compile time, so statements whose
//! shape is only known at runtime go through a plain rusqlite connection.

use std::path::Path;
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::Value;

use crate::models::RowData;

/// Outcome of a raw statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawResult {
    /// The statement produced a result set (possibly empty).
    Rows {
        columns: Vec<String>,
        rows: Vec<RowData>,
    },
    /// The statement changed this many rows.
    Affected(usize),
}

impl RawResult {
    pub fn row_count(&self) -> usize {
        match self {
            RawResult::Rows { rows, .. } => rows.len(),
            RawResult::Affected(_) => 0,
        }
    }
}

pub(crate) fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// Execute one statement with positional parameters.
pub(crate) fn execute(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<RawResult> {
    let mut stmt = conn.prepare(sql)?;
    let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();

    if stmt.column_count() == 0 {
        let affected = stmt.execute(params_from_iter(bound.iter()))?;
        return Ok(RawResult::Affected(affected));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut result = stmt.query(params_from_iter(bound.iter()))?;
    let mut rows = Vec::new();
    while let Some(row) = result.next()? {
        let mut data = RowData::new();
        for (i, name) in columns.iter().enumerate() {
            data.insert(name.clone(), from_value_ref(row.get_ref(i)?));
        }
        rows.push(data);
    }

    Ok(RawResult::Rows { columns, rows })
}

/// Prove a statement is executable without producing results or effects.
///
/// Row-producing statements run wrapped in a zero-row window; anything
/// else is only planned with `EXPLAIN QUERY PLAN`.
pub(crate) fn dry_run(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    let check = if is_row_producing(statement) {
        format!("SELECT * FROM (\n{}\n) LIMIT 0", statement)
    } else {
        format!("EXPLAIN QUERY PLAN {}", statement)
    };

    let mut stmt = conn.prepare(&check)?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}

/// Whether a statement starts with a keyword that produces a result set.
pub fn is_row_producing(statement: &str) -> bool {
    let keyword = statement
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();
    ["SELECT", "WITH", "VALUES"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

/// Copy the whole database into `dst`.
pub(crate) fn backup(src: &Connection, dst: &mut Connection) -> rusqlite::Result<()> {
    let backup = Backup::new(src, dst)?;
    backup.run_to_completion(64, Duration::ZERO, None)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER, name TEXT);
             INSERT INTO items VALUES (1, 'bolt'), (2, 'nut');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_select_returns_rows() {
        let conn = memory_db();
        let result = execute(&conn, "SELECT id, name FROM items WHERE id > ?", &[json!(1)]).unwrap();
        match result {
            RawResult::Rows { columns, rows } => {
                assert_eq!(columns, vec!["id", "name"]);
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["name"], json!("nut"));
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_rows_is_not_an_error() {
        let conn = memory_db();
        let result = execute(&conn, "SELECT * FROM items WHERE id > 100", &[]).unwrap();
        assert_eq!(result.row_count(), 0);
        assert!(matches!(result, RawResult::Rows { .. }));
    }

    #[test]
    fn test_update_returns_affected_count() {
        let conn = memory_db();
        let result = execute(&conn, "UPDATE items SET name = 'x'", &[]).unwrap();
        assert_eq!(result, RawResult::Affected(2));
    }

    #[test]
    fn test_syntax_error_is_an_error() {
        let conn = memory_db();
        assert!(execute(&conn, "SELEC id FROM items", &[]).is_err());
        assert!(execute(&conn, "SELECT nope FROM items", &[]).is_err());
    }

    #[test]
    fn test_dry_run_has_no_effects() {
        let conn = memory_db();
        dry_run(&conn, "SELECT name FROM items;").unwrap();
        dry_run(&conn, "WITH t AS (SELECT 1 AS n) SELECT n FROM t").unwrap();
        dry_run(&conn, "DELETE FROM items WHERE id = 1;").unwrap();
        dry_run(&conn, "SELECT 1 -- trailing comment").unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_dry_run_rejects_invalid_statements() {
        let conn = memory_db();
        assert!(dry_run(&conn, "SELECT missing FROM items").is_err());
        assert!(dry_run(&conn, "DELETE FROM nowhere").is_err());
        assert!(dry_run(&conn, "SELECT 1; DROP TABLE items").is_err());
    }

    #[test]
    fn test_is_row_producing() {
        assert!(is_row_producing("select 1"));
        assert!(is_row_producing("  WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(is_row_producing("SELECT(1)"));
        assert!(!is_row_producing("DELETE FROM t"));
    }
}
