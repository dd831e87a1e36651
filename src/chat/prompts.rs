//! Prompt text for the query path.

use crate::models::StoredTable;

/// Tables described in full in the SQL prompt.
const MAX_TABLES_IN_SQL_PROMPT: usize = 10;

pub const FEASIBILITY_PROMPT: &str = r#"You are an expert database query analyst. Decide whether the user's question can be answered by querying the tables below.

{tables}

User question: "{question}"

Consider whether the question asks for information that could be in these tables, whether the needed fields are likely present in the columns, and whether the lookup, filtering or aggregation is feasible with SQL.

Respond with a JSON object in exactly this format:
{
    "is_fulfillable": true,
    "confidence": 0.0,
    "reasoning": "explanation of the decision",
    "suggested_approach": "how to answer it, or an alternative",
    "required_tables": ["table_ids", "needed"]
}

Questions about weather, sending messages or creating new data are not fulfillable.
Return ONLY the JSON object."#;

/// Physical layout of the store as shown to the model.
pub const PHYSICAL_SCHEMA: &str = r#"1. tables (metadata about extracted tables):
   - table_id (TEXT PRIMARY KEY) - unique identifier for each table
   - source_file (TEXT) - name of the document the table came from
   - row_count (INTEGER) - number of data rows
   - column_count (INTEGER) - number of columns
   - column_names (TEXT) - JSON array of column names
   - column_types (TEXT) - JSON object mapping column name to type
   - description (TEXT) - generated description of the table
   - session_id (TEXT)
   - created_at (TEXT, RFC 3339)

2. table_data (one row per table row):
   - id (INTEGER PRIMARY KEY)
   - table_id (TEXT) - references tables.table_id
   - row_index (INTEGER) - row number within the table, starting at 0
   - row_data (TEXT) - JSON object with column names as keys

3. processing_sessions (one row per processed document):
   - session_id (TEXT PRIMARY KEY)
   - source_file (TEXT)
   - total_tables (INTEGER)
   - successful_tables (INTEGER)
   - created_at (TEXT)
   - completed_at (TEXT)"#;

pub const SQL_RULES: &str = r#"Rules:
1. Return ONLY the SQL statement, with no explanation and no markdown
2. Use exact table and column names from the schema
3. Use SQLite syntax
4. For text searches use LIKE with % wildcards
5. Read fields of table_data.row_data with json_extract(row_data, '$."Column Name"')
6. Cast JSON values when comparing numbers: CAST(json_extract(...) AS INTEGER) or CAST(json_extract(...) AS REAL)
7. json_extract returns raw values: compare strings with 'Value', not '"Value"'
8. Use aggregate functions (COUNT, SUM, AVG, MIN, MAX) when the question asks for totals

Examples:
- SELECT table_id, description FROM tables WHERE source_file LIKE '%inventory%';
- SELECT COUNT(*) FROM table_data WHERE table_id = 'report_table_1';
- SELECT row_data FROM table_data WHERE table_id = 'report_table_1' AND json_extract(row_data, '$."Player Name"') = 'Alex';
- SELECT AVG(CAST(json_extract(row_data, '$."Value"') AS REAL)) FROM table_data WHERE table_id = 'report_table_1';
- SELECT json_extract(row_data, '$."Name"') FROM table_data WHERE CAST(json_extract(row_data, '$."Level"') AS INTEGER) <= 18;"#;

/// Context block describing every known table for the classifier.
pub fn tables_context(tables: &[StoredTable]) -> String {
    if tables.is_empty() {
        return "No tables available in the database.".to_string();
    }

    let mut parts = vec!["Available tables:".to_string()];
    for table in tables {
        let mut lines = vec![
            format!("- Table: {}", table.table_id),
            format!("  Source: {}", table.source_file),
            format!(
                "  Rows: {}, Columns: {}",
                table.row_count, table.column_count
            ),
        ];
        if !table.column_names.is_empty() {
            lines.push(format!("  Column names: {}", table.column_names.join(", ")));
        }
        if let Some(description) = table.description.as_deref() {
            lines.push(format!("  Description: {}", description));
        }
        parts.push(lines.join("\n"));
    }
    parts.join("\n\n")
}

/// Physical schema plus the known tables with typed column lists.
pub fn schema_context(tables: &[StoredTable]) -> String {
    let mut out = format!("Database tables:\n\n{}\n", PHYSICAL_SCHEMA);
    if tables.is_empty() {
        return out;
    }

    out.push_str("\nKnown rows of 'tables':\n");
    for table in tables.iter().take(MAX_TABLES_IN_SQL_PROMPT) {
        let columns = table
            .column_names
            .iter()
            .map(|c| {
                let kind = table.column_types.get(c).map(|t| t.as_str()).unwrap_or("string");
                format!("{} ({})", c, kind)
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "- table_id: '{}', source_file: '{}', row_count: {}\n  columns: {}\n",
            table.table_id, table.source_file, table.row_count, columns
        ));
    }
    if tables.len() > MAX_TABLES_IN_SQL_PROMPT {
        out.push_str(&format!(
            "- ... and {} more tables\n",
            tables.len() - MAX_TABLES_IN_SQL_PROMPT
        ));
    }
    out
}

/// Extra instructions for a retry, more detailed with each attempt.
pub fn retry_guidance(attempt: u32, previous_failure: Option<&str>) -> String {
    if attempt <= 1 {
        return String::new();
    }

    let mut lines = vec![format!(
        "This is attempt {}. Earlier attempts failed.",
        attempt
    )];
    if let Some(failure) = previous_failure {
        lines.push(format!("The previous attempt failed with: {}", failure));
    }
    lines.push("- Check that table and column names match the schema exactly, including case".into());
    if attempt >= 3 {
        lines.push(
            "- Column values live inside table_data.row_data; read them with json_extract(row_data, '$.\"Column\"'), never as plain columns".into(),
        );
    }
    if attempt >= 4 {
        lines.push("- Cast numeric JSON values with CAST(... AS INTEGER) or CAST(... AS REAL) before comparing or aggregating".into());
        lines.push("- Return a single statement that starts with SELECT or WITH".into());
    }
    lines.join("\n")
}

/// Full SQL generation prompt for one attempt.
pub fn sql_prompt(
    question: &str,
    tables: &[StoredTable],
    attempt: u32,
    previous_failure: Option<&str>,
    allow_mutations: bool,
) -> String {
    let access = if allow_mutations {
        "Statements may be SELECT, WITH, INSERT, UPDATE or DELETE."
    } else {
        "The database is read-only: write a single SELECT (or WITH ... SELECT) statement."
    };
    let guidance = retry_guidance(attempt, previous_failure);

    format!(
        "You are an expert SQL generator. Write one SQLite statement that answers the user's question.\n\n\
         {schema}\n\
         User question: \"{question}\"\n\n\
         {guidance}{separator}\
         {access}\n\n\
         {rules}\n\n\
         SQL statement:",
        schema = schema_context(tables),
        question = question,
        guidance = guidance,
        separator = if guidance.is_empty() { "" } else { "\n\n" },
        access = access,
        rules = SQL_RULES,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;
    use chrono::Utc;

    fn table(id: &str) -> StoredTable {
        StoredTable {
            table_id: id.to_string(),
            source_file: "orders.html".to_string(),
            row_count: 2,
            column_count: 2,
            column_names: vec!["id".to_string(), "total".to_string()],
            column_types: [
                ("id".to_string(), ColumnType::Integer),
                ("total".to_string(), ColumnType::Float),
            ]
            .into_iter()
            .collect(),
            description: Some("Order totals.".to_string()),
            session_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tables_context() {
        let context = tables_context(&[table("orders_table_1")]);
        assert!(context.contains("- Table: orders_table_1"));
        assert!(context.contains("Column names: id, total"));
        assert!(context.contains("Description: Order totals."));
        assert_eq!(tables_context(&[]), "No tables available in the database.");
    }

    #[test]
    fn test_schema_context_lists_typed_columns() {
        let context = schema_context(&[table("orders_table_1")]);
        assert!(context.contains("row_data (TEXT)"));
        assert!(context.contains("columns: id (integer), total (float)"));
    }

    #[test]
    fn test_schema_context_caps_tables() {
        let tables: Vec<_> = (0..12).map(|i| table(&format!("t_table_{}", i))).collect();
        let context = schema_context(&tables);
        assert!(context.contains("t_table_9'"));
        assert!(!context.contains("t_table_10'"));
        assert!(context.contains("and 2 more tables"));
    }

    #[test]
    fn test_retry_guidance_escalates() {
        assert!(retry_guidance(1, None).is_empty());
        let second = retry_guidance(2, Some("no such column: totl"));
        assert!(second.contains("no such column: totl"));
        assert!(!second.contains("json_extract"));
        assert!(retry_guidance(3, None).contains("json_extract"));
        let fifth = retry_guidance(5, None);
        assert!(fifth.contains("CAST"));
        assert!(fifth.len() > retry_guidance(3, None).len());
    }

    #[test]
    fn test_sql_prompt_access_rule() {
        let read_only = sql_prompt("how many orders?", &[], 1, None, false);
        assert!(read_only.contains("read-only"));
        assert!(read_only.contains("how many orders?"));
        let writable = sql_prompt("delete order 1", &[], 1, None, true);
        assert!(writable.contains("INSERT, UPDATE or DELETE"));
    }
}
