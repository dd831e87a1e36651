//! Diesel records for the store tables.

use diesel::prelude::*;

use crate::schema;

/// Table metadata row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::tables)]
#[diesel(primary_key(table_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TableRecord {
    pub table_id: String,
    pub source_file: String,
    pub row_count: i64,
    pub column_count: i64,
    pub column_names: String,
    pub column_types: String,
    pub description: Option<String>,
    pub session_id: Option<String>,
    pub created_at: String,
}

/// New or replacement table metadata.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::tables)]
pub struct NewTable<'a> {
    pub table_id: &'a str,
    pub source_file: &'a str,
    pub row_count: i64,
    pub column_count: i64,
    pub column_names: &'a str,
    pub column_types: &'a str,
    pub description: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub created_at: &'a str,
}

/// One stored row of table content.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::table_data)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TableRowRecord {
    pub id: i32,
    pub table_id: String,
    pub row_index: i64,
    pub row_data: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::table_data)]
pub struct NewTableRow<'a> {
    pub table_id: &'a str,
    pub row_index: i64,
    pub row_data: String,
}

/// Processing session row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::processing_sessions)]
#[diesel(primary_key(session_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SessionRecord {
    pub session_id: String,
    pub source_file: String,
    pub total_tables: i64,
    pub successful_tables: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::processing_sessions)]
pub struct NewSession<'a> {
    pub session_id: &'a str,
    pub source_file: &'a str,
    pub total_tables: i64,
    pub successful_tables: i64,
    pub created_at: &'a str,
}
