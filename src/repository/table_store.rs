//! Diesel-based table store.
//!
//! Typed operations go through the r2d2 pool with [`run_blocking`]; raw
//! statements, dry runs and backups use a short-lived rusqlite connection
//! to the same file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{
    NewSession, NewTable, NewTableRow, SessionRecord, TableRecord, TableRowRecord,
};
use super::pool::{create_pool, init_schema, run_blocking, DieselError, SqlitePool};
use super::raw::{self, RawResult};
use super::{parse_datetime, parse_datetime_opt, StoreError};
use crate::models::{
    ProcessingSession, RowData, StoreSummary, StoredRow, StoredTable, TableSchema,
};
use crate::schema::{processing_sessions, table_data, tables};

/// Rows per multi-row INSERT.
const INSERT_BATCH: usize = 500;

/// Metadata columns that `search` may match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    TableId,
    SourceFile,
    Description,
}

impl SearchField {
    pub const ALL: [SearchField; 3] = [
        SearchField::TableId,
        SearchField::SourceFile,
        SearchField::Description,
    ];
}

impl From<TableRecord> for StoredTable {
    fn from(record: TableRecord) -> Self {
        StoredTable {
            table_id: record.table_id,
            source_file: record.source_file,
            row_count: record.row_count.max(0) as u64,
            column_count: record.column_count.max(0) as u64,
            column_names: serde_json::from_str(&record.column_names).unwrap_or_default(),
            column_types: serde_json::from_str(&record.column_types).unwrap_or_default(),
            description: record.description,
            session_id: record.session_id,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

impl From<TableRowRecord> for StoredRow {
    fn from(record: TableRowRecord) -> Self {
        StoredRow {
            table_id: record.table_id,
            row_index: record.row_index.max(0) as u64,
            row_data: serde_json::from_str(&record.row_data).unwrap_or_default(),
        }
    }
}

impl From<SessionRecord> for ProcessingSession {
    fn from(record: SessionRecord) -> Self {
        ProcessingSession {
            session_id: record.session_id,
            source_file: record.source_file,
            total_tables: record.total_tables.max(0) as u64,
            successful_tables: record.successful_tables.max(0) as u64,
            created_at: parse_datetime(&record.created_at),
            completed_at: parse_datetime_opt(record.completed_at),
        }
    }
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

/// Store for extracted tables, their rows and processing sessions.
#[derive(Clone)]
pub struct TableStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl TableStore {
    /// Open (and if needed create) the store at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let pool = create_pool(db_path)?;
        run_blocking(pool.clone(), init_schema).await?;
        debug!("Opened table store at {}", db_path.display());

        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert or replace a table's metadata and all of its rows.
    ///
    /// Existing rows for the table are deleted, the metadata row replaced
    /// and the schema's rows inserted, all in one transaction.
    pub async fn upsert_table(
        &self,
        schema: &TableSchema,
        description: Option<&str>,
        source_file: &str,
        session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let column_names = serde_json::to_string(&schema.columns)?;
        let column_types = serde_json::to_string(&schema.column_types)?;
        let rows = serialize_rows(&schema.rows)?;
        let table_id = schema.table_id.clone();
        let column_count = schema.columns.len() as i64;
        let description = description.map(str::to_string);
        let source_file = source_file.to_string();
        let session_id = session_id.map(str::to_string);
        let now = Utc::now().to_rfc3339();
        let pool = self.pool.clone();

        let stored = run_blocking(pool, move |conn| {
            conn.immediate_transaction::<_, DieselError, _>(|conn| {
                diesel::delete(table_data::table.filter(table_data::table_id.eq(&table_id)))
                    .execute(conn)?;

                diesel::replace_into(tables::table)
                    .values(&NewTable {
                        table_id: &table_id,
                        source_file: &source_file,
                        row_count: rows.len() as i64,
                        column_count,
                        column_names: &column_names,
                        column_types: &column_types,
                        description: description.as_deref(),
                        session_id: session_id.as_deref(),
                        created_at: &now,
                    })
                    .execute(conn)?;

                insert_rows(conn, &table_id, rows)
            })
        })
        .await?;

        debug!("Stored table {} with {} rows", schema.table_id, stored);
        Ok(())
    }

    /// Replace the rows of an existing table and update its row count.
    pub async fn store_rows(&self, table_id: &str, rows: &[RowData]) -> Result<(), StoreError> {
        let rows = serialize_rows(rows)?;
        let table_id = table_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            conn.immediate_transaction::<_, DieselError, _>(|conn| {
                let exists: i64 = tables::table
                    .filter(tables::table_id.eq(&table_id))
                    .select(count_star())
                    .first(conn)?;
                if exists == 0 {
                    return Err(DieselError::NotFound);
                }

                diesel::delete(table_data::table.filter(table_data::table_id.eq(&table_id)))
                    .execute(conn)?;
                let count = insert_rows(conn, &table_id, rows)?;
                diesel::update(tables::table.find(&table_id))
                    .set(tables::row_count.eq(count as i64))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await?;
        Ok(())
    }

    /// Get a table by ID.
    pub async fn get_table(&self, table_id: &str) -> Result<Option<StoredTable>, StoreError> {
        let table_id = table_id.to_string();
        let pool = self.pool.clone();

        let record = run_blocking(pool, move |conn| {
            tables::table
                .find(&table_id)
                .first::<TableRecord>(conn)
                .optional()
        })
        .await?;
        Ok(record.map(StoredTable::from))
    }

    pub async fn table_exists(&self, table_id: &str) -> Result<bool, StoreError> {
        let table_id = table_id.to_string();
        let pool = self.pool.clone();

        let count: i64 = run_blocking(pool, move |conn| {
            tables::table
                .filter(tables::table_id.eq(&table_id))
                .select(count_star())
                .first(conn)
        })
        .await?;
        Ok(count > 0)
    }

    /// All tables, most recent first.
    pub async fn list_tables(&self) -> Result<Vec<StoredTable>, StoreError> {
        let pool = self.pool.clone();

        let records = run_blocking(pool, move |conn| {
            tables::table
                .order((tables::created_at.desc(), tables::table_id.asc()))
                .load::<TableRecord>(conn)
        })
        .await?;
        Ok(records.into_iter().map(StoredTable::from).collect())
    }

    /// Tables extracted from one source file, in document order.
    pub async fn list_tables_by_source(
        &self,
        source_file: &str,
    ) -> Result<Vec<StoredTable>, StoreError> {
        let source_file = source_file.to_string();
        let pool = self.pool.clone();

        let records = run_blocking(pool, move |conn| {
            tables::table
                .filter(tables::source_file.eq(&source_file))
                .load::<TableRecord>(conn)
        })
        .await?;

        let mut tables: Vec<StoredTable> = records.into_iter().map(StoredTable::from).collect();
        tables.sort_by_key(|table| ordinal_key(&table.table_id));
        Ok(tables)
    }

    /// Tables whose given fields contain `term` (any field may match).
    pub async fn search(
        &self,
        term: &str,
        fields: &[SearchField],
    ) -> Result<Vec<StoredTable>, StoreError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = like_pattern(term);
        let fields = fields.to_vec();
        let pool = self.pool.clone();

        let records = run_blocking(pool, move |conn| {
            let mut query: tables::BoxedQuery<'_, diesel::sqlite::Sqlite> =
                tables::table.into_boxed();
            for field in fields {
                query = match field {
                    SearchField::TableId => {
                        query.or_filter(tables::table_id.like(pattern.clone()).escape('\\'))
                    }
                    SearchField::SourceFile => {
                        query.or_filter(tables::source_file.like(pattern.clone()).escape('\\'))
                    }
                    SearchField::Description => {
                        query.or_filter(tables::description.like(pattern.clone()).escape('\\'))
                    }
                };
            }
            query
                .order(tables::table_id.asc())
                .load::<TableRecord>(conn)
        })
        .await?;
        Ok(records.into_iter().map(StoredTable::from).collect())
    }

    /// Rows of a table ordered by row index.
    pub async fn get_rows(
        &self,
        table_id: &str,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let table_id = table_id.to_string();
        let pool = self.pool.clone();

        let records = run_blocking(pool, move |conn| {
            let mut query = table_data::table
                .filter(table_data::table_id.eq(&table_id))
                .order(table_data::row_index.asc())
                .offset(offset.max(0))
                .into_boxed();
            if let Some(limit) = limit {
                query = query.limit(limit.max(0));
            }
            query.load::<TableRowRecord>(conn)
        })
        .await?;
        Ok(records.into_iter().map(StoredRow::from).collect())
    }

    pub async fn count_rows(&self, table_id: &str) -> Result<u64, StoreError> {
        let table_id = table_id.to_string();
        let pool = self.pool.clone();

        let count: i64 = run_blocking(pool, move |conn| {
            table_data::table
                .filter(table_data::table_id.eq(&table_id))
                .select(count_star())
                .first(conn)
        })
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Aggregate counts across the store.
    pub async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let pool = self.pool.clone();

        let (total_tables, total_rows, total_sessions, unique_sources) =
            run_blocking(pool, move |conn| {
                let total_tables: i64 = tables::table.select(count_star()).first(conn)?;
                let total_rows: i64 = table_data::table.select(count_star()).first(conn)?;
                let total_sessions: i64 =
                    processing_sessions::table.select(count_star()).first(conn)?;
                let unique_sources = diesel::sql_query(
                    "SELECT COUNT(DISTINCT source_file) AS count FROM tables",
                )
                .get_result::<CountRow>(conn)?
                .count;
                Ok((total_tables, total_rows, total_sessions, unique_sources))
            })
            .await?;

        Ok(StoreSummary {
            total_tables: total_tables as u64,
            total_rows: total_rows as u64,
            total_sessions: total_sessions as u64,
            unique_sources: unique_sources as u64,
        })
    }

    /// Delete every table, row and session.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            conn.immediate_transaction::<_, DieselError, _>(|conn| {
                diesel::delete(table_data::table).execute(conn)?;
                diesel::delete(tables::table).execute(conn)?;
                diesel::delete(processing_sessions::table).execute(conn)?;
                Ok(())
            })
        })
        .await?;
        info!("Cleared table store");
        Ok(())
    }

    /// Start a processing session for a source file.
    pub async fn create_session(&self, source_file: &str) -> Result<ProcessingSession, StoreError> {
        let session_id = Uuid::new_v4().to_string();
        let source_file = source_file.to_string();
        let now = Utc::now().to_rfc3339();
        let pool = self.pool.clone();

        let record = run_blocking(pool, move |conn| {
            diesel::insert_into(processing_sessions::table)
                .values(&NewSession {
                    session_id: &session_id,
                    source_file: &source_file,
                    total_tables: 0,
                    successful_tables: 0,
                    created_at: &now,
                })
                .execute(conn)?;
            processing_sessions::table
                .find(&session_id)
                .first::<SessionRecord>(conn)
        })
        .await?;
        Ok(record.into())
    }

    /// Record the final counts of a session. Allowed exactly once.
    pub async fn finalize_session(
        &self,
        session_id: &str,
        total_tables: u64,
        successful_tables: u64,
    ) -> Result<ProcessingSession, StoreError> {
        let id = session_id.to_string();
        let now = Utc::now().to_rfc3339();
        let pool = self.pool.clone();

        let (updated, record) = run_blocking(pool, move |conn| {
            let updated = diesel::update(
                processing_sessions::table
                    .filter(processing_sessions::session_id.eq(&id))
                    .filter(processing_sessions::completed_at.is_null()),
            )
            .set((
                processing_sessions::total_tables.eq(total_tables as i64),
                processing_sessions::successful_tables.eq(successful_tables as i64),
                processing_sessions::completed_at.eq(&now),
            ))
            .execute(conn)?;
            let record = processing_sessions::table
                .find(&id)
                .first::<SessionRecord>(conn)
                .optional()?;
            Ok((updated, record))
        })
        .await?;

        match (updated, record) {
            (_, None) => Err(StoreError::SessionNotFound(session_id.to_string())),
            (0, Some(_)) => Err(StoreError::SessionFinalized(session_id.to_string())),
            (_, Some(record)) => Ok(record.into()),
        }
    }

    pub async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ProcessingSession>, StoreError> {
        let id = session_id.to_string();
        let pool = self.pool.clone();

        let record = run_blocking(pool, move |conn| {
            processing_sessions::table
                .find(&id)
                .first::<SessionRecord>(conn)
                .optional()
        })
        .await?;
        Ok(record.map(ProcessingSession::from))
    }

    /// Most recent sessions first.
    pub async fn list_sessions(&self, limit: i64) -> Result<Vec<ProcessingSession>, StoreError> {
        let pool = self.pool.clone();

        let records = run_blocking(pool, move |conn| {
            processing_sessions::table
                .order(processing_sessions::created_at.desc())
                .limit(limit.max(0))
                .load::<SessionRecord>(conn)
        })
        .await?;
        Ok(records.into_iter().map(ProcessingSession::from).collect())
    }

    /// Execute one SQL statement with positional parameters.
    ///
    /// A statement that runs but matches nothing returns an empty
    /// [`RawResult::Rows`]; syntax and runtime failures are errors.
    pub async fn execute_raw(&self, sql: &str, params: Vec<Value>) -> Result<RawResult, StoreError> {
        let sql = sql.to_string();
        let path = self.db_path.clone();

        let result = tokio::task::spawn_blocking(move || {
            let conn = raw::open(&path)?;
            raw::execute(&conn, &sql, &params)
        })
        .await??;
        Ok(result)
    }

    /// Check that a statement compiles and plans against the current schema
    /// without returning rows or applying changes.
    pub async fn dry_run(&self, sql: &str) -> Result<(), StoreError> {
        let sql = sql.to_string();
        let path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = raw::open(&path)?;
            raw::dry_run(&conn, &sql)
        })
        .await??;
        Ok(())
    }

    /// Copy the store to `destination` using the online backup API.
    pub async fn backup(&self, destination: &Path) -> Result<(), StoreError> {
        let source = self.db_path.clone();
        let target = destination.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let src = raw::open(&source)?;
            let mut dst = rusqlite::Connection::open(&target)?;
            raw::backup(&src, &mut dst)
        })
        .await??;
        info!("Backed up table store to {}", destination.display());
        Ok(())
    }

    /// Replace the store contents with those of a backup file.
    pub async fn restore(&self, backup_file: &Path) -> Result<(), StoreError> {
        if !backup_file.exists() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("backup file not found: {}", backup_file.display()),
            )));
        }
        let source = backup_file.to_path_buf();
        let target = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let src = rusqlite::Connection::open(&source)?;
            let mut dst = raw::open(&target)?;
            raw::backup(&src, &mut dst)
        })
        .await??;
        info!("Restored table store from {}", backup_file.display());
        Ok(())
    }
}

fn serialize_rows(rows: &[RowData]) -> Result<Vec<String>, serde_json::Error> {
    rows.iter().map(serde_json::to_string).collect()
}

/// Insert rows with contiguous indices starting at 0. Returns the row count.
fn insert_rows(
    conn: &mut SqliteConnection,
    table_id: &str,
    rows: Vec<String>,
) -> Result<usize, DieselError> {
    let count = rows.len();
    let records: Vec<NewTableRow> = rows
        .into_iter()
        .enumerate()
        .map(|(index, row_data)| NewTableRow {
            table_id,
            row_index: index as i64,
            row_data,
        })
        .collect();

    for batch in records.chunks(INSERT_BATCH) {
        diesel::insert_into(table_data::table)
            .values(batch)
            .execute(conn)?;
    }
    Ok(count)
}

/// Sort key placing `stem_table_10` after `stem_table_9`.
fn ordinal_key(table_id: &str) -> (String, u64) {
    match table_id.rsplit_once("_table_") {
        Some((stem, n)) => match n.parse::<u64>() {
            Ok(n) => (stem.to_string(), n),
            Err(_) => (table_id.to_string(), 0),
        },
        None => (table_id.to_string(), 0),
    }
}

/// `LIKE` pattern matching `term` anywhere, with wildcards in `term`
/// escaped by `\`.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn setup_test_db() -> (TableStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::open(&dir.path().join("tables.db")).await.unwrap();
        (store, dir)
    }

    fn orders_schema(table_id: &str, totals: &[f64]) -> TableSchema {
        let rows: Vec<RowData> = totals
            .iter()
            .enumerate()
            .map(|(i, total)| {
                let mut row = RowData::new();
                row.insert("id".into(), json!(i + 1));
                row.insert("total".into(), json!(total));
                row
            })
            .collect();
        let mut column_types = BTreeMap::new();
        column_types.insert("id".to_string(), ColumnType::Integer);
        column_types.insert("total".to_string(), ColumnType::Float);

        TableSchema {
            table_id: table_id.to_string(),
            label: None,
            columns: vec!["id".into(), "total".into()],
            column_types,
            row_count: rows.len(),
            sample_rows: rows.clone(),
            flattened: false,
            success: true,
            error: None,
            rows,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (store, _dir) = setup_test_db().await;
        let schema = orders_schema("orders_table_1", &[10.0, 20.5]);

        store
            .upsert_table(&schema, Some("Customer orders"), "orders.html", None)
            .await
            .unwrap();

        let table = store.get_table("orders_table_1").await.unwrap().unwrap();
        assert_eq!(table.row_count, 2);
        assert_eq!(table.column_count, 2);
        assert_eq!(table.column_names, vec!["id", "total"]);
        assert_eq!(table.column_types["total"], ColumnType::Float);
        assert_eq!(table.description.as_deref(), Some("Customer orders"));
        assert!(store.table_exists("orders_table_1").await.unwrap());
        assert!(!store.table_exists("missing").await.unwrap());
        assert!(store.get_table("missing").await.unwrap().is_none());

        let rows = store.get_rows("orders_table_1", None, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].row_index, 1);
        assert_eq!(rows[1].row_data["total"], json!(20.5));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (store, _dir) = setup_test_db().await;
        let schema = orders_schema("orders_table_1", &[1.0, 2.0, 3.0]);

        store.upsert_table(&schema, None, "orders.html", None).await.unwrap();
        let first = store.get_rows("orders_table_1", None, 0).await.unwrap();
        store.upsert_table(&schema, None, "orders.html", None).await.unwrap();
        let second = store.get_rows("orders_table_1", None, 0).await.unwrap();

        assert_eq!(store.list_tables().await.unwrap().len(), 1);
        assert_eq!(store.get_table("orders_table_1").await.unwrap().unwrap().row_count, 3);
        let first: Vec<_> = first.into_iter().map(|r| (r.row_index, r.row_data)).collect();
        let second: Vec<_> = second.into_iter().map(|r| (r.row_index, r.row_data)).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reprocessing_replaces_stale_rows() {
        let (store, _dir) = setup_test_db().await;
        store
            .upsert_table(&orders_schema("t_table_1", &[1.0, 2.0, 3.0]), None, "t.html", None)
            .await
            .unwrap();
        store
            .upsert_table(&orders_schema("t_table_1", &[9.0]), None, "t.html", None)
            .await
            .unwrap();

        assert_eq!(store.count_rows("t_table_1").await.unwrap(), 1);
        let rows = store.get_rows("t_table_1", None, 0).await.unwrap();
        assert_eq!(rows[0].row_index, 0);
        assert_eq!(rows[0].row_data["total"], json!(9.0));
    }

    #[tokio::test]
    async fn test_store_rows_requires_table() {
        let (store, _dir) = setup_test_db().await;
        assert!(store.store_rows("nope", &[]).await.is_err());

        store
            .upsert_table(&orders_schema("a_table_1", &[1.0]), None, "a.html", None)
            .await
            .unwrap();
        let replacement = orders_schema("a_table_1", &[4.0, 5.0]).rows;
        store.store_rows("a_table_1", &replacement).await.unwrap();
        assert_eq!(store.get_table("a_table_1").await.unwrap().unwrap().row_count, 2);
        assert_eq!(store.get_rows("a_table_1", Some(1), 1).await.unwrap()[0].row_index, 1);
    }

    #[tokio::test]
    async fn test_list_by_source_and_search() {
        let (store, _dir) = setup_test_db().await;
        for n in [1, 2, 10] {
            let id = format!("sales_table_{n}");
            store
                .upsert_table(&orders_schema(&id, &[1.0]), Some("regional sales"), "sales.xlsx", None)
                .await
                .unwrap();
        }
        store
            .upsert_table(&orders_schema("hr_table_1", &[1.0]), Some("headcount"), "hr.html", None)
            .await
            .unwrap();

        let sales = store.list_tables_by_source("sales.xlsx").await.unwrap();
        let ids: Vec<_> = sales.iter().map(|t| t.table_id.as_str()).collect();
        assert_eq!(ids, vec!["sales_table_1", "sales_table_2", "sales_table_10"]);

        let found = store.search("headcount", &SearchField::ALL).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].table_id, "hr_table_1");

        let by_source = store.search("xlsx", &[SearchField::SourceFile]).await.unwrap();
        assert_eq!(by_source.len(), 3);
        assert!(store.search("xlsx", &[SearchField::Description]).await.unwrap().is_empty());
        assert!(store.search("sales", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let (store, _dir) = setup_test_db().await;
        for (id, description) in [
            ("a_table_1", "100% of orders"),
            ("a_table_2", "1000 orders"),
            ("a_table_3", "net_total per day"),
            ("a_table_4", "netxtotal per day"),
        ] {
            store
                .upsert_table(&orders_schema(id, &[1.0]), Some(description), "a.html", None)
                .await
                .unwrap();
        }

        let found = store.search("100%", &[SearchField::Description]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].table_id, "a_table_1");

        let found = store.search("net_total", &[SearchField::Description]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].table_id, "a_table_3");

        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }

    #[tokio::test]
    async fn test_failed_upsert_keeps_previous_table() {
        let (store, _dir) = setup_test_db().await;
        store
            .upsert_table(&orders_schema("orders_table_1", &[1.0, 2.0]), Some("first"), "orders.html", None)
            .await
            .unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER reject_rows BEFORE INSERT ON table_data \
                 BEGIN SELECT RAISE(ABORT, 'rows rejected'); END",
                Vec::new(),
            )
            .await
            .unwrap();

        let result = store
            .upsert_table(
                &orders_schema("orders_table_1", &[5.0, 6.0, 7.0]),
                Some("second"),
                "orders.html",
                None,
            )
            .await;
        assert!(result.is_err());

        let table = store.get_table("orders_table_1").await.unwrap().unwrap();
        assert_eq!(table.description.as_deref(), Some("first"));
        assert_eq!(table.row_count, 2);
        let rows = store.get_rows("orders_table_1", None, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].row_data["total"], json!(2.0));
    }

    #[tokio::test]
    async fn test_sessions_finalize_once() {
        let (store, _dir) = setup_test_db().await;
        let session = store.create_session("report.html").await.unwrap();
        assert!(!session.is_finalized());

        let done = store.finalize_session(&session.session_id, 3, 2).await.unwrap();
        assert_eq!(done.total_tables, 3);
        assert_eq!(done.successful_tables, 2);
        assert!(done.is_finalized());

        let again = store.finalize_session(&session.session_id, 5, 5).await;
        assert!(matches!(again, Err(StoreError::SessionFinalized(_))));
        let missing = store.finalize_session("nope", 1, 1).await;
        assert!(matches!(missing, Err(StoreError::SessionNotFound(_))));

        let stored = store.get_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.total_tables, 3);
        assert_eq!(store.list_sessions(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_and_clear() {
        let (store, _dir) = setup_test_db().await;
        store
            .upsert_table(&orders_schema("a_table_1", &[1.0, 2.0]), None, "a.html", None)
            .await
            .unwrap();
        store
            .upsert_table(&orders_schema("a_table_2", &[1.0]), None, "a.html", None)
            .await
            .unwrap();
        store
            .upsert_table(&orders_schema("b_table_1", &[1.0]), None, "b.html", None)
            .await
            .unwrap();
        store.create_session("a.html").await.unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(
            summary,
            StoreSummary {
                total_tables: 3,
                total_rows: 4,
                total_sessions: 1,
                unique_sources: 2,
            }
        );

        store.clear().await.unwrap();
        assert_eq!(store.summary().await.unwrap(), StoreSummary::default());
    }

    #[tokio::test]
    async fn test_execute_raw_over_json_rows() {
        let (store, _dir) = setup_test_db().await;
        store
            .upsert_table(&orders_schema("orders_table_1", &[10.0, 20.5]), None, "o.html", None)
            .await
            .unwrap();

        let result = store
            .execute_raw(
                "SELECT SUM(CAST(json_extract(row_data, '$.total') AS REAL)) AS total \
                 FROM table_data WHERE table_id = ?",
                vec![json!("orders_table_1")],
            )
            .await
            .unwrap();
        match result {
            RawResult::Rows { rows, .. } => assert_eq!(rows[0]["total"], json!(30.5)),
            other => panic!("expected rows, got {:?}", other),
        }

        let empty = store
            .execute_raw("SELECT * FROM tables WHERE table_id = 'none'", vec![])
            .await
            .unwrap();
        assert_eq!(empty.row_count(), 0);
        assert!(store.execute_raw("SELEC 1", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_dry_run_against_live_schema() {
        let (store, _dir) = setup_test_db().await;
        store.dry_run("SELECT table_id FROM tables;").await.unwrap();
        store.dry_run("DELETE FROM table_data WHERE table_id = 'x'").await.unwrap();
        assert!(store.dry_run("SELECT nope FROM tables").await.is_err());
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let (store, dir) = setup_test_db().await;
        store
            .upsert_table(&orders_schema("keep_table_1", &[1.0]), None, "keep.html", None)
            .await
            .unwrap();

        let backup_path = dir.path().join("backup.db");
        store.backup(&backup_path).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.list_tables().await.unwrap().is_empty());

        store.restore(&backup_path).await.unwrap();
        let tables = store.list_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_id, "keep_table_1");

        assert!(store.restore(&dir.path().join("missing.db")).await.is_err());
    }

    #[test]
    fn test_ordinal_key() {
        assert!(ordinal_key("s_table_2") < ordinal_key("s_table_10"));
        assert_eq!(ordinal_key("plain"), ("plain".to_string(), 0));
    }
}
