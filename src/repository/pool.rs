//! Diesel connection pool management for SQLite.
//!
//! Diesel's SQLite connection is synchronous, so operations run on the
//! blocking thread pool through [`run_blocking`].

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use std::path::Path;
use std::time::Duration;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// r2d2 pool error type alias.
pub type R2D2Error = diesel::r2d2::PoolError;

/// Connection pool for SQLite using r2d2.
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Idempotent schema for the three store tables.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tables (
    table_id TEXT PRIMARY KEY NOT NULL,
    source_file TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    column_count INTEGER NOT NULL,
    column_names TEXT NOT NULL,
    column_types TEXT NOT NULL,
    description TEXT,
    session_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS table_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_id TEXT NOT NULL REFERENCES tables(table_id),
    row_index INTEGER NOT NULL,
    row_data TEXT NOT NULL,
    UNIQUE (table_id, row_index)
);

CREATE TABLE IF NOT EXISTS processing_sessions (
    session_id TEXT PRIMARY KEY NOT NULL,
    source_file TEXT NOT NULL,
    total_tables INTEGER NOT NULL DEFAULT 0,
    successful_tables INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_tables_source_file ON tables(source_file);
CREATE INDEX IF NOT EXISTS idx_table_data_table_id ON table_data(table_id);
"#;

/// Applies per-connection pragmas when r2d2 opens a connection.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        init_connection_pragmas(conn, self.busy_timeout).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a Diesel connection pool for a database file.
pub fn create_pool(db_path: &Path) -> Result<SqlitePool, R2D2Error> {
    create_pool_from_url(&db_path.display().to_string())
}

/// Create a Diesel connection pool from a database URL.
pub fn create_pool_from_url(database_url: &str) -> Result<SqlitePool, R2D2Error> {
    // Diesel wants a bare path
    let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

    let manager = ConnectionManager::<SqliteConnection>::new(url);

    Pool::builder()
        .max_size(8)
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout: Duration::from_secs(5),
        }))
        .build(manager)
}

/// Initialize SQLite pragmas for a connection.
pub fn init_connection_pragmas(
    conn: &mut SqliteConnection,
    busy_timeout: Duration,
) -> Result<(), DieselError> {
    conn.batch_execute(&format!(
        "PRAGMA busy_timeout = {};
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
        busy_timeout.as_millis()
    ))
}

/// Create the store tables if they do not exist yet.
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), DieselError> {
    conn.batch_execute(SCHEMA_SQL)
}

/// Run a blocking Diesel operation asynchronously.
///
/// # Example
/// ```ignore
/// let table = run_blocking(pool.clone(), move |conn| {
///     tables::table.find(&id).first::<TableRecord>(conn).optional()
/// }).await?;
/// ```
pub async fn run_blocking<F, T>(pool: SqlitePool, f: F) -> Result<T, DieselError>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, DieselError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| {
            DieselError::DatabaseError(
                diesel::result::DatabaseErrorKind::Unknown,
                Box::new(e.to_string()),
            )
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| {
        DieselError::DatabaseError(
            diesel::result::DatabaseErrorKind::Unknown,
            Box::new(e.to_string()),
        )
    })?
}
