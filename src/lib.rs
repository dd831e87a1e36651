//! Table extraction, storage and natural-language SQL over documents.
//!
//! Documents (HTML pages and spreadsheet workbooks) are split into tables
//! and prose. Each table is normalized into a typed schema, described,
//! and stored in SQLite; the document is rebuilt with every table replaced
//! by its description. Questions about the stored tables are answered with
//! SQL statements that have been validated against the store.

pub mod chat;
pub mod config;
pub mod context;
pub mod extractors;
pub mod llm;
pub mod models;
pub mod reconstruct;
pub mod repository;
pub mod schema;
pub mod schema_processor;
pub mod services;

pub use chat::{SqlOutcome, TableChat};
pub use config::Settings;
pub use context::AppContext;
pub use repository::TableStore;
