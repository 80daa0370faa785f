//! Telemetry Archive
//!
//! SQLite archiver for sessions, readings and alerts, plus export and
//! import of reading records as CSV, JSON or postcard.

mod export;
mod sqlite;

pub use export::{export, export_to_vec, import, ExportFormat, ExportRecord};
pub use sqlite::SqliteArchive;

use thiserror::Error;

/// Archive errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Postcard error: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Corrupt archive data: {0}")]
    Corrupt(String),
}
