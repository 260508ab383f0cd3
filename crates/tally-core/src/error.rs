//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("AI provider timed out after {0:?}")]
    AiTimeout(std::time::Duration),

    #[error("AI provider unavailable: {0}")]
    AiUnavailable(String),

    #[error("Job error: {0}")]
    Job(String),
}

impl Error {
    /// Storage-layer failures the caller may retry (locked db, pool exhaustion, ...)
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Pool(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
