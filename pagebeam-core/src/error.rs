//! Error types for pagebeam-core

use thiserror::Error;

/// Main error type for the pagebeam-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Event delivery error
    #[error("delivery error: {0}")]
    Delivery(String),
}

/// Result type alias for pagebeam-core
pub type Result<T> = std::result::Result<T, Error>;
