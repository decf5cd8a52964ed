//! Error types for the graph layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Could not connect to store at {target}: {reason}")]
    Connection { target: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dangling reference: {0}")]
    Reference(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Refusing destructive operation: {0}")]
    DestructiveOpGuard(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] sled::Error),

    #[error("Document encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<rmp_serde::encode::Error> for GraphError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        GraphError::Encoding(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for GraphError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        GraphError::Encoding(e.to_string())
    }
}
