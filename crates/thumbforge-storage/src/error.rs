//! Storage error types.
//!
//! `NotFound` surfaces as HTTP 404; any other backend failure is transient
//! from the service's point of view and surfaces as HTTP 500 (retrying is
//! the client's job). Cache failures never appear here: they are logged
//! inside the cache layers and the request proceeds as if uncached.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("backing store error: {0}")]
    Backend(#[from] object_store::Error),
}

/// Configuration problems are fatal at startup and never occur afterwards.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
