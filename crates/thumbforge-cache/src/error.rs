//! Cache error type.
//!
//! Cache failures are warnings, never request failures: callers log a
//! `CacheError` and continue as if the cache were absent. Reads that fail
//! are reported as misses rather than errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache is closed")]
    Closed,
}
