//! Storage layer for the thumbforge thumbnail service.
//!
//! The backing store is any `object_store` implementation selected by a
//! driver tag (local filesystem or S3-compatible bucket). [`CachedStorage`]
//! wraps it with two independent tiered caches (one for source images and
//! one for finished thumbnails) plus per-tier async writer pools for the
//! disk layers.

pub mod backend;
pub mod cached;
pub mod config;
pub mod error;
pub mod writer;

pub use backend::build_backend;
pub use cached::CachedStorage;
pub use config::{CacheSection, Driver, StorageConfig};
pub use error::{ConfigError, Result, StorageError};
pub use writer::{CacheWriter, WriterConfig};
