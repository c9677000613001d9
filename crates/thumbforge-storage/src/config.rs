//! Storage and cache configuration.
//!
//! Loaded from a JSON file named by `STORAGE_CONFIG_PATH`. The backing
//! store is selected by a driver tag; the two cache roles (sources and
//! thumbnails) are configured independently, each with optional memory,
//! disk and async-writer sections.
//!
//! ```json
//! {
//!   "driver": "local",
//!   "root": "./data/images",
//!   "cache": {
//!     "sources": {
//!       "memory": { "enabled": true, "max_size_mb": 256, "ttl_seconds": 300 },
//!       "disk": { "enabled": true, "dir": "./data/cache/sources", "ttl_seconds": 3600, "max_size_mb": 2048 }
//!     },
//!     "thumbnails": {
//!       "memory": { "enabled": true, "max_size_mb": 128, "ttl_seconds": 300 },
//!       "disk": { "enabled": true, "dir": "./data/cache/thumbs", "ttl_seconds": 86400, "max_size_mb": 4096 },
//!       "writer": { "workers": 4, "queue_size": 1000 }
//!     }
//!   }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_TTL_SECONDS: u64 = 300;
pub const DEFAULT_WRITER_WORKERS: usize = 4;
pub const DEFAULT_WRITER_QUEUE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    S3,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub driver: Driver,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSection>,

    /// HMAC secret; the `SIGNATURE_SECRET` environment variable takes
    /// precedence over this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_secret: Option<String>,

    // S3 driver fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// Custom endpoint for S3-compatible storage (MinIO and friends).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    // Local driver fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl StorageConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Per-role cache configuration. Sources and thumbnails are fully
/// independent tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<TierOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnails: Option<TierOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<WriterOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryOptions {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub max_size_mb: u64,
    #[serde(default)]
    pub max_items: u64,
    #[serde(default)]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskOptions {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub ttl_seconds: u64,
    /// Maximum disk usage in MB; `0` means unlimited.
    #[serde(default)]
    pub max_size_mb: u64,
    #[serde(default)]
    pub max_items: usize,
    #[serde(default)]
    pub clear_on_startup: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterOptions {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub queue_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_local_config() {
        let cfg: StorageConfig =
            serde_json::from_str(r#"{ "driver": "local", "root": "/data" }"#).unwrap();
        assert_eq!(cfg.driver, Driver::Local);
        assert_eq!(cfg.root.as_deref(), Some("/data"));
        assert!(cfg.cache.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let cfg: StorageConfig = serde_json::from_str(
            r#"{
                "driver": "s3",
                "bucket": "imgs",
                "region": "eu-west-1",
                "access_key": "ak",
                "secret_key": "sk",
                "base_url": "http://localhost:9000",
                "cache": {
                    "thumbnails": {
                        "memory": { "enabled": true, "max_size_mb": 64, "ttl_seconds": 120 },
                        "disk": { "enabled": true, "dir": "/tmp/t", "ttl_seconds": 600, "max_size_mb": 100 },
                        "writer": { "workers": 2, "queue_size": 50 }
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.driver, Driver::S3);
        let thumbs = cfg.cache.unwrap().thumbnails.unwrap();
        assert_eq!(thumbs.memory.unwrap().max_size_mb, 64);
        assert_eq!(thumbs.disk.unwrap().ttl_seconds, 600);
        assert_eq!(thumbs.writer.unwrap().workers, 2);
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let result: Result<StorageConfig, _> =
            serde_json::from_str(r#"{ "driver": "ftp" }"#);
        assert!(result.is_err());
    }
}
