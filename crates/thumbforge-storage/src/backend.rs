//! Backing-store factory.
//!
//! Both drivers are `object_store` implementations: `LocalFileSystem` for a
//! directory of originals and `AmazonS3` for AWS or any S3-compatible
//! endpoint. The local driver rejects path traversal by construction
//! (`object_store` paths cannot escape the prefix).

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;

use crate::config::{Driver, StorageConfig};
use crate::error::ConfigError;

pub fn build_backend(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    match config.driver {
        Driver::Local => {
            let root = config
                .root
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("root is required for local driver".into()))?;
            std::fs::create_dir_all(root)?;
            tracing::info!(root, "Initializing local storage");
            let store = LocalFileSystem::new_with_prefix(root)
                .map_err(|e| ConfigError::Invalid(format!("local storage root: {e}")))?;
            Ok(Arc::new(store))
        }
        Driver::S3 => {
            let bucket = config
                .bucket
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("bucket is required for s3 driver".into()))?;
            let region = config.region.as_deref().unwrap_or("us-east-1");

            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region);

            if let (Some(access_key), Some(secret_key)) =
                (config.access_key.as_deref(), config.secret_key.as_deref())
            {
                builder = builder
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key);
            }

            if let Some(base_url) = config.base_url.as_deref() {
                // S3-compatible endpoints need explicit credentials.
                if config.access_key.is_none() || config.secret_key.is_none() {
                    return Err(ConfigError::Invalid(
                        "access_key and secret_key are required when using base_url for S3-compatible storage".into(),
                    ));
                }
                tracing::info!(endpoint = base_url, bucket, region, "Initializing S3-compatible storage");
                builder = builder
                    .with_endpoint(base_url)
                    .with_allow_http(true)
                    .with_virtual_hosted_style_request(false);
            } else {
                tracing::info!(bucket, region, "Initializing AWS S3 storage");
            }

            let store = builder
                .build()
                .map_err(|e| ConfigError::Invalid(format!("s3 client: {e}")))?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_requires_root() {
        let config = StorageConfig {
            driver: Driver::Local,
            cache: None,
            signature_secret: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            base_url: None,
            root: None,
        };
        assert!(matches!(build_backend(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = StorageConfig {
            driver: Driver::S3,
            cache: None,
            signature_secret: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            base_url: None,
            root: None,
        };
        assert!(matches!(build_backend(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_s3_compatible_requires_credentials() {
        let config = StorageConfig {
            driver: Driver::S3,
            cache: None,
            signature_secret: None,
            bucket: Some("imgs".into()),
            region: None,
            access_key: None,
            secret_key: None,
            base_url: Some("http://localhost:9000".into()),
            root: None,
        };
        assert!(matches!(build_backend(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_local_backend_builds() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            driver: Driver::Local,
            cache: None,
            signature_secret: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            base_url: None,
            root: Some(dir.path().to_str().unwrap().to_string()),
        };
        assert!(build_backend(&config).is_ok());
    }
}
