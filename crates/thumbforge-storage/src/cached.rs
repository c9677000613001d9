//! Cached storage facade.
//!
//! Wraps the backing store with two independent tiered caches:
//!
//! - the **sources** tier, keyed `source:{source_key}`, populated by
//!   [`CachedStorage::fetch`]
//! - the **thumbnails** tier, keyed `thumb:{url_path}`, populated by the
//!   request executor
//!
//! Memory writes are synchronous (the next same-key lookup must hit); disk
//! writes for both tiers go through per-tier async writer pools. Cache
//! failures are logged and never fail a request.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::ObjectStore;

use thumbforge_cache::{
    DiskCache, DiskCacheConfig, DiskCacheStats, MemoryCache, MemoryCacheConfig, TieredCache,
};

use crate::config::{CacheSection, TierOptions, DEFAULT_TTL_SECONDS};
use crate::error::{ConfigError, Result, StorageError};
use crate::writer::{CacheWriter, WriterConfig};

struct Tier {
    cache: TieredCache,
    writer: Option<CacheWriter>,
}

pub struct CachedStorage {
    backend: Arc<dyn ObjectStore>,
    sources: Option<Tier>,
    thumbs: Option<Tier>,
}

impl CachedStorage {
    /// Assemble the cache stack described by the config section. A missing
    /// or fully disabled section leaves that role uncached.
    pub async fn from_config(
        backend: Arc<dyn ObjectStore>,
        cache: Option<&CacheSection>,
    ) -> std::result::Result<Self, ConfigError> {
        let (sources, thumbs) = match cache {
            Some(section) => (
                build_tier("sources", section.sources.as_ref()).await?,
                build_tier("thumbnails", section.thumbnails.as_ref()).await?,
            ),
            None => (None, None),
        };

        if sources.is_none() && thumbs.is_none() {
            tracing::info!("No cache enabled");
        }

        Ok(Self {
            backend,
            sources,
            thumbs,
        })
    }

    /// Uncached storage, used by tests and cache-disabled deployments.
    pub fn uncached(backend: Arc<dyn ObjectStore>) -> Self {
        Self {
            backend,
            sources: None,
            thumbs: None,
        }
    }

    pub fn sources_enabled(&self) -> bool {
        self.sources.is_some()
    }

    pub fn thumbs_enabled(&self) -> bool {
        self.thumbs.is_some()
    }

    /// Fetch a source object through the sources tier: memory, then disk,
    /// then the backing store. A backend hit backfills memory synchronously
    /// and enqueues the disk write.
    pub async fn fetch(&self, key: &str) -> Result<Bytes> {
        let Some(tier) = &self.sources else {
            return self.fetch_backend(key).await;
        };

        let cache_key = format!("source:{key}");
        if let Some(data) = tier.cache.get(&cache_key).await {
            tracing::debug!(key, "Source cache hit");
            return Ok(data);
        }

        tracing::debug!(key, "Source cache miss, fetching from backing store");
        let data = self.fetch_backend(key).await?;

        tier.cache.set_memory(cache_key.clone(), data.clone()).await;
        if let Some(writer) = &tier.writer {
            writer.enqueue(cache_key, data.clone());
        }
        Ok(data)
    }

    async fn fetch_backend(&self, key: &str) -> Result<Bytes> {
        let path = object_store::path::Path::from(key);
        let result = match self.backend.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let data = result.bytes().await?;
        tracing::debug!(key, size = data.len(), "Fetched object from backing store");
        Ok(data)
    }

    /// Look up a cached thumbnail by its raw URL path.
    pub async fn get_thumbnail(&self, url_path: &str) -> Option<Bytes> {
        let tier = self.thumbs.as_ref()?;
        tier.cache.get(&thumb_key(url_path)).await
    }

    /// Memory-only write: after this returns, a same-key lookup hits.
    pub async fn set_thumbnail_sync(&self, url_path: &str, data: Bytes) {
        if let Some(tier) = &self.thumbs {
            tier.cache.set_memory(thumb_key(url_path), data).await;
        }
    }

    /// Queue the disk write for a thumbnail; best-effort, drop-on-full.
    pub fn set_thumbnail_async(&self, url_path: &str, data: Bytes) {
        if let Some(tier) = &self.thumbs {
            if let Some(writer) = &tier.writer {
                writer.enqueue(thumb_key(url_path), data);
            }
        }
    }

    /// Disk stats for the thumbnails tier, used by tests.
    pub fn thumb_disk_stats(&self) -> Option<DiskCacheStats> {
        self.thumbs
            .as_ref()
            .and_then(|t| t.cache.disk())
            .map(|d| d.stats())
    }

    pub async fn clear(&self) {
        if let Some(tier) = &self.sources {
            tier.cache.clear().await;
        }
        if let Some(tier) = &self.thumbs {
            tier.cache.clear().await;
        }
    }

    /// Shutdown order: drain writer queues first so no queued write races a
    /// closing disk cache, then close the tiers.
    pub async fn close(&self) {
        for tier in [&self.sources, &self.thumbs].into_iter().flatten() {
            if let Some(writer) = &tier.writer {
                writer.shutdown().await;
            }
        }
        for tier in [&self.sources, &self.thumbs].into_iter().flatten() {
            tier.cache.close().await;
        }
        tracing::info!("Cached storage closed");
    }
}

fn thumb_key(url_path: &str) -> String {
    format!("thumb:{url_path}")
}

async fn build_tier(
    name: &'static str,
    options: Option<&TierOptions>,
) -> std::result::Result<Option<Tier>, ConfigError> {
    let Some(options) = options else {
        return Ok(None);
    };

    let memory_enabled = options
        .memory
        .as_ref()
        .is_some_and(|m| m.enabled == Some(true));
    let disk_enabled = options
        .disk
        .as_ref()
        .is_some_and(|d| d.enabled == Some(true));

    if !memory_enabled && !disk_enabled {
        return Ok(None);
    }

    let memory = if memory_enabled {
        let opts = options.memory.as_ref().expect("memory options present");
        let ttl_seconds = if opts.ttl_seconds > 0 {
            opts.ttl_seconds
        } else {
            DEFAULT_TTL_SECONDS
        };
        Some(Arc::new(MemoryCache::new(MemoryCacheConfig {
            name,
            max_size_bytes: opts.max_size_mb * 1024 * 1024,
            max_items: opts.max_items,
            ttl: Duration::from_secs(ttl_seconds),
        })))
    } else {
        None
    };

    let disk = if disk_enabled {
        let opts = options.disk.as_ref().expect("disk options present");
        let dir = opts.dir.as_deref().ok_or_else(|| {
            ConfigError::Invalid(format!("cache dir is required when {name} disk cache is enabled"))
        })?;
        let ttl_seconds = if opts.ttl_seconds > 0 {
            opts.ttl_seconds
        } else {
            DEFAULT_TTL_SECONDS
        };
        let cache = DiskCache::open(DiskCacheConfig {
            name,
            base_dir: dir.into(),
            ttl: Duration::from_secs(ttl_seconds),
            max_size_bytes: opts.max_size_mb * 1024 * 1024,
            max_items: opts.max_items,
            clear_on_startup: opts.clear_on_startup.unwrap_or(false),
        })
        .await
        .map_err(|e| ConfigError::Invalid(format!("{name} disk cache: {e}")))?;
        Some(cache)
    } else {
        None
    };

    // The writer pool exists whenever a disk layer does, unless explicitly
    // disabled. Without it disk writes for this tier simply never happen.
    let writer = match &disk {
        Some(disk) if options.writer.as_ref().map_or(true, |w| w.enabled != Some(false)) => {
            let opts = options.writer.clone().unwrap_or_default();
            Some(CacheWriter::new(
                name,
                Arc::clone(disk),
                WriterConfig {
                    workers: opts.workers,
                    queue_size: opts.queue_size,
                },
            ))
        }
        _ => None,
    };

    Ok(Some(Tier {
        cache: TieredCache::new(name, memory, disk),
        writer,
    }))
}
