//! Two-layer cache composition: memory in front of disk.
//!
//! Both layers are optional but at least one must be present. A disk hit is
//! promoted into the memory layer so the next lookup for the same key stays
//! off the filesystem.

use std::sync::Arc;

use bytes::Bytes;

use crate::disk::DiskCache;
use crate::memory::MemoryCache;

pub struct TieredCache {
    name: &'static str,
    memory: Option<Arc<MemoryCache>>,
    disk: Option<Arc<DiskCache>>,
}

impl TieredCache {
    /// Compose a tier from its layers. Panics if neither layer is present;
    /// the storage factory only builds tiers that have at least one.
    pub fn new(
        name: &'static str,
        memory: Option<Arc<MemoryCache>>,
        disk: Option<Arc<DiskCache>>,
    ) -> Self {
        assert!(
            memory.is_some() || disk.is_some(),
            "tiered cache requires at least one layer"
        );
        Self { name, memory, disk }
    }

    pub fn disk(&self) -> Option<&Arc<DiskCache>> {
        self.disk.as_ref()
    }

    /// Memory first, then disk; promote disk hits into memory.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(memory) = &self.memory {
            if let Some(data) = memory.get(key).await {
                tracing::debug!(tier = self.name, key = %key, "Memory cache hit");
                return Some(data);
            }
        }
        if let Some(disk) = &self.disk {
            if let Some(data) = disk.get(key).await {
                tracing::debug!(tier = self.name, key = %key, "Disk cache hit");
                if let Some(memory) = &self.memory {
                    memory.set(key.to_string(), data.clone()).await;
                }
                return Some(data);
            }
        }
        None
    }

    /// Write the memory layer only. Disk writes go through the async writer
    /// pools owned by the storage layer.
    pub async fn set_memory(&self, key: String, data: Bytes) {
        if let Some(memory) = &self.memory {
            memory.set(key, data).await;
        }
    }

    pub async fn clear(&self) {
        if let Some(memory) = &self.memory {
            memory.clear().await;
        }
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.clear().await {
                tracing::warn!(tier = self.name, error = %err, "Disk cache clear failed");
            }
        }
    }

    /// Drain pending memory writes and stop the disk cache background
    /// tasks.
    pub async fn close(&self) {
        if let Some(memory) = &self.memory {
            memory.close().await;
        }
        if let Some(disk) = &self.disk {
            disk.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskCacheConfig;
    use crate::memory::MemoryCacheConfig;
    use std::time::Duration;

    async fn disk(dir: &std::path::Path) -> Arc<DiskCache> {
        DiskCache::open(DiskCacheConfig {
            name: "test",
            base_dir: dir.to_path_buf(),
            ttl: Duration::from_secs(60),
            max_size_bytes: 0,
            max_items: 0,
            clear_on_startup: false,
        })
        .await
        .unwrap()
    }

    fn memory() -> Arc<MemoryCache> {
        Arc::new(MemoryCache::new(MemoryCacheConfig {
            name: "test",
            max_size_bytes: 1024 * 1024,
            max_items: 0,
            ttl: Duration::from_secs(60),
        }))
    }

    #[tokio::test]
    async fn test_disk_hit_promotes_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let memory = memory();
        let disk = disk(dir.path()).await;
        disk.set("k", b"payload").await.unwrap();

        let tier = TieredCache::new("test", Some(Arc::clone(&memory)), Some(disk));
        assert_eq!(tier.get("k").await.unwrap(), Bytes::from_static(b"payload"));
        // Promotion: now visible in the memory layer directly.
        assert_eq!(memory.get("k").await.unwrap(), Bytes::from_static(b"payload"));
        tier.close().await;
    }

    #[tokio::test]
    async fn test_memory_only_tier() {
        let tier = TieredCache::new("test", Some(memory()), None);
        tier.set_memory("k".to_string(), Bytes::from_static(b"v")).await;
        assert!(tier.get("k").await.is_some());
        assert!(tier.get("other").await.is_none());
        tier.close().await;
    }

    #[test]
    #[should_panic]
    fn test_empty_tier_panics() {
        TieredCache::new("test", None, None);
    }
}
