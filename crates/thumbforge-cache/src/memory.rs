//! In-memory cache layer.
//!
//! A thin wrapper over `moka::future::Cache` with a byte-cost weigher so the
//! capacity bound tracks actual memory, not entry counts. TTL is fixed per
//! cache instance (one instance per tier, each tier has one TTL). Admission
//! may reject: an entry larger than the whole capacity is never stored, and
//! callers must not rely on `set` succeeding.

use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache;

/// Configuration for one memory cache instance.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Name used in log lines (`sources`, `thumbnails`).
    pub name: &'static str,
    /// Maximum total byte cost. `0` disables the byte bound.
    pub max_size_bytes: u64,
    /// Maximum entry count, used only when the byte bound is disabled.
    pub max_items: u64,
    /// Time-to-live for entries, enforced on read.
    pub ttl: Duration,
}

pub struct MemoryCache {
    cache: Cache<String, Bytes>,
    name: &'static str,
    max_size_bytes: u64,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        let mut builder = Cache::builder().time_to_live(config.ttl);

        if config.max_size_bytes > 0 {
            builder = builder
                .max_capacity(config.max_size_bytes)
                .weigher(|key: &String, value: &Bytes| {
                    (key.len() + value.len()).min(u32::MAX as usize) as u32
                });
        } else if config.max_items > 0 {
            builder = builder.max_capacity(config.max_items);
        }

        tracing::info!(
            name = config.name,
            max_size_bytes = config.max_size_bytes,
            max_items = config.max_items,
            ttl_secs = config.ttl.as_secs(),
            "Memory cache initialized"
        );

        Self {
            cache: builder.build(),
            name: config.name,
            max_size_bytes: config.max_size_bytes,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key).await
    }

    /// Store a value. Returns whether the value was admitted.
    pub async fn set(&self, key: String, value: Bytes) -> bool {
        if self.max_size_bytes > 0 && value.len() as u64 > self.max_size_bytes {
            tracing::warn!(
                name = self.name,
                key = %key,
                size = value.len(),
                "Memory cache rejected entry larger than capacity"
            );
            return false;
        }
        self.cache.insert(key, value).await;
        true
    }

    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Flush pending internal writes. Called before shutdown so no batched
    /// insert is lost.
    pub async fn drain(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub async fn close(&self) {
        self.drain().await;
        tracing::debug!(name = self.name, "Memory cache closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_size_bytes: u64) -> MemoryCache {
        MemoryCache::new(MemoryCacheConfig {
            name: "test",
            max_size_bytes,
            max_items: 0,
            ttl: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = small_cache(1024 * 1024);
        assert!(cache.set("k".to_string(), Bytes::from_static(b"v")).await);
        assert_eq!(cache.get("k").await.unwrap(), Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let cache = small_cache(1024);
        assert!(cache.get("absent").await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let cache = small_cache(100);
        let admitted = cache.set("big".to_string(), Bytes::from(vec![0u8; 200])).await;
        assert!(!admitted);
        assert!(cache.get("big").await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            name: "test",
            max_size_bytes: 1024,
            max_items: 0,
            ttl: Duration::from_millis(50),
        });
        cache.set("k".to_string(), Bytes::from_static(b"v")).await;
        assert!(cache.get("k").await.is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = small_cache(1024);
        cache.set("a".to_string(), Bytes::from_static(b"1")).await;
        cache.set("b".to_string(), Bytes::from_static(b"2")).await;
        cache.clear().await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
    }
}
