//! Persistent disk cache.
//!
//! ## On-disk layout
//!
//! Entries live at `{base}/{hash[-2:]}/{hash[-4:-2]}/{hash}_{expiresUnix}.cache`
//! where `hash` is the hex BLAKE3-256 of the user-visible key. The two-level
//! fan-out caps per-directory entries, and encoding the expiry into the
//! filename lets scans detect expiry without any file I/O. A filename whose
//! expiry does not parse is treated as already expired.
//!
//! ## In-memory index
//!
//! An LRU keyed by `hash` shadows the tree, carrying `{path, size,
//! expires_at}`. It is rebuilt at startup by walking the tree, and guarded
//! by a single mutex that also covers the cleanup cursor. File I/O always
//! happens outside that lock. An atomic counter tracks the summed entry
//! sizes.
//!
//! ## Eviction
//!
//! Removing an index entry emits the file path to a bounded delete queue
//! consumed by a small pool of unlink workers; a full queue falls back to
//! an inline unlink. With `max_size > 0`, crossing the high watermark
//! (95%) evicts oldest entries until the low watermark (85%) is reached.
//!
//! ## Background cleanup
//!
//! One scanner task sweeps the index on an adaptive cadence: 30s base,
//! stretching by 10s per idle pass up to 10min, snapping back to base on
//! cache activity. Each pass is budgeted (1024 keys scanned, 256 removals)
//! and resumes from a rolling cursor; every 8th pass additionally stats a
//! sample of live entries to drop index entries whose files were removed
//! externally.
//!
//! All I/O errors are logged and non-fatal; a failed write leaves no temp
//! file behind.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::{CacheError, Result};

const DEFAULT_MAX_ITEMS: usize = 100_000;
const UNLINK_WORKERS: usize = 2;
const DELETE_QUEUE_SIZE: usize = 1024;

const BASE_INTERVAL: Duration = Duration::from_secs(30);
const BACKOFF_STEP: Duration = Duration::from_secs(10);
const MAX_INTERVAL: Duration = Duration::from_secs(600);
const SCAN_BUDGET: usize = 1024;
const REMOVE_BUDGET: usize = 256;
const STAT_SAMPLE_EVERY: u64 = 8;
const STAT_SAMPLE_BUDGET: usize = 256;

const HIGH_WATERMARK_NUM: u64 = 95;
const LOW_WATERMARK_NUM: u64 = 85;

const STATE_LOADING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Configuration for one disk cache instance.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    pub name: &'static str,
    pub base_dir: PathBuf,
    pub ttl: Duration,
    /// Maximum total size in bytes. `0` disables size-based eviction.
    pub max_size_bytes: u64,
    /// Maximum tracked entries. `0` uses the default of 100 000.
    pub max_items: usize,
    /// Remove all cached files at startup instead of reloading the index.
    pub clear_on_startup: bool,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    path: PathBuf,
    size: u64,
    expires_at: u64,
}

struct Index {
    lru: LruCache<String, IndexEntry>,
    /// Rolling cursor for budgeted cleanup passes.
    cleanup_pos: usize,
}

enum UnlinkJob {
    Unlink(PathBuf),
    Shutdown,
}

/// Point-in-time cache usage, for logs and tests.
#[derive(Debug, Clone, Copy)]
pub struct DiskCacheStats {
    pub entries: usize,
    pub current_size: u64,
}

pub struct DiskCache {
    name: &'static str,
    base: PathBuf,
    ttl: Duration,
    max_size: u64,
    high_watermark: u64,
    low_watermark: u64,
    index: Mutex<Index>,
    current_size: AtomicU64,
    state: AtomicU8,
    delete_tx: mpsc::Sender<UnlinkJob>,
    activity: Notify,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiskCache {
    /// Open a disk cache: create the directory tree, reload (or clear) the
    /// index, and start the unlink workers and the cleanup scanner.
    pub async fn open(config: DiskCacheConfig) -> Result<Arc<Self>> {
        let base = config.base_dir.clone();
        tokio::fs::create_dir_all(&base).await?;

        let max_items = if config.max_items == 0 {
            DEFAULT_MAX_ITEMS
        } else {
            config.max_items
        };

        let (delete_tx, delete_rx) = mpsc::channel(DELETE_QUEUE_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let cache = Arc::new(Self {
            name: config.name,
            base: base.clone(),
            ttl: config.ttl,
            max_size: config.max_size_bytes,
            high_watermark: config.max_size_bytes / 100 * HIGH_WATERMARK_NUM,
            low_watermark: config.max_size_bytes / 100 * LOW_WATERMARK_NUM,
            index: Mutex::new(Index {
                lru: LruCache::new(NonZeroUsize::new(max_items).expect("max_items is nonzero")),
                cleanup_pos: 0,
            }),
            current_size: AtomicU64::new(0),
            state: AtomicU8::new(STATE_LOADING),
            delete_tx,
            activity: Notify::new(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        if config.clear_on_startup {
            tracing::info!(name = cache.name, base = %base.display(), "Clearing disk cache at startup");
            cache.reset_tree().await?;
        } else {
            cache.load_index().await;
        }

        cache.spawn_unlink_workers(delete_rx);
        Arc::clone(&cache).spawn_scanner(shutdown_rx);
        cache.state.store(STATE_RUNNING, Ordering::SeqCst);

        tracing::info!(
            name = cache.name,
            base = %base.display(),
            ttl_secs = config.ttl.as_secs(),
            max_size = config.max_size_bytes,
            max_items,
            entries = cache.stats().entries,
            size = cache.stats().current_size,
            "Disk cache initialized"
        );
        Ok(cache)
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Look up a key. Expired entries are removed on the spot; a file that
    /// is missing on disk (raced an eviction or was removed externally) is
    /// dropped from the index and counts as a miss. Read errors are misses.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if !self.is_running() {
            return None;
        }
        let hash = hash_key(key);
        let now = unix_now();

        let (path, stale_path) = {
            let mut index = self.index.lock().expect("disk cache index lock");
            let lookup = index
                .lru
                .get(&hash)
                .map(|entry| (entry.expires_at <= now, entry.path.clone()));
            match lookup {
                None => (None, None),
                Some((true, _)) => {
                    let entry = index.lru.pop(&hash).expect("entry present");
                    self.current_size.fetch_sub(entry.size, Ordering::SeqCst);
                    (None, Some(entry.path))
                }
                Some((false, path)) => (Some(path), None),
            }
        };
        self.activity.notify_one();
        if let Some(path) = stale_path {
            self.queue_unlink(path).await;
            return None;
        }
        let path = path?;

        match tokio::fs::read(&path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let mut index = self.index.lock().expect("disk cache index lock");
                if let Some(entry) = index.lru.pop(&hash) {
                    self.current_size.fetch_sub(entry.size, Ordering::SeqCst);
                }
                None
            }
            Err(err) => {
                tracing::warn!(name = self.name, path = %path.display(), error = %err, "Disk cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a value. The payload is written to `{path}.tmp` and atomically
    /// renamed so partial writes are never observable. A failed write leaves
    /// no temp file behind.
    pub async fn set(&self, key: &str, data: &[u8]) -> Result<()> {
        if !self.is_running() {
            return Err(CacheError::Closed);
        }
        let hash = hash_key(key);
        let expires_at = unix_now() + self.ttl.as_secs();
        let path = self.entry_path(&hash, expires_at);
        let size = data.len() as u64;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = tmp_path(&path);
        if let Err(err) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }

        let entry = IndexEntry {
            path: path.clone(),
            size,
            expires_at,
        };

        let mut unlinks = Vec::new();
        {
            let mut index = self.index.lock().expect("disk cache index lock");
            if let Some((old_hash, old)) = index.lru.push(hash.clone(), entry) {
                // Either the same key was replaced (new expiry means a new
                // filename) or the LRU hit capacity and shed its tail.
                self.current_size.fetch_sub(old.size, Ordering::SeqCst);
                if old_hash != hash || old.path != path {
                    unlinks.push(old.path);
                }
            }
            self.current_size.fetch_add(size, Ordering::SeqCst);
        }
        for old in unlinks {
            self.queue_unlink(old).await;
        }

        self.activity.notify_one();
        self.evict_to_watermark().await;
        Ok(())
    }

    /// Remove a key from the index; the file unlink runs through the
    /// eviction sink.
    pub async fn delete(&self, key: &str) {
        if !self.is_running() {
            return;
        }
        let hash = hash_key(key);
        let removed = {
            let mut index = self.index.lock().expect("disk cache index lock");
            index.lru.pop(&hash)
        };
        if let Some(entry) = removed {
            self.current_size.fetch_sub(entry.size, Ordering::SeqCst);
            self.queue_unlink(entry.path).await;
        }
        self.activity.notify_one();
    }

    /// Drop everything: the tree is removed and recreated, the index and
    /// size counter reset.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut index = self.index.lock().expect("disk cache index lock");
            index.lru.clear();
            index.cleanup_pos = 0;
        }
        self.current_size.store(0, Ordering::SeqCst);
        self.reset_tree().await?;
        tracing::info!(name = self.name, "Disk cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> DiskCacheStats {
        let entries = self.index.lock().expect("disk cache index lock").lru.len();
        DiskCacheStats {
            entries,
            current_size: self.current_size.load(Ordering::SeqCst),
        }
    }

    /// Stop the scanner and unlink workers. Pending queued unlinks are
    /// drained before the workers exit.
    pub async fn close(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) == STATE_CLOSED {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        for _ in 0..UNLINK_WORKERS {
            let _ = self.delete_tx.send(UnlinkJob::Shutdown).await;
        }
        let tasks = {
            let mut tasks = self.tasks.lock().expect("disk cache task lock");
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            let _ = task.await;
        }
        tracing::debug!(name = self.name, "Disk cache closed");
    }

    async fn reset_tree(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.base).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tokio::fs::create_dir_all(&self.base).await?;
        Ok(())
    }

    /// Walk the two-level tree, dropping expired or unparseable files and
    /// loading the rest into the index.
    async fn load_index(&self) {
        let now = unix_now();
        let mut loaded = 0usize;
        let mut dropped = 0usize;

        let mut level1 = match tokio::fs::read_dir(&self.base).await {
            Ok(rd) => rd,
            Err(err) => {
                tracing::warn!(name = self.name, error = %err, "Disk cache startup scan failed");
                return;
            }
        };
        while let Ok(Some(l1)) = level1.next_entry().await {
            if !l1.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Ok(mut level2) = tokio::fs::read_dir(l1.path()).await else {
                continue;
            };
            while let Ok(Some(l2)) = level2.next_entry().await {
                if !l2.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let Ok(mut files) = tokio::fs::read_dir(l2.path()).await else {
                    continue;
                };
                while let Ok(Some(file)) = files.next_entry().await {
                    let path = file.path();
                    let name = file.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if !name.ends_with(".cache") {
                        continue;
                    }
                    let parsed = parse_entry_filename(name);
                    let expired = match parsed {
                        Some((_, expires_at)) => expires_at <= now,
                        // Corrupt filename: treat as expired.
                        None => true,
                    };
                    if expired {
                        let _ = tokio::fs::remove_file(&path).await;
                        dropped += 1;
                        continue;
                    }
                    let (hash, expires_at) = parsed.expect("checked above");
                    let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
                    let entry = IndexEntry {
                        path: path.clone(),
                        size,
                        expires_at,
                    };
                    let shed = {
                        let mut index = self.index.lock().expect("disk cache index lock");
                        let shed = index.lru.push(hash.to_string(), entry);
                        self.current_size.fetch_add(size, Ordering::SeqCst);
                        shed
                    };
                    if let Some((_, old)) = shed {
                        self.current_size.fetch_sub(old.size, Ordering::SeqCst);
                        let _ = tokio::fs::remove_file(&old.path).await;
                    }
                    loaded += 1;
                }
            }
        }
        tracing::info!(
            name = self.name,
            loaded,
            dropped,
            size = self.current_size.load(Ordering::SeqCst),
            "Disk cache index loaded"
        );
    }

    /// Send a path to the delete queue; unlink inline when the queue is
    /// full so evictions can never be lost.
    async fn queue_unlink(&self, path: PathBuf) {
        match self.delete_tx.try_send(UnlinkJob::Unlink(path)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(UnlinkJob::Unlink(path))) => {
                unlink_file(&self.base, path).await;
            }
            Err(_) => {}
        }
    }

    fn spawn_unlink_workers(&self, delete_rx: mpsc::Receiver<UnlinkJob>) {
        let rx = Arc::new(tokio::sync::Mutex::new(delete_rx));
        let mut tasks = self.tasks.lock().expect("disk cache task lock");
        for _ in 0..UNLINK_WORKERS {
            let rx = Arc::clone(&rx);
            let base = self.base.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(UnlinkJob::Unlink(path)) => unlink_file(&base, path).await,
                        Some(UnlinkJob::Shutdown) | None => break,
                    }
                }
            }));
        }
    }

    fn spawn_scanner(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = BASE_INTERVAL;
            let mut pass: u64 = 0;
            loop {
                if interval > BASE_INTERVAL {
                    // Backed off: cache activity snaps the cadence back to
                    // base without forcing an immediate pass.
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = this.activity.notified() => {
                            interval = BASE_INTERVAL;
                            continue;
                        }
                        _ = shutdown.changed() => break,
                    }
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown.changed() => break,
                    }
                }

                pass += 1;
                let removed = this.cleanup_pass(pass).await;
                if removed == 0 {
                    interval = (interval + BACKOFF_STEP).min(MAX_INTERVAL);
                } else {
                    interval = BASE_INTERVAL;
                }
                tracing::debug!(
                    name = this.name,
                    pass,
                    removed,
                    next_secs = interval.as_secs(),
                    "Disk cache cleanup pass complete"
                );
            }
        });
        self.tasks
            .lock()
            .expect("disk cache task lock")
            .push(handle);
    }

    /// One budgeted sweep: expire up to `REMOVE_BUDGET` of the next
    /// `SCAN_BUDGET` keys after the rolling cursor, occasionally stat-sample
    /// live entries for externally removed files, and enforce the size
    /// watermarks. Returns the number of removed entries.
    async fn cleanup_pass(&self, pass: u64) -> usize {
        let now = unix_now();

        let snapshot: Vec<(String, u64, PathBuf)> = {
            let mut index = self.index.lock().expect("disk cache index lock");
            let len = index.lru.len();
            if len == 0 {
                index.cleanup_pos = 0;
                Vec::new()
            } else {
                let start = index.cleanup_pos.min(len);
                let taken: Vec<_> = index
                    .lru
                    .iter()
                    .skip(start)
                    .take(SCAN_BUDGET)
                    .map(|(hash, entry)| (hash.clone(), entry.expires_at, entry.path.clone()))
                    .collect();
                index.cleanup_pos = if start + taken.len() >= len {
                    0
                } else {
                    start + taken.len()
                };
                taken
            }
        };

        let mut removed = 0usize;
        let mut unlinks = Vec::new();
        {
            let mut index = self.index.lock().expect("disk cache index lock");
            for (hash, expires_at, _) in &snapshot {
                if removed >= REMOVE_BUDGET {
                    break;
                }
                if *expires_at > now {
                    continue;
                }
                if let Some(entry) = index.lru.pop(hash) {
                    self.current_size.fetch_sub(entry.size, Ordering::SeqCst);
                    unlinks.push(entry.path);
                    removed += 1;
                }
            }
        }
        for path in unlinks {
            self.queue_unlink(path).await;
        }

        // Every Nth pass, stat a sample of live entries to self-heal index
        // entries whose files were removed behind our back.
        if pass % STAT_SAMPLE_EVERY == 0 {
            let mut dangling = Vec::new();
            for (hash, expires_at, path) in snapshot.iter().take(STAT_SAMPLE_BUDGET) {
                if *expires_at <= now {
                    continue;
                }
                match tokio::fs::try_exists(path).await {
                    Ok(false) => dangling.push(hash.clone()),
                    _ => {}
                }
            }
            if !dangling.is_empty() {
                let mut index = self.index.lock().expect("disk cache index lock");
                for hash in dangling {
                    if let Some(entry) = index.lru.pop(&hash) {
                        self.current_size.fetch_sub(entry.size, Ordering::SeqCst);
                        removed += 1;
                    }
                }
            }
        }

        self.evict_to_watermark().await;
        removed
    }

    /// Hysteretic size eviction: crossing the high watermark sheds oldest
    /// entries until the low watermark is reached.
    async fn evict_to_watermark(&self) {
        if self.max_size == 0 {
            return;
        }
        if self.current_size.load(Ordering::SeqCst) <= self.high_watermark {
            return;
        }

        let mut unlinks = VecDeque::new();
        {
            let mut index = self.index.lock().expect("disk cache index lock");
            while self.current_size.load(Ordering::SeqCst) > self.low_watermark {
                match index.lru.pop_lru() {
                    Some((_, entry)) => {
                        self.current_size.fetch_sub(entry.size, Ordering::SeqCst);
                        unlinks.push_back(entry.path);
                    }
                    None => break,
                }
            }
        }
        let evicted = unlinks.len();
        for path in unlinks {
            self.queue_unlink(path).await;
        }
        if evicted > 0 {
            tracing::info!(
                name = self.name,
                evicted,
                size = self.current_size.load(Ordering::SeqCst),
                "Disk cache size eviction"
            );
        }
    }

    /// `{base}/{hash[-2:]}/{hash[-4:-2]}/{hash}_{expires}.cache`
    fn entry_path(&self, hash: &str, expires_at: u64) -> PathBuf {
        let n = hash.len();
        self.base
            .join(&hash[n - 2..])
            .join(&hash[n - 4..n - 2])
            .join(format!("{hash}_{expires_at}.cache"))
    }
}

fn hash_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parse `{hash}_{expiresUnix}.cache`. Returns `None` for names that do not
/// carry a parseable expiry.
fn parse_entry_filename(name: &str) -> Option<(&str, u64)> {
    let stem = name.strip_suffix(".cache")?;
    let (hash, ts) = stem.rsplit_once('_')?;
    let expires_at: u64 = ts.parse().ok()?;
    if hash.len() < 4 {
        return None;
    }
    Some((hash, expires_at))
}

/// Unlink a cache file and prune parent directories that became empty,
/// stopping at the cache base.
async fn unlink_file(base: &Path, path: PathBuf) {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Disk cache unlink failed");
            return;
        }
    }
    let mut dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => return,
    };
    while dir != *base && dir.starts_with(base) {
        if tokio::fs::remove_dir(&dir).await.is_err() {
            break;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
}
