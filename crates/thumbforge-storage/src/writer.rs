//! Asynchronous disk-write pool.
//!
//! Each cache role gets its own pool: a bounded FIFO queue drained by a few
//! worker tasks that perform the actual disk-cache writes. The queue is
//! best-effort by design: when it is full the write is dropped with a
//! warning, because the payload is already in the memory cache and a future
//! miss simply redoes the work. Payload ownership transfers at enqueue time
//! (`Bytes` is immutable and reference-counted), so callers can release
//! their handle immediately.

use std::sync::Arc;

use bytes::Bytes;
use thumbforge_cache::DiskCache;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: crate::config::DEFAULT_WRITER_WORKERS,
            queue_size: crate::config::DEFAULT_WRITER_QUEUE,
        }
    }
}

struct WriteTask {
    key: String,
    data: Bytes,
}

pub struct CacheWriter {
    name: &'static str,
    tx: std::sync::Mutex<Option<mpsc::Sender<WriteTask>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl CacheWriter {
    pub fn new(name: &'static str, disk: Arc<DiskCache>, config: WriterConfig) -> Self {
        let workers = if config.workers == 0 {
            crate::config::DEFAULT_WRITER_WORKERS
        } else {
            config.workers
        };
        let queue_size = if config.queue_size == 0 {
            crate::config::DEFAULT_WRITER_QUEUE
        } else {
            config.queue_size
        };

        let (tx, rx) = mpsc::channel::<WriteTask>(queue_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx = Arc::clone(&rx);
            let disk = Arc::clone(&disk);
            handles.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else { break };
                    if let Err(err) = disk.set(&task.key, &task.data).await {
                        tracing::warn!(key = %task.key, error = %err, "Async cache write failed");
                    }
                }
            }));
        }

        tracing::info!(name, workers, queue_size, "Cache writer pool started");
        Self {
            name,
            tx: std::sync::Mutex::new(Some(tx)),
            handles: std::sync::Mutex::new(handles),
        }
    }

    /// Queue a write without blocking. A full queue drops the write.
    pub fn enqueue(&self, key: String, data: Bytes) {
        let guard = self.tx.lock().expect("writer sender lock");
        let Some(tx) = guard.as_ref() else { return };
        match tx.try_send(WriteTask { key, data }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                tracing::warn!(
                    name = self.name,
                    key = %task.key,
                    "Cache write queue full, dropping async write"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().expect("writer sender lock").take();
        drop(tx);
        let handles = {
            let mut handles = self.handles.lock().expect("writer handle lock");
            std::mem::take(&mut *handles)
        };
        for handle in handles {
            let _ = handle.await;
        }
        tracing::debug!(name = self.name, "Cache writer pool drained");
    }
}
