//! Request coalescing.
//!
//! Concurrent cache-miss requests for the same URL collapse into one
//! in-flight execution: the first caller becomes the leader, everyone else
//! subscribes to its result. The leader runs on a detached task, so it
//! outlives the HTTP request that started it: a follower that is still
//! waiting keeps coalesced work alive even when the leader's client
//! disconnects.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::handlers::ThumbResult;

pub struct Flight {
    inflight: Mutex<HashMap<String, broadcast::Sender<ThumbResult>>>,
}

impl Flight {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Join the flight for `key`, starting it with `work` if nobody holds
    /// it yet. Returns the shared result and whether this call was a
    /// coalesced follower.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: &str, work: F) -> (ThumbResult, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ThumbResult> + Send + 'static,
    {
        let (mut rx, coalesced) = {
            let mut inflight = self.inflight.lock().expect("singleflight lock");
            match inflight.get(key) {
                Some(tx) => (tx.subscribe(), true),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    inflight.insert(key.to_string(), tx.clone());

                    let flight = Arc::clone(self);
                    let key = key.to_string();
                    let fut = work();
                    tokio::spawn(async move {
                        let result = fut.await;
                        // Remove before sending so a request landing after
                        // completion starts a fresh flight instead of
                        // subscribing to a finished channel.
                        flight
                            .inflight
                            .lock()
                            .expect("singleflight lock")
                            .remove(&key);
                        let _ = tx.send(result);
                    });
                    (rx, false)
                }
            }
        };

        match rx.recv().await {
            Ok(result) => (result, coalesced),
            // The sender can only drop without sending if the leader task
            // was torn down by a runtime shutdown.
            Err(_) => (Err(crate::handlers::ExecError::Canceled), coalesced),
        }
    }

    /// Number of in-flight keys, for tests.
    pub fn len(&self) -> usize {
        self.inflight.lock().expect("singleflight lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Flight {
    fn default() -> Self {
        Self::new()
    }
}
