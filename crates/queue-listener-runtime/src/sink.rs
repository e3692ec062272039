//! Observable accumulation of handled payloads.
//!
//! Handlers append what they processed to an injected
//! `Arc<ObservableSink<T>>`; tests and operators read it back through
//! [`snapshot`](ObservableSink::snapshot) or block on
//! [`wait_for_len`](ObservableSink::wait_for_len).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;

#[derive(Debug)]
struct SinkState<T> {
    items: Vec<T>,
    headers: HashMap<String, String>,
    workers: BTreeSet<usize>,
}

impl<T> Default for SinkState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            headers: HashMap::new(),
            workers: BTreeSet::new(),
        }
    }
}

/// Thread-safe list of handled payloads plus the headers and worker ids seen
#[derive(Debug)]
pub struct ObservableSink<T> {
    state: Mutex<SinkState<T>>,
    changed: Notify,
}

impl<T> Default for ObservableSink<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SinkState::default()),
            changed: Notify::new(),
        }
    }
}

impl<T: Clone> ObservableSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState<T>> {
        // A panicking handler must not make the sink unreadable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, item: T) {
        self.lock().items.push(item);
        self.changed.notify_waiters();
    }

    pub fn append_all(&self, items: impl IntoIterator<Item = T>) {
        self.lock().items.extend(items);
        self.changed.notify_waiters();
    }

    /// Remember the latest value seen for a header
    pub fn record_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().headers.insert(key.into(), value.into());
    }

    pub fn record_worker(&self, worker_id: usize) {
        self.lock().workers.insert(worker_id);
    }

    /// Copy of everything appended so far, in append order
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_header(&self, key: &str) -> Option<String> {
        self.lock().headers.get(key).cloned()
    }

    /// Worker ids recorded so far, ascending
    pub fn distinct_workers(&self) -> Vec<usize> {
        self.lock().workers.iter().copied().collect()
    }

    /// Wait until at least `len` items were appended.
    ///
    /// Returns `false` if `timeout` passed first.
    pub async fn wait_for_len(&self, len: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.len() >= len {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Forget all items, headers and worker ids
    pub fn reset(&self) {
        *self.lock() = SinkState::default();
        self.changed.notify_waiters();
    }
}
