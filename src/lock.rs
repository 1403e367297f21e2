//! Per-key asynchronous mutual exclusion
//!
//! [`KeyedLock`] hands out at most one [`LockGuard`] per key. Callers that find
//! the key busy park on an explicit wait queue and are handed ownership
//! directly by the releasing holder, so a released key never becomes free
//! while someone is still waiting for it.
//!
//! The lock only coordinates tasks inside one process. Two instances of the
//! service may still fetch the same asset concurrently.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Order in which blocked waiters receive a released key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaiterOrder {
    /// Earliest waiter first
    #[default]
    Fifo,
    /// Most recently queued waiter first
    Lifo,
}

#[derive(Default)]
struct KeyState {
    waiters: VecDeque<oneshot::Sender<()>>,
}

struct Inner {
    order: WaiterOrder,
    // A key is held exactly while it has an entry here
    held: Mutex<HashMap<String, KeyState>>,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pass ownership of `key` to the next live waiter, or free it
    fn release(&self, key: &str) {
        let mut table = self.table();

        loop {
            let next = {
                let Some(state) = table.get_mut(key) else {
                    error!("Lock for key={} released while not held", key);
                    debug_assert!(false, "lock for key={} released while not held", key);
                    return;
                };
                match self.order {
                    WaiterOrder::Fifo => state.waiters.pop_front(),
                    WaiterOrder::Lifo => state.waiters.pop_back(),
                }
            };
            match next {
                Some(waiter) => {
                    // A waiter whose acquire future was dropped is skipped
                    if waiter.send(()).is_ok() {
                        debug!("Lock for key={} handed to next waiter", key);
                        return;
                    }
                }
                None => {
                    table.remove(key);
                    debug!("Lock for key={} released", key);
                    return;
                }
            }
        }
    }
}

/// Async mutex keyed by string
#[derive(Clone)]
pub struct KeyedLock {
    inner: Arc<Inner>,
}

impl KeyedLock {
    pub fn new(order: WaiterOrder) -> Self {
        KeyedLock {
            inner: Arc::new(Inner {
                order,
                held: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Acquire exclusive ownership of `key`, waiting as long as it takes
    ///
    /// There is no timeout; wrap the call in `tokio::time::timeout` when
    /// unbounded waiting is unacceptable. Dropping the returned future while
    /// queued gives up the place in line without leaking the lock.
    pub async fn acquire(&self, key: &str) -> LockGuard {
        let rx = {
            let mut table = self.inner.table();
            match table.get_mut(key) {
                None => {
                    table.insert(key.to_string(), KeyState::default());
                    debug!("Lock for key={} acquired without waiting", key);
                    return self.guard(key);
                }
                Some(state) => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    debug!(
                        "Lock for key={} busy, queued behind {} waiter(s)",
                        key,
                        state.waiters.len() - 1
                    );
                    rx
                }
            }
        };

        let mut pending = PendingAcquire {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            rx: Some(rx),
        };
        pending.wait().await;
        self.guard(key)
    }

    /// Acquire `key` only if nobody holds it right now
    pub fn try_acquire(&self, key: &str) -> Option<LockGuard> {
        let mut table = self.inner.table();
        if table.contains_key(key) {
            return None;
        }
        table.insert(key.to_string(), KeyState::default());
        drop(table);
        Some(self.guard(key))
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.inner.table().contains_key(key)
    }

    /// Number of keys currently held
    pub fn held_count(&self) -> usize {
        self.inner.table().len()
    }

    fn guard(&self, key: &str) -> LockGuard {
        LockGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            released: false,
        }
    }

    #[cfg(test)]
    fn release_unheld(&self, key: &str) {
        self.inner.release(key);
    }
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new(WaiterOrder::default())
    }
}

/// A queued acquisition that cleans up after itself if abandoned
struct PendingAcquire {
    inner: Arc<Inner>,
    key: String,
    rx: Option<oneshot::Receiver<()>>,
}

impl PendingAcquire {
    async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // The sender is only consumed by a successful hand-off
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            // Ownership may have arrived just before cancellation
            if rx.try_recv().is_ok() {
                self.inner.release(&self.key);
            }
        }
    }
}

/// Exclusive ownership of one key; released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    inner: Arc<Inner>,
    key: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock now instead of at end of scope
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.release(&self.key);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}
