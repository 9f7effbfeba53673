use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

/// Externally visible state of a key.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    Dispatching,
}

enum Slot {
    Armed {
        version: u64,
        deadline: Instant,
        handle: JoinHandle<()>,
    },
    Dispatching {
        version: u64,
    },
}

struct Registry<K> {
    slots: HashMap<K, Slot>,
    next_version: u64,
}

/// Runs one delayed callback per key, restarting the delay whenever the key
/// is armed again.
///
/// Every arm gets a fresh version. A task that wakes up only fires if its key
/// is still armed with that version, so a replaced task can never run its
/// callback even if the abort lands after it woke.
pub struct DebounceScheduler<K> {
    registry: Arc<Mutex<Registry<K>>>,
}

impl<K> Clone for DebounceScheduler<K> {
    fn clone(&self) -> Self {
        DebounceScheduler {
            registry: self.registry.clone(),
        }
    }
}

impl<K> Default for DebounceScheduler<K> {
    fn default() -> Self {
        DebounceScheduler {
            registry: Arc::new(Mutex::new(Registry {
                slots: HashMap::new(),
                next_version: 0,
            })),
        }
    }
}

impl<K> DebounceScheduler<K>
where
    K: Clone + Eq + Hash + Display + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<F, Fut>(&self, key: K, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // Cancel and re-register under one lock so no other arrival can slip
        // between them.
        let mut registry = self.registry.lock();
        registry.next_version += 1;
        let version = registry.next_version;

        if let Some(Slot::Armed {
            handle, deadline, ..
        }) = registry.slots.remove(&key)
        {
            handle.abort();
            debug!(
                key = %key,
                version,
                cancelled_remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "debounce re-armed"
            );
        }

        let task_registry = self.registry.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut registry = task_registry.lock();
                match registry.slots.get(&task_key) {
                    Some(Slot::Armed { version: armed, .. }) if *armed == version => {
                        registry
                            .slots
                            .insert(task_key.clone(), Slot::Dispatching { version });
                    }
                    _ => {
                        debug!(key = %task_key, version, "stale debounce task skipped");
                        return;
                    }
                }
            }

            let _guard = DispatchGuard {
                registry: task_registry,
                key: task_key.clone(),
                version,
            };
            if let Err(err) = callback().await {
                error!(key = %task_key, "debounced callback failed: {err:?}");
            }
        });

        registry.slots.insert(
            key,
            Slot::Armed {
                version,
                deadline: Instant::now() + delay,
                handle,
            },
        );
    }

    // Albums are never abandoned mid-collection by the bot itself.
    #[allow(dead_code)]
    pub fn cancel(&self, key: &K) {
        let mut registry = self.registry.lock();
        if matches!(registry.slots.get(key), Some(Slot::Armed { .. })) {
            if let Some(Slot::Armed { handle, .. }) = registry.slots.remove(key) {
                handle.abort();
            }
        }
    }

    #[cfg(test)]
    pub fn phase(&self, key: &K) -> Phase {
        match self.registry.lock().slots.get(key) {
            None => Phase::Idle,
            Some(Slot::Armed { .. }) => Phase::Armed,
            Some(Slot::Dispatching { .. }) => Phase::Dispatching,
        }
    }
}

/// Returns the key to idle when the callback finishes, fails or panics,
/// unless a newer arm already took the slot over.
struct DispatchGuard<K: Eq + Hash> {
    registry: Arc<Mutex<Registry<K>>>,
    key: K,
    version: u64,
}

impl<K: Eq + Hash> Drop for DispatchGuard<K> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if matches!(
            registry.slots.get(&self.key),
            Some(Slot::Dispatching { version }) if *version == self.version
        ) {
            registry.slots.remove(&self.key);
        }
    }
}
