//! Scoped ownership of scheduled work.
//!
//! Every delayed or background task a `ConnectionManager` starts (handshake
//! attempts, retry backoff, simulated delivery and replies) is spawned
//! through its [`TimerRegistry`]. [`TimerRegistry::cancel_all`] aborts and
//! joins all of them and bumps the epoch, so nothing scheduled before the
//! call runs after it returns.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

// ============================================================================
// TimerRegistry
// ============================================================================

#[derive(Default)]
struct RegistryState {
    tasks: FxHashMap<u64, JoinHandle<()>>,
    next_key: u64,
    epoch: u64,
}

/// Owns every task scheduled on behalf of one manager.
#[derive(Default)]
pub struct TimerRegistry {
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimerRegistry")
            .field("pending", &state.tasks.len())
            .field("epoch", &state.epoch)
            .finish()
    }
}

impl TimerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current epoch. Bumped by every [`cancel_all`](Self::cancel_all).
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Number of tasks still registered.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Spawns `future` as a registered task.
    ///
    /// The task deregisters itself when it completes.
    pub fn spawn<F>(self: &Arc<Self>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::downgrade(self);

        // Held across spawn + insert so a fast task cannot deregister first.
        let mut state = self.state.lock();
        let key = state.next_key;
        state.next_key += 1;

        let handle = tokio::spawn(async move {
            future.await;
            if let Some(registry) = registry.upgrade() {
                registry.state.lock().tasks.remove(&key);
            }
        });

        state.tasks.insert(key, handle);
        trace!(key, "Task registered");
    }

    /// Runs `callback` after `delay` unless the registry is cancelled first.
    pub fn schedule<F>(self: &Arc<Self>, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let epoch = self.epoch();
        let registry = Arc::downgrade(self);

        self.spawn(async move {
            tokio::time::sleep(delay).await;

            let current = registry.upgrade().map(|registry| registry.epoch());
            if current == Some(epoch) {
                callback();
            } else {
                trace!(epoch, "Stale timer skipped");
            }
        });
    }

    /// Aborts and joins every registered task.
    ///
    /// When called from inside a registered task, that task is left to
    /// finish on its own.
    pub async fn cancel_all(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.tasks.drain().map(|(_, handle)| handle).collect()
        };

        if handles.is_empty() {
            return;
        }

        let current = tokio::task::try_id();
        let count = handles.len();

        for handle in &handles {
            if Some(handle.id()) != current {
                handle.abort();
            }
        }
        for handle in handles {
            if Some(handle.id()) != current {
                let _ = handle.await;
            }
        }

        debug!(count, "Timers cancelled");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        registry.schedule(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.pending(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_prevents_firing() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for delay in [1, 2, 3] {
            let counter = Arc::clone(&fired);
            registry.schedule(Duration::from_secs(delay), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.cancel_all().await;
        assert_eq!(registry.pending(), 0);
        assert_eq!(registry.epoch(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_usable_after_cancel() {
        let registry = TimerRegistry::new();
        registry.cancel_all().await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        registry.schedule(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_from_inside_task() {
        let registry = TimerRegistry::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let inner = Arc::clone(&registry);
        registry.spawn(async move {
            inner.cancel_all().await;
            let _ = done_tx.send(());
        });

        done_rx.await.expect("task finished");
    }
}
