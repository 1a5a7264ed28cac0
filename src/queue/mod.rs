//! Deduplicating, rate-limited work queue of resource keys.
//!
//! A key is in at most one of two places: pending in `queue`, or handed out
//! to a worker and tracked in `processing`. `dirty` marks keys that need a
//! pass; a key re-added while processing stays dirty and is queued again
//! when its worker calls [`WorkQueue::done`].

pub mod rate_limiter;

use crate::model::ResourceKey;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use rate_limiter::RateLimiter;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    queue: VecDeque<ResourceKey>,
    dirty: HashSet<ResourceKey>,
    processing: HashSet<ResourceKey>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    ready: Notify,
    rate_limiter: Box<dyn RateLimiter>,
    /// Cancels pending delayed adds on shutdown.
    timers: CancellationToken,
}

/// Cheap-to-clone handle to a shared work queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(rate_limiter: impl RateLimiter + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                ready: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
                timers: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing a pass. No-op if it is already pending, or if
    /// the queue is shutting down. A key currently being processed is queued
    /// again once its worker calls [`done`](Self::done).
    pub fn add(&self, key: ResourceKey) {
        {
            let mut state = self.state();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        record_operation("add");
        self.inner.ready.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down
    /// and nothing is left pending.
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            // Register before checking state so a wake-up between the check
            // and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing. Must be called once per `get`.
    pub fn done(&self, key: &ResourceKey) {
        let requeued = {
            let mut state = self.state();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.ready.notify_one();
        }
    }

    /// Add `key` after `delay`. Dropped if the queue shuts down first.
    ///
    /// Must be called from within a tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: ResourceKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let cancelled = self.inner.timers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Re-add `key` after the rate limiter's delay, counting a failure.
    pub fn add_rate_limited(&self, key: ResourceKey) {
        let delay = self.inner.rate_limiter.when(&key);
        record_operation("add_rate_limited");
        self.add_after(key, delay);
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &ResourceKey) {
        self.inner.rate_limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new keys. Workers drain what is pending, then `get`
    /// returns `None`. Returns false if the queue was already shutting down.
    pub fn shutdown(&self) -> bool {
        if std::mem::replace(&mut self.state().shutting_down, true) {
            return false;
        }
        self.inner.timers.cancel();
        record_operation("shutdown");
        self.inner.ready.notify_waiters();
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

fn record_operation(operation: &'static str) {
    metrics::queue_operations().add(1, &[KeyValue::new("operation", operation)]);
}
