//! Controller: waits for the cache, drains the work queue, applies handler
//! results to the store, and retries failures with backoff.

use crate::cluster::{Informer, ResourceStore};
use crate::error::{Error, ReconcileError, Result};
use crate::event::{Event, EventRecorder, EventType};
use crate::handler::Handler;
use crate::model::ResourceKey;
use crate::queue::WorkQueue;
use crate::queue::rate_limiter::default_controller_rate_limiter;
use crate::telemetry::metrics;
use crate::telemetry::reconcile::{record_outcome, start_reconcile_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::filter;

/// Consecutive failures tolerated before a key is abandoned. A change gets
/// at most `MAX_RETRIES + 1` attempts.
pub const MAX_RETRIES: u32 = 5;

/// Configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrent worker loops.
    pub workers: usize,
    /// How long to wait for the informer's initial list.
    pub cache_sync_timeout: Duration,
    /// How often `has_synced` is polled while waiting.
    pub sync_poll_interval: Duration,
    /// First retry delay; doubles per consecutive failure.
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Pause before replacing a worker that panicked.
    pub worker_restart_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            cache_sync_timeout: Duration::from_secs(30),
            sync_poll_interval: Duration::from_millis(100),
            retry_base_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_secs(1000),
            worker_restart_delay: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of a controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    SyncingCache,
    Ready,
    Draining,
    Stopped,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControllerState::Initializing => "initializing",
            ControllerState::SyncingCache => "syncing_cache",
            ControllerState::Ready => "ready",
            ControllerState::Draining => "draining",
            ControllerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// How one successful attempt ended.
#[derive(Debug, Clone, Copy)]
enum Reconciled {
    /// The key no longer exists in the cache.
    Dropped,
    Unchanged,
    Updated,
}

impl Reconciled {
    fn label(self) -> &'static str {
        match self {
            Reconciled::Dropped => "dropped",
            Reconciled::Unchanged => "unchanged",
            Reconciled::Updated => "updated",
        }
    }
}

/// Releases a key handed out by the queue, whichever way processing ends.
struct DoneGuard<'a> {
    queue: &'a WorkQueue,
    key: ResourceKey,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

enum SyncOutcome {
    Synced,
    Stopped,
    TimedOut,
}

/// Watches resources and reconciles the ones carrying the directive.
#[derive(Clone)]
pub struct Controller {
    informer: Arc<dyn Informer>,
    store: Arc<dyn ResourceStore>,
    handler: Arc<dyn Handler>,
    recorder: Arc<dyn EventRecorder>,
    queue: WorkQueue,
    config: ControllerConfig,
    state: Arc<watch::Sender<ControllerState>>,
}

impl Controller {
    pub fn new(
        informer: Arc<dyn Informer>,
        store: Arc<dyn ResourceStore>,
        handler: Arc<dyn Handler>,
        recorder: Arc<dyn EventRecorder>,
        config: ControllerConfig,
    ) -> Self {
        let queue = WorkQueue::new(default_controller_rate_limiter(
            config.retry_base_delay,
            config.retry_max_delay,
        ));
        let (state, _) = watch::channel(ControllerState::Initializing);
        Self {
            informer,
            store,
            handler,
            recorder,
            queue,
            config,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    fn transition(&self, to: ControllerState) {
        let from = self.state.send_replace(to);
        info!(%from, %to, "controller state transition");
    }

    /// Run until `stop` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheSyncTimeout`] if the informer does not sync in
    /// time. The controller is `Stopped` afterwards either way.
    pub async fn run(&self, stop: CancellationToken) -> Result<()> {
        self.transition(ControllerState::Initializing);

        let (events, notifications) = mpsc::unbounded_channel();
        let watch_stop = CancellationToken::new();

        let informer = Arc::clone(&self.informer);
        let informer_stop = watch_stop.clone();
        let informer_task = tokio::spawn(async move { informer.run(events, informer_stop).await });
        let pump_task = tokio::spawn(filter::pump(notifications, self.queue.clone()));

        self.transition(ControllerState::SyncingCache);
        match self.wait_for_cache_sync(&stop).await {
            SyncOutcome::Synced => {}
            SyncOutcome::Stopped => {
                info!("stopped before caches synced");
                self.shut_down(watch_stop, informer_task, pump_task).await;
                return Ok(());
            }
            SyncOutcome::TimedOut => {
                error!(timeout = ?self.config.cache_sync_timeout, "timed out waiting for caches to sync");
                self.shut_down(watch_stop, informer_task, pump_task).await;
                return Err(Error::CacheSyncTimeout(self.config.cache_sync_timeout));
            }
        }

        info!(workers = self.config.workers, "controller synced and ready");
        self.transition(ControllerState::Ready);

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let controller = self.clone();
            workers.spawn(async move { controller.run_worker(id).await });
        }
        let mut next_id = self.config.workers;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                Some(joined) = workers.join_next() => {
                    let Err(e) = joined else { continue };
                    if !e.is_panic() {
                        continue;
                    }
                    error!(error = %e, delay = ?self.config.worker_restart_delay, "worker panicked, restarting");
                    let controller = self.clone();
                    let delay = self.config.worker_restart_delay;
                    let id = next_id;
                    next_id += 1;
                    workers.spawn(async move {
                        tokio::time::sleep(delay).await;
                        controller.run_worker(id).await;
                    });
                }
            }
        }

        self.transition(ControllerState::Draining);
        self.queue.shutdown();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker ended abnormally while draining");
            }
        }

        self.shut_down(watch_stop, informer_task, pump_task).await;
        Ok(())
    }

    async fn shut_down(
        &self,
        watch_stop: CancellationToken,
        informer_task: tokio::task::JoinHandle<()>,
        pump_task: tokio::task::JoinHandle<()>,
    ) {
        watch_stop.cancel();
        // Already done when draining; this covers the paths that never got
        // to Ready.
        self.queue.shutdown();
        if let Err(e) = informer_task.await {
            warn!(error = %e, "informer task failed");
        }
        // The pump ends once the informer has dropped its sender.
        if let Err(e) = pump_task.await {
            warn!(error = %e, "notification pump failed");
        }
        self.transition(ControllerState::Stopped);
    }

    async fn wait_for_cache_sync(&self, stop: &CancellationToken) -> SyncOutcome {
        let deadline = tokio::time::sleep(self.config.cache_sync_timeout);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(self.config.sync_poll_interval);

        loop {
            tokio::select! {
                _ = stop.cancelled() => return SyncOutcome::Stopped,
                _ = &mut deadline => return SyncOutcome::TimedOut,
                _ = poll.tick() => {
                    if self.informer.has_synced() {
                        return SyncOutcome::Synced;
                    }
                }
            }
        }
    }

    async fn run_worker(&self, id: usize) {
        debug!(worker = id, "worker started");
        while self.process_next_item().await {}
        debug!(worker = id, "worker exiting");
    }

    /// Handle one key off the queue. Returns false when it is time to quit.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let _done = DoneGuard {
            queue: &self.queue,
            key: key.clone(),
        };

        let attempt = self.queue.num_requeues(&key);
        let span = start_reconcile_span(&key, attempt);
        let started = Instant::now();

        let outcome = match self.reconcile(&key).instrument(span.clone()).await {
            Ok(reconciled) => {
                self.queue.forget(&key);
                reconciled.label()
            }
            Err(err) => span.in_scope(|| self.handle_error(&key, attempt, &err)),
        };

        record_outcome(&span, outcome);
        let labels = [KeyValue::new("outcome", outcome)];
        metrics::reconcile_total().add(1, &labels);
        metrics::reconcile_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &labels);
        true
    }

    async fn reconcile(&self, key: &ResourceKey) -> std::result::Result<Reconciled, ReconcileError> {
        let resource = self
            .informer
            .get_by_key(key)
            .map_err(|source| ReconcileError::Lookup {
                key: key.clone(),
                source,
            })?;
        let Some(resource) = resource else {
            debug!(%key, "resource no longer exists, dropping");
            return Ok(Reconciled::Dropped);
        };

        let Some(updated) = self.handler.process(&resource).await? else {
            return Ok(Reconciled::Unchanged);
        };

        let written = self
            .store
            .update(updated)
            .await
            .map_err(|source| ReconcileError::WriteConflict {
                key: key.clone(),
                source,
            })?;
        info!(%key, version = %written.resource_version, "resource updated");
        Ok(Reconciled::Updated)
    }

    /// Retry `key` with backoff, or give up once it has failed too often.
    fn handle_error(&self, key: &ResourceKey, attempt: u32, err: &ReconcileError) -> &'static str {
        let reason = err.reason();
        if self.queue.num_requeues(key) < MAX_RETRIES {
            warn!(%key, attempt, reason, error = %err, "reconcile failed, will retry");
            self.recorder.record(Event::new(
                key.clone(),
                EventType::Warning,
                reason,
                format!("Error processing {key} (will retry): {err}"),
            ));
            self.queue.add_rate_limited(key.clone());
            "retry"
        } else {
            error!(%key, attempt, reason, error = %err, "reconcile failed, giving up");
            self.recorder.record(Event::new(
                key.clone(),
                EventType::Warning,
                reason,
                format!("Error processing {key} (giving up): {err}"),
            ));
            self.queue.forget(key);
            "gave_up"
        }
    }
}
