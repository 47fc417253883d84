//! Background delivery workers.
//!
//! A [`DrainWorker`] owns one queue in the publishing table and drains it to
//! its subscribers. [`PeriodicTrigger`] runs a worker on a fixed interval
//! until stopped, and [`TaskQueue`] is a small awaitable work queue for
//! pipelines that push jobs instead of polling.
//!
//! A subscriber failure is logged and reported, then the drain moves on to
//! the next event; a poison event never stalls its queue.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::sync::{broadcast, oneshot, Semaphore};

use crate::publish::{
    Notifier, PublishingTable, SubscriberRegistry, SubscriberResolver, UnknownWorker,
};

/// Outcome of one [`DrainWorker::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The queue was drained; `processed` events were handled.
    Drained {
        /// Number of events delivered in this pass.
        processed: usize,
    },
    /// Another pass of this worker is already running; nothing was done.
    Busy,
}

/// A failed delivery attempt, as reported on a trigger's failure channel.
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    /// The worker that hit the failure.
    pub worker_id: String,
    /// The event kind that could not be delivered.
    pub kind: String,
    /// The subscriber's error, rendered.
    pub message: String,
}

/// Drains one publishing-table queue into a set of subscribers.
///
/// At most one drain pass runs at a time per worker. Overlapping callers
/// (a slow periodic tick, a manual kick) observe [`ProcessOutcome::Busy`]
/// instead of processing events concurrently, so per-queue ordering holds.
pub struct DrainWorker<R = SubscriberRegistry> {
    worker_id: String,
    table: Arc<PublishingTable>,
    notifier: Notifier<R>,
    running: Mutex<()>,
}

impl<R: SubscriberResolver> DrainWorker<R> {
    /// Create a worker and register its queue with the table.
    ///
    /// # Errors
    ///
    /// Returns an error when `worker_id` is already registered.
    pub fn register(
        worker_id: &str,
        table: Arc<PublishingTable>,
        notifier: Notifier<R>,
    ) -> Result<Self, crate::publish::WorkerAlreadyRegistered> {
        table.register_worker(worker_id)?;
        Ok(Self {
            worker_id: worker_id.to_string(),
            table,
            notifier,
            running: Mutex::new(()),
        })
    }

    /// This worker's queue id.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Drain the queue, delivering each pending event to its subscribers.
    ///
    /// A failing event is logged, reported on `failures` when a channel is
    /// given, and skipped; the drain continues with the next event.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownWorker`] when the worker's queue has been removed
    /// from the table.
    pub fn process(
        &self,
        failures: Option<&broadcast::Sender<WorkerFailure>>,
    ) -> Result<ProcessOutcome, UnknownWorker> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::trace!(worker_id = %self.worker_id, "drain already in progress");
            return Ok(ProcessOutcome::Busy);
        };

        let mut processed = 0;
        while let Some(envelope) = self.table.dequeue(&self.worker_id)? {
            if let Err(e) = self.notifier.dispatch(&envelope) {
                tracing::error!(
                    worker_id = %self.worker_id,
                    kind = %envelope.kind,
                    error = %e,
                    "delivery failed, skipping event"
                );
                if let Some(failures) = failures {
                    // Nobody listening is fine.
                    let _ = failures.send(WorkerFailure {
                        worker_id: self.worker_id.clone(),
                        kind: envelope.kind.clone(),
                        message: e.to_string(),
                    });
                }
                continue;
            }
            processed += 1;
        }

        if processed > 0 {
            tracing::debug!(worker_id = %self.worker_id, processed, "queue drained");
        }
        Ok(ProcessOutcome::Drained { processed })
    }
}

/// Per-worker trigger intervals with a global default.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    default_interval: Duration,
    overrides: HashMap<String, Duration>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(1),
            overrides: HashMap::new(),
        }
    }
}

impl TriggerConfig {
    /// Config with the given default interval for every worker.
    #[must_use]
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            overrides: HashMap::new(),
        }
    }

    /// Override the interval for one worker.
    #[must_use]
    pub fn with_interval(mut self, worker_id: &str, interval: Duration) -> Self {
        self.overrides.insert(worker_id.to_string(), interval);
        self
    }

    /// The interval `worker_id` should be triggered at.
    #[must_use]
    pub fn interval_for(&self, worker_id: &str) -> Duration {
        self.overrides
            .get(worker_id)
            .copied()
            .unwrap_or(self.default_interval)
    }
}

/// Runs a [`DrainWorker`] on a fixed interval until stopped.
pub struct PeriodicTrigger;

impl PeriodicTrigger {
    /// Spawn the trigger loop for `worker`.
    ///
    /// Ticks do not overlap; a tick that fires while the previous drain is
    /// still running sees [`ProcessOutcome::Busy`] and is skipped.
    pub fn spawn<R>(worker: Arc<DrainWorker<R>>, interval: Duration) -> TriggerHandle
    where
        R: SubscriberResolver + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let (failure_tx, _) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let failures = failure_tx.clone();
        let loop_running = Arc::clone(&running);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = worker.process(Some(&failures)) {
                            tracing::error!(error = %e, "worker queue gone, stopping trigger");
                            break;
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::debug!(worker_id = %worker.worker_id(), "trigger stopped");
                        break;
                    }
                }
            }
            loop_running.store(false, Ordering::SeqCst);
        });

        TriggerHandle {
            stop: stop_tx,
            task,
            failure_tx,
            running,
        }
    }
}

/// Handle to a spawned [`PeriodicTrigger`] loop.
pub struct TriggerHandle {
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
    failure_tx: broadcast::Sender<WorkerFailure>,
    running: Arc<AtomicBool>,
}

impl TriggerHandle {
    /// Whether the trigger loop is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to delivery failures hit by this trigger's worker.
    #[must_use]
    pub fn failures(&self) -> broadcast::Receiver<WorkerFailure> {
        self.failure_tx.subscribe()
    }

    /// Stop the trigger loop and wait for it to finish.
    pub async fn stop(self) {
        // The loop may already have exited on its own.
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

/// An awaitable multi-producer work queue.
///
/// `pop` waits until an item is available or the queue is closed, and is
/// safe to use inside `select!`: a cancelled `pop` never loses an item.
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Semaphore,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Semaphore::new(0),
        }
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.items
            .lock()
            .expect("task queue lock poisoned")
            .push_back(item);
        self.ready.add_permits(1);
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().expect("task queue lock poisoned").len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<T> {
        match self.ready.acquire().await {
            Ok(permit) => {
                permit.forget();
                let item = self
                    .items
                    .lock()
                    .expect("task queue lock poisoned")
                    .pop_front();
                debug_assert!(item.is_some(), "permit issued without a queued item");
                item
            }
            // Closed; hand out the backlog directly.
            Err(_) => self
                .items
                .lock()
                .expect("task queue lock poisoned")
                .pop_front(),
        }
    }

    /// Take the next item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        match self.ready.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.items
                    .lock()
                    .expect("task queue lock poisoned")
                    .pop_front()
            }
            Err(tokio::sync::TryAcquireError::Closed) => self
                .items
                .lock()
                .expect("task queue lock poisoned")
                .pop_front(),
            Err(tokio::sync::TryAcquireError::NoPermits) => None,
        }
    }

    /// Close the queue. Queued items can still be popped; waiting `pop`
    /// calls return once the backlog is gone.
    pub fn close(&self) {
        self.ready.close();
    }
}
