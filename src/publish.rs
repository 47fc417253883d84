//! Committed-event fan-out and dispatch.
//!
//! The [`PublishingTable`] replicates each committed event, once, into every
//! registered consumer's private FIFO queue. Delivery is at-least-once with
//! de-duplication on the `(aggregate id, target version)` key; the seen-set
//! lives behind the same lock as the queues, so concurrent enqueues from
//! different command handlers cannot double-deliver.
//!
//! The [`Notifier`] resolves subscriber instances for an event's kind and
//! invokes them, propagating failures to the caller (the background drain
//! loop, which logs and moves on to the next event).

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use thiserror::Error;

use crate::{
    error::{Classification, Classify},
    event::{Envelope, EventKey},
};

/// Boundary through which the repository submits newly committed events.
pub trait EventSink: Send + Sync {
    /// Submit one committed event for delivery.
    fn submit(&self, envelope: Envelope);
}

/// Sink that discards everything; the default when no publishing is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn submit(&self, _envelope: Envelope) {}
}

/// Error from worker registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("worker `{0}` is already registered")]
pub struct WorkerAlreadyRegistered(pub String);

impl Classify for WorkerAlreadyRegistered {
    fn classification(&self) -> Classification {
        Classification::Validation
    }
}

/// Error from queue operations naming an unregistered worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no worker registered under `{0}`")]
pub struct UnknownWorker(pub String);

impl Classify for UnknownWorker {
    fn classification(&self) -> Classification {
        Classification::NotFound
    }
}

struct TableInner {
    queues: HashMap<String, VecDeque<Envelope>>,
    seen: HashSet<EventKey>,
}

/// Fan-out table: one private FIFO per registered worker plus a global
/// de-duplication record.
///
/// Invariant: a given event key is enqueued into each worker queue at most
/// once for the table's lifetime, however many times [`enqueue`] is called
/// with it.
///
/// [`enqueue`]: PublishingTable::enqueue
pub struct PublishingTable {
    inner: Mutex<TableInner>,
}

impl PublishingTable {
    /// Create an empty table with no workers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                queues: HashMap::new(),
                seen: HashSet::new(),
            }),
        }
    }

    /// Register a dedicated queue for a named consumer.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerAlreadyRegistered`] if the id is taken; workers are
    /// never re-registered.
    pub fn register_worker(&self, worker_id: &str) -> Result<(), WorkerAlreadyRegistered> {
        let mut inner = self.inner.lock().expect("publishing table lock poisoned");
        if inner.queues.contains_key(worker_id) {
            return Err(WorkerAlreadyRegistered(worker_id.to_string()));
        }
        inner.queues.insert(worker_id.to_string(), VecDeque::new());
        tracing::debug!(worker_id, "worker registered");
        Ok(())
    }

    /// Replicate an event into every registered worker queue, unless its key
    /// has been seen before.
    ///
    /// Returns `true` when the event was newly delivered, `false` for a
    /// duplicate.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        let key = envelope.key();
        let mut inner = self.inner.lock().expect("publishing table lock poisoned");
        if !inner.seen.insert(key) {
            tracing::trace!(
                aggregate_id = %envelope.aggregate_id,
                target_version = envelope.target_version,
                "duplicate event ignored"
            );
            return false;
        }
        for queue in inner.queues.values_mut() {
            queue.push_back(envelope.clone());
        }
        tracing::trace!(
            aggregate_id = %envelope.aggregate_id,
            target_version = envelope.target_version,
            workers = inner.queues.len(),
            "event fanned out"
        );
        true
    }

    /// Non-blocking pop from one worker's queue.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownWorker`] for an unregistered id.
    pub fn dequeue(&self, worker_id: &str) -> Result<Option<Envelope>, UnknownWorker> {
        let mut inner = self.inner.lock().expect("publishing table lock poisoned");
        inner
            .queues
            .get_mut(worker_id)
            .ok_or_else(|| UnknownWorker(worker_id.to_string()))
            .map(VecDeque::pop_front)
    }

    /// The head of one worker's queue, without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownWorker`] for an unregistered id.
    pub fn peek(&self, worker_id: &str) -> Result<Option<Envelope>, UnknownWorker> {
        let inner = self.inner.lock().expect("publishing table lock poisoned");
        inner
            .queues
            .get(worker_id)
            .ok_or_else(|| UnknownWorker(worker_id.to_string()))
            .map(|queue| queue.front().cloned())
    }

    /// Number of events pending for one worker.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownWorker`] for an unregistered id.
    pub fn pending(&self, worker_id: &str) -> Result<usize, UnknownWorker> {
        let inner = self.inner.lock().expect("publishing table lock poisoned");
        inner
            .queues
            .get(worker_id)
            .ok_or_else(|| UnknownWorker(worker_id.to_string()))
            .map(VecDeque::len)
    }
}

impl Default for PublishingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for PublishingTable {
    fn submit(&self, envelope: Envelope) {
        self.enqueue(envelope);
    }
}

impl<T: EventSink> EventSink for Arc<T> {
    fn submit(&self, envelope: Envelope) {
        (**self).submit(envelope);
    }
}

/// Error type subscribers may return from [`Subscriber::handle`].
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A consumer of committed events.
///
/// Subscribers declare the event kinds they handle; the notifier invokes
/// [`handle`](Subscriber::handle) for each matching event. Payload decoding
/// happens inside the subscriber (via the envelope's `data`), keeping the
/// dispatch path type-erased.
pub trait Subscriber: Send + Sync {
    /// The event kinds this subscriber wants to receive.
    fn event_kinds(&self) -> &'static [&'static str];

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Failures propagate to the drain loop, which logs them and continues
    /// with the next event.
    fn handle(&self, envelope: &Envelope) -> Result<(), SubscriberError>;
}

/// Collaborator resolving subscriber instances for an event kind.
pub trait SubscriberResolver: Send + Sync {
    /// The subscribers interested in `kind`; empty when nobody cares.
    fn resolve(&self, kind: &str) -> Vec<Arc<dyn Subscriber>>;
}

/// Default resolver: a startup-built map from event kind to subscribers.
#[derive(Default)]
pub struct SubscriberRegistry {
    by_kind: HashMap<String, Vec<Arc<dyn Subscriber>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber under each event kind it declares.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        for kind in subscriber.event_kinds() {
            self.by_kind
                .entry((*kind).to_string())
                .or_default()
                .push(Arc::clone(&subscriber));
        }
    }
}

impl SubscriberResolver for SubscriberRegistry {
    fn resolve(&self, kind: &str) -> Vec<Arc<dyn Subscriber>> {
        self.by_kind.get(kind).cloned().unwrap_or_default()
    }
}

/// Error from notifier dispatch.
#[derive(Debug, Error)]
#[error("subscriber failed handling `{kind}`: {source}")]
pub struct NotifyError {
    /// The event kind being dispatched.
    pub kind: String,
    /// The subscriber's failure.
    #[source]
    pub source: SubscriberError,
}

/// Dispatches events to the subscribers resolved for their kind.
pub struct Notifier<R = SubscriberRegistry> {
    resolver: R,
}

impl<R: SubscriberResolver> Notifier<R> {
    /// Create a notifier over a resolver.
    pub const fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Dispatch one event to every matching subscriber.
    ///
    /// Events with no interested subscribers are dropped silently.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] on the first subscriber failure; remaining
    /// subscribers for this event are not invoked.
    pub fn dispatch(&self, envelope: &Envelope) -> Result<(), NotifyError> {
        for subscriber in self.resolver.resolve(&envelope.kind) {
            subscriber.handle(envelope).map_err(|source| NotifyError {
                kind: envelope.kind.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
