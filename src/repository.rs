//! Event-sourcing repository.
//!
//! `Repository` orchestrates the storage providers: loading aggregates
//! (snapshot + tail replay, or full replay), saving them with optimistic
//! concurrency, triggering threshold snapshots, and handing newly committed
//! events to the publishing sink.
//!
//! The repository never retries: conflicts mean "reload and retry" for the
//! caller, infrastructure failures carry their classification so the caller
//! can pick a policy.

use nonempty::NonEmpty;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    aggregate::{Aggregate, AggregateRoot, ReplayError, SnapshotStateError},
    error::{Classification, Classify},
    event::NEW_STREAM,
    id::AggregateId,
    publish::{EventSink, NullSink},
    snapshot::SnapshotStore,
    store::{CommitError, ConcurrencyConflict, EventStore},
};

/// Error from loading an aggregate.
#[derive(Debug, Error)]
pub enum LoadError<StoreError, SnapshotError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
{
    /// Stored history could not be replayed into the aggregate.
    #[error("failed to rebuild aggregate state: {0}")]
    Replay(#[from] ReplayError),
    /// The event store failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// The snapshot store failed.
    #[error("snapshot store error: {0}")]
    Snapshot(#[source] SnapshotError),
}

impl<E, SE> Classify for LoadError<E, SE>
where
    E: std::error::Error + 'static,
    SE: std::error::Error + 'static,
{
    fn classification(&self) -> Classification {
        match self {
            Self::Replay(_) => Classification::Validation,
            Self::Store(_) | Self::Snapshot(_) => Classification::Infrastructure,
        }
    }
}

/// Error from saving an aggregate.
#[derive(Debug, Error)]
pub enum SaveError<StoreError, SnapshotError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
{
    /// Another writer committed first; nothing was appended. Reload and
    /// retry.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// The event store failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// The threshold snapshot could not be persisted. The events themselves
    /// were committed and published.
    #[error("snapshot store error: {0}")]
    Snapshot(#[source] SnapshotError),
    /// The threshold snapshot could not be materialized from the aggregate.
    /// The events themselves were committed and published.
    #[error(transparent)]
    SnapshotState(#[from] SnapshotStateError),
}

impl<E, SE> Classify for SaveError<E, SE>
where
    E: std::error::Error + 'static,
    SE: std::error::Error + 'static,
{
    fn classification(&self) -> Classification {
        match self {
            Self::Conflict(_) => Classification::Conflict,
            Self::Store(_) | Self::Snapshot(_) => Classification::Infrastructure,
            Self::SnapshotState(_) => Classification::Validation,
        }
    }
}

/// Repository over an event store, a snapshot store, and a publishing sink.
pub struct Repository<S, SS, P = NullSink> {
    store: S,
    snapshots: SS,
    publisher: P,
}

impl<S, SS> Repository<S, SS>
where
    S: EventStore,
    SS: SnapshotStore,
{
    /// Create a repository with no event publishing wired.
    #[must_use]
    pub const fn new(store: S, snapshots: SS) -> Self {
        Self {
            store,
            snapshots,
            publisher: NullSink,
        }
    }
}

impl<S, SS, P> Repository<S, SS, P>
where
    S: EventStore,
    SS: SnapshotStore,
    P: EventSink,
{
    /// Wire a publishing sink that receives each newly committed event.
    #[must_use]
    pub fn with_publisher<P2: EventSink>(self, publisher: P2) -> Repository<S, SS, P2> {
        Repository {
            store: self.store,
            snapshots: self.snapshots,
            publisher,
        }
    }

    /// The underlying event store.
    #[must_use]
    pub const fn event_store(&self) -> &S {
        &self.store
    }

    /// The underlying snapshot store.
    #[must_use]
    pub const fn snapshot_store(&self) -> &SS {
        &self.snapshots
    }

    /// Load an aggregate, optionally pinned to a historic version.
    ///
    /// Uses the latest snapshot at or before the requested version as the
    /// replay starting point when one exists, then replays only the event
    /// tail after it. Returns `Ok(None)` when the stream has no events and
    /// no snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Store`] when the event store fails,
    /// [`LoadError::Snapshot`] when the snapshot store fails, or
    /// [`LoadError::Replay`] when stored data cannot be decoded.
    pub async fn get<A>(
        &self,
        id: &AggregateId,
        version: Option<i64>,
    ) -> Result<Option<AggregateRoot<A>>, LoadError<S::Error, SS::Error>>
    where
        A: Aggregate + DeserializeOwned,
    {
        let id_str = id.to_string();

        let snapshot = self
            .snapshots
            .load(A::KIND, &id_str, version)
            .await
            .map_err(LoadError::Snapshot)?;

        let mut root = AggregateRoot::<A>::new(*id);
        let mut start_version = 0;
        let from_snapshot = snapshot.is_some();
        if let Some(snapshot) = snapshot {
            root.apply_snapshot(&snapshot)?;
            start_version = snapshot.version + 1;
        }

        let count = version.map_or(u64::MAX, |v| {
            u64::try_from(v - start_version + 1).unwrap_or(0)
        });

        let tail = self
            .store
            .events(A::KIND, &id_str, start_version, count)
            .await
            .map_err(LoadError::Store)?;

        match tail {
            Some(events) => {
                root.replay(&events)?;
                if events.is_empty() && !from_snapshot && root.current_version() == NEW_STREAM {
                    // Known stream key but nothing replayable at this version.
                    return Ok(None);
                }
            }
            None if !from_snapshot => return Ok(None),
            None => {}
        }

        tracing::debug!(
            aggregate_kind = A::KIND,
            version = root.current_version(),
            from_snapshot,
            "aggregate loaded"
        );
        Ok(Some(root))
    }

    /// Commit an aggregate's uncommitted events.
    ///
    /// Performs the optimistic-concurrency check against the stream tail,
    /// appends atomically, publishes each newly committed event into the
    /// sink exactly once, and takes a snapshot when the configured
    /// event-count threshold (events since the last snapshot) is crossed.
    ///
    /// Saving an aggregate with no pending events is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Conflict`] when another writer committed first
    /// (nothing is appended; reload and retry), [`SaveError::Store`] on
    /// storage failure, and [`SaveError::Snapshot`] /
    /// [`SaveError::SnapshotState`] when the post-commit threshold snapshot
    /// fails (the events themselves are already durable).
    pub async fn save<A>(
        &self,
        root: &mut AggregateRoot<A>,
    ) -> Result<(), SaveError<S::Error, SS::Error>>
    where
        A: Aggregate + Serialize,
    {
        let Some(batch) = NonEmpty::from_vec(root.uncommitted_events().to_vec()) else {
            return Ok(());
        };
        let id_str = root.id().to_string();
        let expected = root.last_committed_version();

        let tail = self
            .store
            .last_event(A::KIND, &id_str)
            .await
            .map_err(SaveError::Store)?;
        let actual = tail.map_or(NEW_STREAM, |e| e.version());
        if actual != expected {
            return Err(ConcurrencyConflict { expected, actual }.into());
        }

        let event_count = batch.len();
        let published = batch.clone();
        self.store
            .commit(A::KIND, &id_str, expected, batch)
            .await
            .map_err(|e| match e {
                CommitError::Conflict(conflict) => SaveError::Conflict(conflict),
                CommitError::Store(e) => SaveError::Store(e),
            })?;
        root.mark_changes_committed();
        tracing::debug!(
            aggregate_kind = A::KIND,
            event_count,
            version = root.current_version(),
            "aggregate saved"
        );

        for envelope in published {
            self.publisher.submit(envelope);
        }

        self.maybe_snapshot(root).await
    }

    /// Take a snapshot when the events accumulated since the last one cross
    /// the store's threshold.
    async fn maybe_snapshot<A>(
        &self,
        root: &AggregateRoot<A>,
    ) -> Result<(), SaveError<S::Error, SS::Error>>
    where
        A: Aggregate + Serialize,
    {
        let policy = self.snapshots.policy();
        if policy.frequency().is_none() {
            return Ok(());
        }

        let id_str = root.id().to_string();
        let last_snapshot_version = self
            .snapshots
            .load(A::KIND, &id_str, None)
            .await
            .map_err(SaveError::Snapshot)?
            .map_or(NEW_STREAM, |s| s.version);

        let events_since =
            u64::try_from(root.current_version() - last_snapshot_version).unwrap_or(0);
        if !policy.should_snapshot(events_since) {
            return Ok(());
        }

        let snapshot = root.snapshot()?;
        self.snapshots
            .save(snapshot)
            .await
            .map_err(SaveError::Snapshot)?;
        tracing::debug!(
            aggregate_kind = A::KIND,
            version = root.current_version(),
            events_since,
            "threshold snapshot taken"
        );
        Ok(())
    }
}
