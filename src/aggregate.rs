//! Aggregate contract and replay engine.
//!
//! An [`Aggregate`] is pure domain state rebuilt by applying events through
//! an exhaustive `match` in [`Aggregate::apply`]. The [`AggregateRoot`]
//! wrapper owns the runtime bookkeeping around it: version counters, the
//! uncommitted-event buffer, replay from history, and snapshot apply/extract.
//!
//! Separating "what changed" (the event set) from "how it is applied" (the
//! `apply` match) lets the same history be replayed deterministically any
//! number of times, which is what makes cold-start replay and snapshot+tail
//! replay converge to the same state.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    event::{Envelope, EventDecodeError, EventSet},
    id::AggregateId,
    snapshot::Snapshot,
};

/// Domain state reconstructed from an event stream.
///
/// `apply` mutates state for one event and must be total over the event set:
/// because [`Self::Event`] is a closed enum, a missing replay arm is a
/// compile error, not a runtime lookup failure.
pub trait Aggregate: Default {
    /// Aggregate type tag used by stores and snapshots.
    ///
    /// Use lowercase kebab-case: `"mission"`, `"crew-roster"`, etc.
    const KIND: &'static str;

    /// The closed set of events this aggregate produces and consumes.
    type Event: EventSet;

    /// Apply one event to update aggregate state.
    ///
    /// Called both during replay and when new events are recorded, so it must
    /// be deterministic and free of side effects.
    fn apply(&mut self, event: &Self::Event);
}

/// Error produced while rebuilding an aggregate from history or a snapshot.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A stored event payload could not be decoded into the event set.
    #[error("failed to decode stored event: {0}")]
    Decode(#[from] EventDecodeError),
    /// The snapshot belongs to a different aggregate type.
    #[error("snapshot is for aggregate kind `{found}`, expected `{expected}`")]
    KindMismatch {
        /// The kind this aggregate expects.
        expected: &'static str,
        /// The kind recorded in the snapshot.
        found: String,
    },
    /// The snapshot state could not be deserialized.
    #[error("failed to restore snapshot state: {0}")]
    SnapshotState(#[source] serde_json::Error),
}

/// Error produced when materializing a snapshot from a live aggregate.
#[derive(Debug, Error)]
pub enum SnapshotStateError {
    /// The aggregate still holds uncommitted events; snapshots capture only
    /// durably committed state.
    #[error("cannot snapshot an aggregate with uncommitted changes")]
    UncommittedChanges,
    /// The aggregate state could not be serialized.
    #[error("failed to serialize aggregate state: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// In-memory handle on one aggregate stream.
///
/// Tracks `current_version` (position of the last applied event, `-1` for a
/// fresh stream) and `last_committed_version` (high-water mark of what the
/// store has accepted). Invariant:
/// `current_version == last_committed_version + uncommitted.len()`.
///
/// Durable identity lives only in the event log and the latest snapshot; a
/// root is rebuilt from those on every load.
#[derive(Debug)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    state: A,
    current_version: i64,
    last_committed_version: i64,
    uncommitted: Vec<Envelope>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Create a fresh, unversioned root for a new stream.
    #[must_use]
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            state: A::default(),
            current_version: crate::event::NEW_STREAM,
            last_committed_version: crate::event::NEW_STREAM,
            uncommitted: Vec::new(),
        }
    }

    /// The aggregate's id.
    #[must_use]
    pub const fn id(&self) -> &AggregateId {
        &self.id
    }

    /// The reconstructed domain state.
    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    /// Position of the last applied event; `-1` for an empty stream.
    #[must_use]
    pub const fn current_version(&self) -> i64 {
        self.current_version
    }

    /// Position of the last event the store has durably accepted.
    #[must_use]
    pub const fn last_committed_version(&self) -> i64 {
        self.last_committed_version
    }

    /// Record a new domain event: applies it to state and buffers an
    /// envelope targeting the current version.
    ///
    /// # Errors
    ///
    /// Returns a serde error if the event payload cannot be serialized; the
    /// aggregate is left unchanged in that case.
    pub fn record(&mut self, event: A::Event) -> Result<(), serde_json::Error> {
        let envelope = Envelope {
            aggregate_id: self.id.to_string(),
            target_version: self.current_version,
            schema_version: event.schema_version(),
            kind: event.kind().to_string(),
            data: event.encode()?,
        };
        self.state.apply(&event);
        self.current_version += 1;
        self.uncommitted.push(envelope);
        Ok(())
    }

    /// Replay committed history in order, advancing both version counters.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Decode`] if a stored payload cannot be decoded.
    /// This is a programming or data defect, never retried.
    pub fn replay(&mut self, history: &[Envelope]) -> Result<(), ReplayError> {
        for envelope in history {
            let event = A::Event::decode(&envelope.kind, &envelope.data)?;
            self.state.apply(&event);
            self.current_version = envelope.version();
            self.last_committed_version = envelope.version();
        }
        Ok(())
    }

    /// Restore state from a snapshot, setting both version counters to the
    /// snapshot's version. Used as the replay starting point instead of a
    /// full replay from version 0.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::KindMismatch`] for a snapshot of another
    /// aggregate type, or [`ReplayError::SnapshotState`] when the captured
    /// state fails to deserialize (snapshot corruption).
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ReplayError>
    where
        A: DeserializeOwned,
    {
        if snapshot.aggregate_kind != A::KIND {
            return Err(ReplayError::KindMismatch {
                expected: A::KIND,
                found: snapshot.aggregate_kind.clone(),
            });
        }
        self.state = serde_json::from_value(snapshot.state.clone())
            .map_err(ReplayError::SnapshotState)?;
        self.current_version = snapshot.version;
        self.last_committed_version = snapshot.version;
        Ok(())
    }

    /// Materialize a snapshot of the committed state at the current version.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotStateError::UncommittedChanges`] while events are
    /// pending, or [`SnapshotStateError::Serialize`] if the state cannot be
    /// serialized.
    pub fn snapshot(&self) -> Result<Snapshot, SnapshotStateError>
    where
        A: Serialize,
    {
        if self.has_uncommitted_changes() {
            return Err(SnapshotStateError::UncommittedChanges);
        }
        Ok(Snapshot {
            aggregate_kind: A::KIND.to_string(),
            aggregate_id: self.id.to_string(),
            version: self.current_version,
            state: serde_json::to_value(&self.state).map_err(SnapshotStateError::Serialize)?,
        })
    }

    /// The buffered events awaiting commit, in recording order.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[Envelope] {
        &self.uncommitted
    }

    /// Whether any recorded events are awaiting commit.
    #[must_use]
    pub fn has_uncommitted_changes(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Clear the pending buffer after a successful commit and advance the
    /// committed high-water mark to the current version.
    pub fn mark_changes_committed(&mut self) {
        self.uncommitted.clear();
        self.last_committed_version = self.current_version;
    }
}
