//! Snapshot support for shortcutting aggregate replay.
//!
//! A [`Snapshot`] is a materialized copy of aggregate state at a given
//! version. Loading an aggregate from a snapshot plus the event tail after it
//! must converge to the same state as a full replay. This module provides:
//!
//! - [`Snapshot`] - point-in-time aggregate state
//! - [`SnapshotStore`] - persistence contract with an event-count threshold
//! - [`SnapshotPolicy`] - when to accept new snapshots
//! - [`inmemory`] - reference implementation for testing and development

use std::future::Future;

use serde::{Deserialize, Serialize};

pub mod inmemory;

/// Point-in-time snapshot of aggregate state.
///
/// `version` is the position of the last event reflected in the snapshot
/// (`>= 0`; an empty stream has no snapshot). Snapshots are superseded by
/// later ones, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tag identifying the owning aggregate type ([`Aggregate::KIND`]).
    ///
    /// [`Aggregate::KIND`]: crate::aggregate::Aggregate::KIND
    pub aggregate_kind: String,
    /// Serialized id of the owning aggregate.
    pub aggregate_id: String,
    /// Position of the last event reflected in this snapshot.
    pub version: i64,
    /// Flattened aggregate state.
    pub state: serde_json::Value,
}

/// Policy deciding when a new snapshot should be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Snapshot once at least `n` events accumulated since the last snapshot.
    EveryN(u64),
    /// Never snapshot (load-only mode).
    Never,
}

impl SnapshotPolicy {
    /// Whether a snapshot should be taken given the events accumulated since
    /// the last one.
    #[must_use]
    pub const fn should_snapshot(&self, events_since: u64) -> bool {
        match self {
            Self::EveryN(threshold) => events_since >= *threshold,
            Self::Never => false,
        }
    }

    /// The event-count threshold, or `None` when snapshotting is disabled.
    #[must_use]
    pub const fn frequency(&self) -> Option<u64> {
        match self {
            Self::EveryN(threshold) => Some(*threshold),
            Self::Never => None,
        }
    }
}

/// Persistence contract for snapshots.
///
/// Satisfiable by the in-memory reference implementation and by durable
/// backends; the repository only relies on the semantics below.
pub trait SnapshotStore: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The snapshotting policy this store applies.
    fn policy(&self) -> SnapshotPolicy;

    /// Load the most recent snapshot for an aggregate, optionally restricted
    /// to versions at or before `at_or_before`.
    ///
    /// Returns `Ok(None)` when no qualifying snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the lookup fails.
    fn load<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a str,
        at_or_before: Option<i64>,
    ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send + 'a;

    /// Persist a snapshot, superseding earlier ones at lower versions.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when persistence fails.
    fn save(&self, snapshot: Snapshot)
        -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
