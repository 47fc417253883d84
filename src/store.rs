//! Event-log persistence contract.
//!
//! [`EventStore`] is the narrow interface a storage provider must satisfy:
//! ordered reads, a tail probe for optimistic concurrency checks, and an
//! atomic, version-checked append. The reference implementation in
//! [`inmemory`] backs tests and development; durable providers implement the
//! same contract.

use std::future::Future;

pub use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    error::{Classification, Classify},
    event::{Envelope, NEW_STREAM},
};

pub mod inmemory;

/// Error indicating the stream tail moved between load and commit.
///
/// Another writer won the race. The caller must reload the aggregate and
/// retry; conflicting writes are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", format_conflict(*.expected, *.actual))]
pub struct ConcurrencyConflict {
    /// The tail version the writer expected ([`NEW_STREAM`] for an empty
    /// stream).
    pub expected: i64,
    /// The actual tail version found in the store.
    pub actual: i64,
}

fn format_conflict(expected: i64, actual: i64) -> String {
    if expected == NEW_STREAM {
        format!(
            "concurrency conflict: expected new stream, found version {actual} (hint: another \
             process created this aggregate; reload and retry)"
        )
    } else {
        format!(
            "concurrency conflict: expected version {expected}, found {actual} (hint: stream was \
             modified; reload and retry)"
        )
    }
}

/// Error from version-checked append operations.
#[derive(Debug, Error)]
pub enum CommitError<StoreError>
where
    StoreError: std::error::Error,
{
    /// Another writer modified the stream first.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<E: std::error::Error> Classify for CommitError<E> {
    fn classification(&self) -> Classification {
        match self {
            Self::Conflict(_) => Classification::Conflict,
            Self::Store(_) => Classification::Infrastructure,
        }
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    /// Position of the last event written in the batch.
    pub last_version: i64,
}

/// Abstraction over the append-only event log.
///
/// Streams are keyed by `(aggregate_kind, aggregate_id)`. Versions are event
/// positions starting at 0; an empty stream has tail version [`NEW_STREAM`].
pub trait EventStore: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load up to `count` events starting at `start_version`, in order.
    ///
    /// Returns `Ok(None)` when the stream has never been written, which the
    /// repository distinguishes from an empty page of a known stream.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the read fails.
    fn events<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a str,
        start_version: i64,
        count: u64,
    ) -> impl Future<Output = Result<Option<Vec<Envelope>>, Self::Error>> + Send + 'a;

    /// The most recent event of a stream, or `None` for an unwritten stream.
    ///
    /// Used for optimistic-concurrency checks and "is this a new stream"
    /// probes.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the read fails.
    fn last_event<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a str,
    ) -> impl Future<Output = Result<Option<Envelope>, Self::Error>> + Send + 'a;

    /// Atomically append a batch of events.
    ///
    /// The append must be rejected with [`ConcurrencyConflict`] when the
    /// stream's current tail version differs from `expected_version`
    /// ([`NEW_STREAM`] expects an empty stream). Either every event in the
    /// batch is appended or none is.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] on a version mismatch, or
    /// [`CommitError::Store`] when persistence fails.
    fn commit<'a>(
        &'a self,
        aggregate_kind: &'a str,
        aggregate_id: &'a str,
        expected_version: i64,
        events: NonEmpty<Envelope>,
    ) -> impl Future<Output = Result<Committed, CommitError<Self::Error>>> + Send + 'a;
}

/// Key identifying one event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StreamKey {
    aggregate_kind: String,
    aggregate_id: String,
}

impl StreamKey {
    pub(crate) fn new(aggregate_kind: &str, aggregate_id: &str) -> Self {
        Self {
            aggregate_kind: aggregate_kind.to_string(),
            aggregate_id: aggregate_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_on_existing_stream_mentions_versions() {
        let conflict = ConcurrencyConflict {
            expected: 5,
            actual: 10,
        };
        let msg = conflict.to_string();
        assert!(msg.contains("expected version 5"));
        assert!(msg.contains("10"));
        assert!(msg.contains("reload and retry"));
    }

    #[test]
    fn conflict_on_new_stream_mentions_hint() {
        let conflict = ConcurrencyConflict {
            expected: NEW_STREAM,
            actual: 0,
        };
        let msg = conflict.to_string();
        assert!(msg.contains("expected new stream"));
    }

    #[test]
    fn commit_error_classification() {
        let conflict: CommitError<std::io::Error> = ConcurrencyConflict {
            expected: 0,
            actual: 1,
        }
        .into();
        assert_eq!(conflict.classification(), Classification::Conflict);

        let store: CommitError<std::io::Error> =
            CommitError::Store(std::io::Error::other("disk gone"));
        assert_eq!(store.classification(), Classification::Infrastructure);
        assert!(store.classification().is_retryable());
    }
}
