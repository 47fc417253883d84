//! Domain event model.
//!
//! Concrete event structs implement [`DomainEvent`]; each aggregate's event
//! sum type implements [`EventSet`], giving the runtime a closed, exhaustively
//! matched set of event kinds per aggregate. Committed events travel as
//! [`Envelope`] records: the serialized aggregate id, the target version, the
//! per-kind schema revision, and the payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel target version for the first event of a new (or unversioned)
/// stream.
pub const NEW_STREAM: i64 = -1;

/// Marker trait for persistable domain events.
///
/// Each event carries a unique [`Self::KIND`] identifier so stored payloads
/// can be routed back to the correct type, and a [`Self::SCHEMA_VERSION`]
/// revision for forward-compatible deserialization. Use lowercase kebab-case
/// kinds: `"funds-deposited"`, `"mission-aborted"`, etc.
pub trait DomainEvent {
    /// Unique event kind identifier.
    const KIND: &'static str;
    /// Schema revision of this event type. Bump when the payload shape
    /// changes in a way deserializers must distinguish.
    const SCHEMA_VERSION: u32 = 1;
}

/// Extension trait for reading the kind and schema version from an instance.
///
/// Blanket-implemented for every [`DomainEvent`]; never implement it
/// yourself.
pub trait EventKind {
    /// The event kind identifier.
    fn kind(&self) -> &'static str;
    /// The event schema revision.
    fn schema_version(&self) -> u32;
}

impl<T: DomainEvent> EventKind for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn schema_version(&self) -> u32 {
        T::SCHEMA_VERSION
    }
}

/// Error returned when decoding a stored event payload fails.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The event kind was not recognized by this event set.
    #[error("unknown event kind `{kind}`, expected one of {expected:?}")]
    UnknownKind {
        /// The unrecognized event kind string.
        kind: String,
        /// The kinds this event set can decode.
        expected: &'static [&'static str],
    },
    /// The payload could not be deserialized into the event type.
    #[error("failed to decode `{kind}` payload: {source}")]
    Payload {
        /// The event kind whose payload failed to decode.
        kind: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Closed sum type over one aggregate's domain events.
///
/// Implementations enumerate every kind the aggregate produces and provide
/// the encode/decode bridge between typed events and envelope payloads. A
/// hand-written implementation is a `match` per variant; because the set is
/// closed, an event kind without a replay arm is a compile error rather than
/// a runtime discovery failure.
pub trait EventSet: Sized {
    /// Every event kind in this set.
    const KINDS: &'static [&'static str];

    /// The kind of this event instance.
    fn kind(&self) -> &'static str;

    /// The schema revision of this event instance.
    fn schema_version(&self) -> u32;

    /// Serialize the event payload.
    ///
    /// # Errors
    ///
    /// Returns a serde error if the payload cannot be serialized.
    fn encode(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Deserialize an event from its stored kind and payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::UnknownKind`] if the kind is not in
    /// [`Self::KINDS`], or [`EventDecodeError::Payload`] if deserialization
    /// fails.
    fn decode(kind: &str, data: &serde_json::Value) -> Result<Self, EventDecodeError>;
}

/// Immutable record of one committed (or about-to-be-committed) event.
///
/// `target_version` is the aggregate version the event is appended after;
/// [`NEW_STREAM`] marks the first event of a fresh stream. Envelopes are
/// created by [`AggregateRoot::record`](crate::aggregate::AggregateRoot::record),
/// held as uncommitted until the repository commits them, then persisted and
/// published exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Serialized id of the owning aggregate.
    pub aggregate_id: String,
    /// Aggregate version this event is appended after.
    pub target_version: i64,
    /// Schema revision of the payload.
    pub schema_version: u32,
    /// Event kind identifier.
    pub kind: String,
    /// Event payload.
    pub data: serde_json::Value,
}

impl Envelope {
    /// The stream position this event occupies (`target_version + 1`).
    #[must_use]
    pub const fn version(&self) -> i64 {
        self.target_version + 1
    }

    /// The de-duplication key for fan-out delivery.
    #[must_use]
    pub fn key(&self) -> EventKey {
        EventKey {
            aggregate_id: self.aggregate_id.clone(),
            target_version: self.target_version,
        }
    }
}

/// De-duplication key: one per `(aggregate id, target version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Serialized aggregate id.
    pub aggregate_id: String,
    /// Target version of the event.
    pub target_version: i64,
}
