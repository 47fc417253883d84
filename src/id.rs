//! Aggregate identity.
//!
//! Every aggregate is keyed by an [`AggregateId`], a validated UUID wrapper.
//! Ids are compared by value and never empty: construction either generates a
//! fresh v4 id or parses an existing one, rejecting nil and malformed input
//! up front.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{Classification, Classify};

/// Error returned when an aggregate id fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidAggregateId {
    /// The input was empty or whitespace-only.
    #[error("aggregate id must not be empty")]
    Empty,
    /// The input was the nil UUID, which is reserved.
    #[error("aggregate id must not be the nil uuid")]
    Nil,
    /// The input was not a valid UUID.
    #[error("aggregate id is not a valid uuid: {0}")]
    Malformed(#[source] uuid::Error),
}

impl Classify for InvalidAggregateId {
    fn classification(&self) -> Classification {
        Classification::Validation
    }
}

/// Value type identifying one aggregate stream.
///
/// Wraps a non-nil UUID. The serialized form ([`Display`](fmt::Display)) is
/// what appears in [`Envelope::aggregate_id`](crate::event::Envelope) and in
/// snapshot records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidAggregateId`] for empty, nil, or malformed input. An
    /// id is never partially constructed.
    pub fn parse(input: &str) -> Result<Self, InvalidAggregateId> {
        if input.trim().is_empty() {
            return Err(InvalidAggregateId::Empty);
        }
        let uuid = Uuid::parse_str(input).map_err(InvalidAggregateId::Malformed)?;
        if uuid.is_nil() {
            return Err(InvalidAggregateId::Nil);
        }
        Ok(Self(uuid))
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AggregateId {
    type Err = InvalidAggregateId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<AggregateId> for String {
    fn from(id: AggregateId) -> Self {
        id.to_string()
    }
}
