//! Shared test fixtures: a small counter aggregate.

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::Aggregate,
    event::{DomainEvent, EventDecodeError, EventKind as _, EventSet},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ValueAdded {
    pub amount: i64,
}

impl DomainEvent for ValueAdded {
    const KIND: &'static str = "value-added";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ValueSubtracted {
    pub amount: i64,
}

impl DomainEvent for ValueSubtracted {
    const KIND: &'static str = "value-subtracted";
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CounterEvent {
    Added(ValueAdded),
    Subtracted(ValueSubtracted),
}

impl EventSet for CounterEvent {
    const KINDS: &'static [&'static str] = &[ValueAdded::KIND, ValueSubtracted::KIND];

    fn kind(&self) -> &'static str {
        match self {
            Self::Added(e) => e.kind(),
            Self::Subtracted(e) => e.kind(),
        }
    }

    fn schema_version(&self) -> u32 {
        match self {
            Self::Added(e) => e.schema_version(),
            Self::Subtracted(e) => e.schema_version(),
        }
    }

    fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Added(e) => serde_json::to_value(e),
            Self::Subtracted(e) => serde_json::to_value(e),
        }
    }

    fn decode(kind: &str, data: &serde_json::Value) -> Result<Self, EventDecodeError> {
        let payload = |source| EventDecodeError::Payload {
            kind: kind.to_string(),
            source,
        };
        match kind {
            ValueAdded::KIND => serde_json::from_value(data.clone())
                .map(Self::Added)
                .map_err(payload),
            ValueSubtracted::KIND => serde_json::from_value(data.clone())
                .map(Self::Subtracted)
                .map_err(payload),
            other => Err(EventDecodeError::UnknownKind {
                kind: other.to_string(),
                expected: Self::KINDS,
            }),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Counter {
    pub value: i64,
}

impl Aggregate for Counter {
    const KIND: &'static str = "counter";
    type Event = CounterEvent;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CounterEvent::Added(e) => self.value += e.amount,
            CounterEvent::Subtracted(e) => self.value -= e.amount,
        }
    }
}

pub(crate) fn added(amount: i64) -> CounterEvent {
    CounterEvent::Added(ValueAdded { amount })
}

pub(crate) fn subtracted(amount: i64) -> CounterEvent {
    CounterEvent::Subtracted(ValueSubtracted { amount })
}
