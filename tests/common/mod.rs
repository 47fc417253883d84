//! Shared integration-test fixture: a small bank-account aggregate.
#![allow(dead_code)]

use everlog::{Aggregate, DomainEvent, EventDecodeError, EventSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposited {
    pub amount: i64,
}

impl DomainEvent for Deposited {
    const KIND: &'static str = "deposited";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrew {
    pub amount: i64,
}

impl DomainEvent for Withdrew {
    const KIND: &'static str = "withdrew";
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    Deposited(Deposited),
    Withdrew(Withdrew),
}

impl EventSet for AccountEvent {
    const KINDS: &'static [&'static str] = &[Deposited::KIND, Withdrew::KIND];

    fn kind(&self) -> &'static str {
        match self {
            Self::Deposited(_) => Deposited::KIND,
            Self::Withdrew(_) => Withdrew::KIND,
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Deposited(e) => serde_json::to_value(e),
            Self::Withdrew(e) => serde_json::to_value(e),
        }
    }

    fn decode(kind: &str, data: &serde_json::Value) -> Result<Self, EventDecodeError> {
        let payload = |source| EventDecodeError::Payload {
            kind: kind.to_string(),
            source,
        };
        match kind {
            Deposited::KIND => serde_json::from_value(data.clone())
                .map(Self::Deposited)
                .map_err(payload),
            Withdrew::KIND => serde_json::from_value(data.clone())
                .map(Self::Withdrew)
                .map_err(payload),
            other => Err(EventDecodeError::UnknownKind {
                kind: other.to_string(),
                expected: Self::KINDS,
            }),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: i64,
}

impl Aggregate for Account {
    const KIND: &'static str = "account";
    type Event = AccountEvent;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::Deposited(e) => self.balance += e.amount,
            AccountEvent::Withdrew(e) => self.balance -= e.amount,
        }
    }
}

pub fn deposited(amount: i64) -> AccountEvent {
    AccountEvent::Deposited(Deposited { amount })
}

pub fn withdrew(amount: i64) -> AccountEvent {
    AccountEvent::Withdrew(Withdrew { amount })
}
