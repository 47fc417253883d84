//! An event-sourcing runtime.
//!
//! Aggregates are rebuilt by replaying their event streams; writes append
//! new events under optimistic concurrency. Snapshots bound replay cost,
//! and a publishing table fans committed events out to background workers
//! with per-queue de-duplication.
//!
//! The storage seams ([`EventStore`] and [`SnapshotStore`]) are traits; the
//! crate ships in-memory implementations for tests and development.
//!
//! ```
//! use everlog::{
//!     snapshot::inmemory::Store as SnapshotStore, store::inmemory::Store as EventStore,
//!     Aggregate, AggregateId, AggregateRoot, DomainEvent, EventDecodeError, EventSet,
//!     Repository,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Deposited {
//!     amount: i64,
//! }
//!
//! impl DomainEvent for Deposited {
//!     const KIND: &'static str = "deposited";
//! }
//!
//! #[derive(Debug, Clone)]
//! enum AccountEvent {
//!     Deposited(Deposited),
//! }
//!
//! impl EventSet for AccountEvent {
//!     const KINDS: &'static [&'static str] = &[Deposited::KIND];
//!
//!     fn kind(&self) -> &'static str {
//!         Deposited::KIND
//!     }
//!
//!     fn schema_version(&self) -> u32 {
//!         1
//!     }
//!
//!     fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
//!         match self {
//!             Self::Deposited(e) => serde_json::to_value(e),
//!         }
//!     }
//!
//!     fn decode(kind: &str, data: &serde_json::Value) -> Result<Self, EventDecodeError> {
//!         match kind {
//!             Deposited::KIND => serde_json::from_value(data.clone())
//!                 .map(Self::Deposited)
//!                 .map_err(|source| EventDecodeError::Payload {
//!                     kind: kind.to_string(),
//!                     source,
//!                 }),
//!             other => Err(EventDecodeError::UnknownKind {
//!                 kind: other.to_string(),
//!                 expected: Self::KINDS,
//!             }),
//!         }
//!     }
//! }
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Account {
//!     balance: i64,
//! }
//!
//! impl Aggregate for Account {
//!     const KIND: &'static str = "account";
//!     type Event = AccountEvent;
//!
//!     fn apply(&mut self, event: &Self::Event) {
//!         match event {
//!             AccountEvent::Deposited(e) => self.balance += e.amount,
//!         }
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let repository = Repository::new(EventStore::new(), SnapshotStore::every(100));
//!
//! let id = AggregateId::new();
//! let mut account = AggregateRoot::<Account>::new(id);
//! account
//!     .record(AccountEvent::Deposited(Deposited { amount: 50 }))
//!     .unwrap();
//! repository.save(&mut account).await.unwrap();
//!
//! let loaded = repository.get::<Account>(&id, None).await.unwrap().unwrap();
//! assert_eq!(loaded.state().balance, 50);
//! # }
//! ```

pub mod aggregate;
pub mod command;
pub mod context;
pub mod error;
pub mod event;
pub mod id;
pub mod publish;
pub mod repository;
pub mod snapshot;
pub mod snapshotter;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use aggregate::{Aggregate, AggregateRoot};
pub use command::{Command, CommandProcessor, DuplicateHandler, HandlerError};
pub use context::{CorrelationScope, Scope};
pub use error::{Classification, Classify};
pub use event::{DomainEvent, Envelope, EventDecodeError, EventSet, NEW_STREAM};
pub use id::AggregateId;
pub use publish::{Notifier, PublishingTable, Subscriber, SubscriberRegistry};
pub use repository::Repository;
pub use snapshot::{Snapshot, SnapshotPolicy, SnapshotStore};
pub use snapshotter::{Snapshotter, TypeResolver};
pub use store::{EventStore, NonEmpty};
pub use worker::{DrainWorker, PeriodicTrigger, TaskQueue};
