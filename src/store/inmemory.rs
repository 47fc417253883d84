//! In-memory event store implementation for testing.
//!
//! Thread-safe reference implementation of [`EventStore`](super::EventStore)
//! keeping streams in a hash map. Suitable for unit tests, examples, and
//! dev mode; not durable.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;

use crate::{
    event::{Envelope, NEW_STREAM},
    store::{CommitError, Committed, ConcurrencyConflict, EventStore, StreamKey},
};

/// In-memory event store keeping one `Vec<Envelope>` per stream.
#[derive(Debug, Clone, Default)]
pub struct Store {
    streams: Arc<RwLock<HashMap<StreamKey, Vec<Envelope>>>>,
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tail_version(stream: &[Envelope]) -> i64 {
        stream.last().map_or(NEW_STREAM, Envelope::version)
    }
}

impl EventStore for Store {
    type Error = Infallible;

    #[tracing::instrument(skip(self))]
    async fn events(
        &self,
        aggregate_kind: &str,
        aggregate_id: &str,
        start_version: i64,
        count: u64,
    ) -> Result<Option<Vec<Envelope>>, Self::Error> {
        let key = StreamKey::new(aggregate_kind, aggregate_id);
        let page = {
            let streams = self.streams.read().expect("in-memory store lock poisoned");
            streams.get(&key).map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.version() >= start_version)
                    .take(usize::try_from(count).unwrap_or(usize::MAX))
                    .cloned()
                    .collect::<Vec<_>>()
            })
        };
        tracing::trace!(
            events_loaded = page.as_ref().map_or(0, Vec::len),
            known_stream = page.is_some(),
            "loaded events"
        );
        Ok(page)
    }

    #[tracing::instrument(skip(self))]
    async fn last_event(
        &self,
        aggregate_kind: &str,
        aggregate_id: &str,
    ) -> Result<Option<Envelope>, Self::Error> {
        let key = StreamKey::new(aggregate_kind, aggregate_id);
        let streams = self.streams.read().expect("in-memory store lock poisoned");
        Ok(streams.get(&key).and_then(|s| s.last().cloned()))
    }

    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    async fn commit(
        &self,
        aggregate_kind: &str,
        aggregate_id: &str,
        expected_version: i64,
        events: NonEmpty<Envelope>,
    ) -> Result<Committed, CommitError<Self::Error>> {
        let key = StreamKey::new(aggregate_kind, aggregate_id);
        let mut streams = self.streams.write().expect("in-memory store lock poisoned");

        // A rejected commit must not leave an empty stream behind.
        let actual = streams.get(&key).map_or(NEW_STREAM, |s| Self::tail_version(s));
        if actual != expected_version {
            tracing::debug!(expected_version, actual, "version mismatch, rejecting commit");
            return Err(ConcurrencyConflict {
                expected: expected_version,
                actual,
            }
            .into());
        }

        let last_version = events.last().version();
        streams.entry(key).or_default().extend(events);
        drop(streams);
        tracing::debug!(last_version, "events committed to stream");
        Ok(Committed { last_version })
    }
}
