//! In-memory snapshot store implementation.
//!
//! Reference implementation suitable for tests and development. Superseded
//! snapshots are retained so versioned loads (`at_or_before`) keep working;
//! production implementations may prune them.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, RwLock},
};

use super::{Snapshot, SnapshotPolicy, SnapshotStore};

type SnapshotMap = HashMap<SnapshotKey, Vec<Snapshot>>;

/// In-memory snapshot store with a configurable policy.
#[derive(Debug, Clone)]
pub struct Store {
    snapshots: Arc<RwLock<SnapshotMap>>,
    policy: SnapshotPolicy,
}

impl Store {
    /// Create a store that snapshots every `n` events.
    #[must_use]
    pub fn every(n: u64) -> Self {
        Self::with_policy(SnapshotPolicy::EveryN(n))
    }

    /// Create a load-only store that never takes new snapshots.
    #[must_use]
    pub fn never() -> Self {
        Self::with_policy(SnapshotPolicy::Never)
    }

    /// Create a store with an explicit policy.
    #[must_use]
    pub fn with_policy(policy: SnapshotPolicy) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }
}

impl SnapshotStore for Store {
    type Error = Infallible;

    fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    #[tracing::instrument(skip(self))]
    async fn load(
        &self,
        aggregate_kind: &str,
        aggregate_id: &str,
        at_or_before: Option<i64>,
    ) -> Result<Option<Snapshot>, Self::Error> {
        let key = SnapshotKey::new(aggregate_kind, aggregate_id);
        let snapshot = {
            let snapshots = self.snapshots.read().expect("snapshot store lock poisoned");
            snapshots.get(&key).and_then(|versions| {
                versions
                    .iter()
                    .filter(|s| at_or_before.is_none_or(|v| s.version <= v))
                    .max_by_key(|s| s.version)
                    .cloned()
            })
        };
        tracing::trace!(found = snapshot.is_some(), "snapshot lookup");
        Ok(snapshot)
    }

    #[tracing::instrument(skip(self, snapshot), fields(version = snapshot.version))]
    async fn save(&self, snapshot: Snapshot) -> Result<(), Self::Error> {
        let key = SnapshotKey::new(&snapshot.aggregate_kind, &snapshot.aggregate_id);
        let mut snapshots = self
            .snapshots
            .write()
            .expect("snapshot store lock poisoned");
        let versions = snapshots.entry(key).or_default();
        // Superseded snapshots stay; same-version saves replace in place.
        versions.retain(|s| s.version != snapshot.version);
        versions.push(snapshot);
        drop(snapshots);
        tracing::debug!("snapshot saved");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SnapshotKey {
    aggregate_kind: String,
    aggregate_id: String,
}

impl SnapshotKey {
    fn new(aggregate_kind: &str, aggregate_id: &str) -> Self {
        Self {
            aggregate_kind: aggregate_kind.to_string(),
            aggregate_id: aggregate_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(version: i64) -> Snapshot {
        Snapshot {
            aggregate_kind: "counter".to_string(),
            aggregate_id: "c1".to_string(),
            version,
            state: serde_json::json!({ "value": version }),
        }
    }

    #[tokio::test]
    async fn load_returns_none_for_missing() {
        let store = Store::every(5);
        let result = store.load("counter", "c1", None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn load_returns_latest_snapshot() {
        let store = Store::every(5);
        store.save(snapshot(4)).await.unwrap();
        store.save(snapshot(9)).await.unwrap();

        let loaded = store.load("counter", "c1", None).await.unwrap().unwrap();
        assert_eq!(loaded.version, 9);
    }

    #[tokio::test]
    async fn load_respects_at_or_before() {
        let store = Store::every(5);
        store.save(snapshot(4)).await.unwrap();
        store.save(snapshot(9)).await.unwrap();

        let loaded = store.load("counter", "c1", Some(7)).await.unwrap().unwrap();
        assert_eq!(loaded.version, 4);

        let none = store.load("counter", "c1", Some(3)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn save_replaces_same_version() {
        let store = Store::every(5);
        store.save(snapshot(4)).await.unwrap();

        let mut replacement = snapshot(4);
        replacement.state = serde_json::json!({ "value": 99 });
        store.save(replacement.clone()).await.unwrap();

        let loaded = store.load("counter", "c1", None).await.unwrap().unwrap();
        assert_eq!(loaded, replacement);
    }

    #[tokio::test]
    async fn streams_are_isolated_by_kind_and_id() {
        let store = Store::every(5);
        store.save(snapshot(4)).await.unwrap();

        assert!(store.load("counter", "c2", None).await.unwrap().is_none());
        assert!(store.load("rocket", "c1", None).await.unwrap().is_none());
    }
}
