//! On-demand snapshot creation.
//!
//! [`Snapshotter`] rebuilds an aggregate at a requested version from its
//! event stream and persists the result as a snapshot. Aggregate kinds are
//! registered up front; an id is mapped to its kind through a
//! [`TypeResolver`], so the service can be driven with nothing but an id
//! and a version (for example from a background queue of commit
//! notifications).

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

use serde::Serialize;
use thiserror::Error;

use crate::{
    aggregate::{Aggregate, AggregateRoot, ReplayError, SnapshotStateError},
    error::{Classification, Classify},
    id::AggregateId,
    snapshot::{Snapshot, SnapshotStore},
    store::EventStore,
};

/// Maps an aggregate id to the kind of aggregate it identifies.
pub trait TypeResolver: Send + Sync {
    /// The aggregate kind for `id`, or `None` when the id is unknown.
    fn kind_for(&self, id: &AggregateId) -> Option<String>;
}

impl<T: TypeResolver> TypeResolver for Arc<T> {
    fn kind_for(&self, id: &AggregateId) -> Option<String> {
        self.as_ref().kind_for(id)
    }
}

/// A [`TypeResolver`] backed by an in-memory map, populated as aggregates
/// are created.
#[derive(Debug, Default)]
pub struct KindMap {
    kinds: RwLock<HashMap<AggregateId, String>>,
}

impl KindMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record which kind `id` belongs to.
    pub fn record(&self, id: AggregateId, kind: &str) {
        self.kinds
            .write()
            .expect("kind map lock poisoned")
            .insert(id, kind.to_string());
    }
}

impl TypeResolver for KindMap {
    fn kind_for(&self, id: &AggregateId) -> Option<String> {
        self.kinds
            .read()
            .expect("kind map lock poisoned")
            .get(id)
            .cloned()
    }
}

/// Error from creating a snapshot.
#[derive(Debug, Error)]
pub enum CreateSnapshotError<StoreError, SnapshotError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
{
    /// The id could not be resolved to a kind, or has no event stream.
    #[error("unknown aggregate {id}")]
    UnknownAggregate {
        /// The unresolvable id.
        id: AggregateId,
    },
    /// The stream does not (yet) contain the requested version.
    #[error("version {requested} not available, stream is at {available}")]
    VersionUnavailable {
        /// The version the snapshot was requested at.
        requested: i64,
        /// The last version present in the stream.
        available: i64,
    },
    /// Stored history could not be replayed.
    #[error(transparent)]
    Replay(#[from] ReplayError),
    /// The rebuilt aggregate could not be serialized.
    #[error(transparent)]
    State(#[from] SnapshotStateError),
    /// The event store failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// The snapshot store failed.
    #[error("snapshot store error: {0}")]
    SnapshotStore(#[source] SnapshotError),
}

impl<E, SE> Classify for CreateSnapshotError<E, SE>
where
    E: std::error::Error + 'static,
    SE: std::error::Error + 'static,
{
    fn classification(&self) -> Classification {
        match self {
            Self::UnknownAggregate { .. } => Classification::NotFound,
            Self::VersionUnavailable { .. } | Self::Replay(_) | Self::State(_) => {
                Classification::Validation
            }
            Self::Store(_) | Self::SnapshotStore(_) => Classification::Infrastructure,
        }
    }
}

type MaterializeFuture<E> = Pin<Box<dyn Future<Output = Result<Snapshot, E>> + Send>>;
type Materializer<E> = Box<dyn Fn(AggregateId, Option<i64>) -> MaterializeFuture<E> + Send + Sync>;

/// Rebuilds aggregates from their streams and persists snapshots of them.
pub struct Snapshotter<S, SS, R>
where
    S: EventStore,
    SS: SnapshotStore,
{
    store: Arc<S>,
    snapshots: Arc<SS>,
    resolver: R,
    materializers: HashMap<&'static str, Materializer<CreateSnapshotError<S::Error, SS::Error>>>,
}

impl<S, SS, R> Snapshotter<S, SS, R>
where
    S: EventStore + 'static,
    SS: SnapshotStore + 'static,
    R: TypeResolver,
{
    /// Create a snapshotter with no registered aggregate kinds.
    #[must_use]
    pub fn new(store: Arc<S>, snapshots: Arc<SS>, resolver: R) -> Self {
        Self {
            store,
            snapshots,
            resolver,
            materializers: HashMap::new(),
        }
    }

    /// Register an aggregate kind as snapshot-capable.
    ///
    /// Ids resolving to unregistered kinds are skipped rather than failed,
    /// so aggregates without a useful snapshot representation can share the
    /// same notification pipeline.
    #[must_use]
    pub fn register<A>(mut self) -> Self
    where
        A: Aggregate + Serialize + Send + 'static,
        A::Event: Send,
    {
        let store = Arc::clone(&self.store);
        let snapshots = Arc::clone(&self.snapshots);
        let materializer: Materializer<_> = Box::new(move |id, version| {
            let store = Arc::clone(&store);
            let snapshots = Arc::clone(&snapshots);
            Box::pin(async move {
                let id_str = id.to_string();
                let count = version.map_or(u64::MAX, |v| u64::try_from(v + 1).unwrap_or(0));
                let events = store
                    .events(A::KIND, &id_str, 0, count)
                    .await
                    .map_err(CreateSnapshotError::Store)?
                    .ok_or(CreateSnapshotError::UnknownAggregate { id })?;

                let mut root = AggregateRoot::<A>::new(id);
                root.replay(&events)?;
                if let Some(requested) = version {
                    if root.current_version() != requested {
                        return Err(CreateSnapshotError::VersionUnavailable {
                            requested,
                            available: root.current_version(),
                        });
                    }
                } else if root.current_version() < 0 {
                    return Err(CreateSnapshotError::UnknownAggregate { id });
                }

                let snapshot = root.snapshot()?;
                snapshots
                    .save(snapshot.clone())
                    .await
                    .map_err(CreateSnapshotError::SnapshotStore)?;
                tracing::debug!(
                    aggregate_kind = A::KIND,
                    version = snapshot.version,
                    "snapshot created"
                );
                Ok(snapshot)
            })
        });
        self.materializers.insert(A::KIND, materializer);
        self
    }

    /// Rebuild the aggregate identified by `id` and persist a snapshot of it
    /// at `version`, or at the current stream tail when `version` is `None`.
    ///
    /// Returns `Ok(None)` when the id resolves to a kind that is not
    /// registered as snapshot-capable.
    ///
    /// # Errors
    ///
    /// Returns [`CreateSnapshotError::UnknownAggregate`] when the id cannot
    /// be resolved or has no stream,
    /// [`CreateSnapshotError::VersionUnavailable`] when the stream is
    /// shorter than the requested version, and the store variants on
    /// infrastructure failure.
    pub async fn create_snapshot_from(
        &self,
        id: &AggregateId,
        version: Option<i64>,
    ) -> Result<Option<Snapshot>, CreateSnapshotError<S::Error, SS::Error>> {
        let kind = self
            .resolver
            .kind_for(id)
            .ok_or(CreateSnapshotError::UnknownAggregate { id: *id })?;

        let Some(materializer) = self.materializers.get(kind.as_str()) else {
            tracing::debug!(aggregate_kind = %kind, "kind not snapshot-capable, skipping");
            return Ok(None);
        };

        materializer(*id, version).await.map(Some)
    }
}
