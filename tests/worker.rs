//! Background workers draining the publishing table.

mod common;

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use common::{deposited, withdrew, Account, Deposited, Withdrew};
use everlog::{
    publish::{Subscriber, SubscriberError},
    snapshot::inmemory::Store as SnapshotStore,
    store::inmemory::Store as EventStore,
    worker::{ProcessOutcome, TriggerConfig},
    AggregateId, AggregateRoot, DomainEvent, DrainWorker, Envelope, Notifier, PeriodicTrigger,
    PublishingTable, Repository, SubscriberRegistry, TaskQueue,
};

/// Projects the running balance from the event feed.
struct BalanceProjection {
    balance: AtomicI64,
}

impl BalanceProjection {
    fn new() -> Self {
        Self {
            balance: AtomicI64::new(0),
        }
    }
}

impl Subscriber for BalanceProjection {
    fn event_kinds(&self) -> &'static [&'static str] {
        &[Deposited::KIND, Withdrew::KIND]
    }

    fn handle(&self, envelope: &Envelope) -> Result<(), SubscriberError> {
        let amount = envelope.data["amount"]
            .as_i64()
            .ok_or("malformed amount")?;
        let delta = if envelope.kind == Withdrew::KIND {
            -amount
        } else {
            amount
        };
        self.balance.fetch_add(delta, Ordering::SeqCst);
        Ok(())
    }
}

fn registry(projection: &Arc<BalanceProjection>) -> SubscriberRegistry {
    let mut registry = SubscriberRegistry::new();
    registry.subscribe(Arc::clone(projection) as Arc<dyn Subscriber>);
    registry
}

#[tokio::test]
async fn worker_projects_committed_events() {
    let table = Arc::new(PublishingTable::new());
    let projection = Arc::new(BalanceProjection::new());
    let worker =
        DrainWorker::register("projections", Arc::clone(&table), Notifier::new(registry(&projection)))
            .unwrap();

    let repo = Repository::new(EventStore::new(), SnapshotStore::never())
        .with_publisher(Arc::clone(&table));
    let mut account = AggregateRoot::<Account>::new(AggregateId::new());
    account.record(deposited(100)).unwrap();
    account.record(withdrew(40)).unwrap();
    repo.save(&mut account).await.unwrap();

    let outcome = worker.process(None).unwrap();
    assert_eq!(outcome, ProcessOutcome::Drained { processed: 2 });
    assert_eq!(projection.balance.load(Ordering::SeqCst), 60);
}

#[tokio::test(start_paused = true)]
async fn periodic_trigger_keeps_the_projection_current() {
    let table = Arc::new(PublishingTable::new());
    let projection = Arc::new(BalanceProjection::new());
    let worker = Arc::new(
        DrainWorker::register("projections", Arc::clone(&table), Notifier::new(registry(&projection)))
            .unwrap(),
    );

    let config = TriggerConfig::new(Duration::from_secs(1))
        .with_interval("projections", Duration::from_millis(100));
    let handle = PeriodicTrigger::spawn(
        Arc::clone(&worker),
        config.interval_for(worker.worker_id()),
    );

    let repo = Repository::new(EventStore::new(), SnapshotStore::never())
        .with_publisher(Arc::clone(&table));
    let mut account = AggregateRoot::<Account>::new(AggregateId::new());
    account.record(deposited(25)).unwrap();
    repo.save(&mut account).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(projection.balance.load(Ordering::SeqCst), 25);

    account.record(deposited(25)).unwrap();
    repo.save(&mut account).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(projection.balance.load(Ordering::SeqCst), 50);

    assert!(handle.is_running());
    handle.stop().await;
    assert!(!handle.is_running());
}

#[tokio::test]
async fn task_queue_feeds_a_consumer_across_tasks() {
    let queue = Arc::new(TaskQueue::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let consumer = {
        let queue = Arc::clone(&queue);
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Some(job) = queue.pop().await {
                seen.lock().unwrap().push(job);
            }
        })
    };

    for job in ["a", "b", "c"] {
        queue.push(job);
    }
    queue.close();
    consumer.await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
}
