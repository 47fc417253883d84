//! End-to-end flow: commands in, events committed, fanned out to a worker,
//! projected, and snapshotted from a background queue.

mod common;

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use common::{deposited, Account, Deposited, Withdrew};
use everlog::{
    publish::{Subscriber, SubscriberError},
    snapshot::inmemory::Store as SnapshotStore,
    snapshot::SnapshotStore as _,
    snapshotter::KindMap,
    store::inmemory::Store as EventStore,
    worker::ProcessOutcome,
    Aggregate, AggregateId, AggregateRoot, Classification, Classify, Command, CommandProcessor,
    CorrelationScope, DomainEvent, DrainWorker, Envelope, HandlerError, Notifier, PublishingTable,
    Repository,
    Snapshotter, SubscriberRegistry, TaskQueue,
};

type AccountRepository = Repository<EventStore, SnapshotStore, Arc<PublishingTable>>;

struct DepositFunds {
    account: AggregateId,
    amount: i64,
}

impl Command for DepositFunds {
    const NAME: &'static str = "deposit-funds";

    fn aggregate_id(&self) -> AggregateId {
        self.account
    }
}

struct WithdrawFunds {
    account: AggregateId,
    amount: i64,
    expected_version: i64,
}

impl Command for WithdrawFunds {
    const NAME: &'static str = "withdraw-funds";

    fn aggregate_id(&self) -> AggregateId {
        self.account
    }

    fn expected_version(&self) -> Option<i64> {
        Some(self.expected_version)
    }
}

struct BalanceProjection {
    balance: AtomicI64,
}

impl Subscriber for BalanceProjection {
    fn event_kinds(&self) -> &'static [&'static str] {
        &[Deposited::KIND, Withdrew::KIND]
    }

    fn handle(&self, envelope: &Envelope) -> Result<(), SubscriberError> {
        let amount = envelope.data["amount"]
            .as_i64()
            .ok_or("malformed amount")?;
        if envelope.kind == Withdrew::KIND {
            self.balance.fetch_sub(amount, Ordering::SeqCst);
        } else {
            self.balance.fetch_add(amount, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct Pipeline {
    repository: Arc<AccountRepository>,
    processor: CommandProcessor,
    table: Arc<PublishingTable>,
    kinds: Arc<KindMap>,
}

fn pipeline() -> Pipeline {
    let table = Arc::new(PublishingTable::new());
    let kinds = Arc::new(KindMap::new());
    let repository = Arc::new(
        Repository::new(EventStore::new(), SnapshotStore::never())
            .with_publisher(Arc::clone(&table)),
    );

    let mut processor = CommandProcessor::new();
    {
        let repository = Arc::clone(&repository);
        let kinds = Arc::clone(&kinds);
        processor
            .register(move |command: DepositFunds| {
                let repository = Arc::clone(&repository);
                let kinds = Arc::clone(&kinds);
                async move {
                    let mut account = match repository
                        .get::<Account>(&command.account, None)
                        .await
                        .map_err(HandlerError::from_classified)?
                    {
                        Some(account) => account,
                        None => {
                            kinds.record(command.account, Account::KIND);
                            AggregateRoot::new(command.account)
                        }
                    };
                    account
                        .record(deposited(command.amount))
                        .map_err(|e| HandlerError::new(Classification::Validation, e))?;
                    repository
                        .save(&mut account)
                        .await
                        .map_err(HandlerError::from_classified)
                }
            })
            .unwrap();
    }
    {
        let repository = Arc::clone(&repository);
        processor
            .register(move |command: WithdrawFunds| {
                let repository = Arc::clone(&repository);
                async move {
                    let mut account = repository
                        .get::<Account>(&command.account, None)
                        .await
                        .map_err(HandlerError::from_classified)?
                        .ok_or_else(|| {
                            HandlerError::new(Classification::NotFound, "no such account")
                        })?;
                    if command
                        .expected_version()
                        .is_some_and(|v| v != account.current_version())
                    {
                        return Err(HandlerError::new(
                            Classification::Conflict,
                            "account changed since it was read",
                        ));
                    }
                    if account.state().balance < command.amount {
                        return Err(HandlerError::new(
                            Classification::Validation,
                            "insufficient funds",
                        ));
                    }
                    account
                        .record(common::withdrew(command.amount))
                        .map_err(|e| HandlerError::new(Classification::Validation, e))?;
                    repository
                        .save(&mut account)
                        .await
                        .map_err(HandlerError::from_classified)
                }
            })
            .unwrap();
    }

    Pipeline {
        repository,
        processor,
        table,
        kinds,
    }
}

#[tokio::test]
async fn commands_flow_through_to_a_projection() {
    let pipeline = pipeline();
    let projection = Arc::new(BalanceProjection {
        balance: AtomicI64::new(0),
    });
    let mut registry = SubscriberRegistry::new();
    registry.subscribe(Arc::clone(&projection) as Arc<dyn Subscriber>);
    let worker = DrainWorker::register(
        "projections",
        Arc::clone(&pipeline.table),
        Notifier::new(registry),
    )
    .unwrap();

    let account = AggregateId::new();
    let (scope, _guard) = CorrelationScope::with_correlation();
    assert!(scope.current().is_some());

    pipeline
        .processor
        .execute(
            DepositFunds {
                account,
                amount: 100,
            },
            &scope,
        )
        .await
        .unwrap();
    pipeline
        .processor
        .execute(
            WithdrawFunds {
                account,
                amount: 30,
                expected_version: 0,
            },
            &scope,
        )
        .await
        .unwrap();

    let outcome = worker.process(None).unwrap();
    assert_eq!(outcome, ProcessOutcome::Drained { processed: 2 });
    assert_eq!(projection.balance.load(Ordering::SeqCst), 70);

    let stored = pipeline
        .repository
        .get::<Account>(&account, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state().balance, 70);
}

#[tokio::test]
async fn stale_command_version_is_rejected() {
    let pipeline = pipeline();
    let scope = CorrelationScope::new();
    let account = AggregateId::new();

    pipeline
        .processor
        .execute(
            DepositFunds {
                account,
                amount: 100,
            },
            &scope,
        )
        .await
        .unwrap();
    pipeline
        .processor
        .execute(
            DepositFunds {
                account,
                amount: 100,
            },
            &scope,
        )
        .await
        .unwrap();

    // A caller who read the account at version 0 must not withdraw blind.
    let err = pipeline
        .processor
        .execute(
            WithdrawFunds {
                account,
                amount: 50,
                expected_version: 0,
            },
            &scope,
        )
        .await
        .unwrap_err();
    assert_eq!(err.classification(), Classification::Conflict);
}

#[tokio::test]
async fn overdraft_fails_validation_and_is_broadcast() {
    let pipeline = pipeline();
    let scope = CorrelationScope::new();
    let mut failures = pipeline.processor.failures();
    let account = AggregateId::new();

    pipeline
        .processor
        .execute(
            DepositFunds {
                account,
                amount: 10,
            },
            &scope,
        )
        .await
        .unwrap();
    let err = pipeline
        .processor
        .execute(
            WithdrawFunds {
                account,
                amount: 50,
                expected_version: 0,
            },
            &scope,
        )
        .await
        .unwrap_err();
    assert_eq!(err.classification(), Classification::Validation);

    let failure = failures.try_recv().unwrap();
    assert_eq!(failure.command, "withdraw-funds");
    assert!(failure.message.contains("insufficient funds"));
}

#[tokio::test]
async fn commits_feed_a_background_snapshot_queue() {
    let pipeline = pipeline();
    let scope = CorrelationScope::new();
    let snapshots = Arc::new(SnapshotStore::every(1));
    let event_store = Arc::new(pipeline.repository.event_store().clone());
    let snapshotter = Snapshotter::new(
        Arc::clone(&event_store),
        Arc::clone(&snapshots),
        Arc::clone(&pipeline.kinds),
    )
    .register::<Account>();

    let jobs: Arc<TaskQueue<(AggregateId, i64)>> = Arc::new(TaskQueue::new());
    let account = AggregateId::new();

    for _ in 0..3 {
        pipeline
            .processor
            .execute(DepositFunds { account, amount: 5 }, &scope)
            .await
            .unwrap();
        let committed = pipeline
            .repository
            .get::<Account>(&account, None)
            .await
            .unwrap()
            .unwrap();
        jobs.push((account, committed.current_version()));
    }
    jobs.close();

    while let Some((id, version)) = jobs.pop().await {
        snapshotter
            .create_snapshot_from(&id, Some(version))
            .await
            .unwrap();
    }

    let latest = snapshots
        .load(Account::KIND, &account.to_string(), None)
        .await
        .unwrap()
        .expect("snapshot for the latest commit");
    assert_eq!(latest.version, 2);
    assert_eq!(latest.state, serde_json::json!({ "balance": 15 }));
}
