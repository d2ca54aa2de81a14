use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use stockflow_core::{AggregateId, BranchId, DateRange, ExpectedVersion, ProductId, TenantId, UserId};
use stockflow_events::{EventEnvelope, InMemoryEventBus};
use stockflow_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use stockflow_infra::{
    InMemoryBranchDirectory, InMemoryUnitOfWork, NewTransfer, Transaction, TransferLine,
    TransferWorkflow, UnitOfWork,
};
use stockflow_ledger::InventoryLedger;
use stockflow_transfers::{TransferEvent, TransferRejected, TransferRequestId, TransferredLine};

type Workflow = TransferWorkflow<
    Arc<InMemoryUnitOfWork>,
    Arc<InMemoryBranchDirectory>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;

struct Setup {
    workflow: Workflow,
    tenant: TenantId,
    source: BranchId,
    destination: BranchId,
    product: ProductId,
    user: UserId,
}

impl Setup {
    fn new() -> Self {
        let tenant = TenantId::new();
        let (source, destination) = (BranchId::new(), BranchId::new());
        let product = ProductId::new();

        let branches = Arc::new(InMemoryBranchDirectory::new());
        branches.register(tenant, source);
        branches.register(tenant, destination);

        let uow = Arc::new(InMemoryUnitOfWork::new());
        uow.execute(|tx| {
            tx.ledger_mut()
                .update_inventory(tenant, source, product, 1_000_000_000, "bench stock")?;
            Ok(())
        })
        .unwrap();

        let bus = Arc::new(InMemoryEventBus::new());
        Self {
            workflow: TransferWorkflow::new(uow, branches, bus),
            tenant,
            source,
            destination,
            product,
            user: UserId::new(),
        }
    }

    fn create(&self, quantity: i64) -> TransferRequestId {
        self.workflow
            .create(NewTransfer {
                tenant_id: self.tenant,
                source_branch_id: self.source,
                destination_branch_id: self.destination,
                requested_by: self.user,
                items: vec![TransferLine {
                    product_id: self.product,
                    quantity,
                }],
                notes: None,
            })
            .unwrap()
            .request_id
    }
}

fn bench_transfer_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_lifecycle");

    group.bench_function("create", |b| {
        let setup = Setup::new();
        b.iter(|| black_box(setup.create(black_box(5))));
    });

    group.bench_function("create_approve_complete", |b| {
        let setup = Setup::new();
        b.iter(|| {
            let id = setup.create(5);
            let approved = setup
                .workflow
                .approve(setup.tenant, id, setup.user, None)
                .unwrap();
            let lines = approved
                .items
                .iter()
                .map(|i| TransferredLine {
                    item_id: i.item_id,
                    quantity_transferred: i.quantity_approved,
                })
                .collect();
            black_box(setup.workflow.complete(setup.tenant, id, lines).unwrap());
        });
    });

    group.finish();
}

/// Snapshot cloning and numbering both scale with how many requests the tenant already has.
fn bench_backlog_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("backlog_size");

    for backlog in [10usize, 100, 1000] {
        let setup = Setup::new();
        for _ in 0..backlog {
            setup.create(1);
        }

        group.bench_with_input(BenchmarkId::new("create", backlog), &backlog, |b, _| {
            b.iter(|| black_box(setup.create(1)));
        });

        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(BenchmarkId::new("history", backlog), &backlog, |b, _| {
            b.iter(|| {
                black_box(
                    setup
                        .workflow
                        .get_history(setup.tenant, setup.source, DateRange::unbounded())
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_append", batch_size),
            &batch_size,
            |b, &size| {
                let mut store = InMemoryEventStore::new();
                let tenant_id = TenantId::new();
                let aggregate_id = AggregateId::new();

                b.iter(|| {
                    let events: Vec<UncommittedEvent> = (0..size)
                        .map(|i| {
                            let event = TransferEvent::TransferRejected(TransferRejected {
                                tenant_id,
                                request_id: TransferRequestId::new(aggregate_id),
                                rejected_by: UserId::new(),
                                reason: format!("bench {i}"),
                                occurred_at: Utc::now(),
                            });
                            UncommittedEvent::from_typed(
                                tenant_id,
                                aggregate_id,
                                "transfers.request",
                                uuid::Uuid::now_v7(),
                                &event,
                            )
                            .unwrap()
                        })
                        .collect();

                    black_box(store.append(events, ExpectedVersion::Any).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_transfer_lifecycle,
    bench_backlog_size,
    bench_event_append_throughput
);
criterion_main!(benches);
