//! Unit of work: one closure of mutations that commits or rolls back as a whole.
//!
//! Every state-transition operation runs inside [`UnitOfWork::execute`]. The
//! request's events, its snapshot, and the ledger holds it implies are written
//! through the same [`Transaction`], so either all of them commit or none do.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use stockflow_ledger::{InMemoryInventoryLedger, InventoryLedger};
use stockflow_procurement::{ProcurementRequestId, ProcurementSnapshot};
use stockflow_transfers::{TransferRequestId, TransferSnapshot};

use crate::error::{WorkflowError, WorkflowResult};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Handles to everything a workflow may touch while a unit of work is open.
pub trait Transaction {
    type Ledger: InventoryLedger;
    type Events: EventStore;
    type Transfers: TenantStore<TransferRequestId, TransferSnapshot>;
    type Procurements: TenantStore<ProcurementRequestId, ProcurementSnapshot>;

    fn ledger(&self) -> &Self::Ledger;
    fn ledger_mut(&mut self) -> &mut Self::Ledger;

    fn events(&self) -> &Self::Events;
    fn events_mut(&mut self) -> &mut Self::Events;

    fn transfers(&self) -> &Self::Transfers;
    fn transfers_mut(&mut self) -> &mut Self::Transfers;

    fn procurements(&self) -> &Self::Procurements;
    fn procurements_mut(&mut self) -> &mut Self::Procurements;
}

/// Transaction boundary used by the workflows.
///
/// Units of work are serialized: two closures never observe each other's
/// uncommitted writes, and request numbers computed inside one are unique.
pub trait UnitOfWork: Send + Sync {
    type Tx: Transaction;

    /// Run `work` against a transaction. `Ok` commits every write it made;
    /// `Err` discards all of them.
    fn execute<T>(&self, work: impl FnOnce(&mut Self::Tx) -> WorkflowResult<T>) -> WorkflowResult<T>;

    /// Run a read against committed state.
    fn query<T>(&self, read: impl FnOnce(&Self::Tx) -> WorkflowResult<T>) -> WorkflowResult<T>;
}

impl<U> UnitOfWork for Arc<U>
where
    U: UnitOfWork,
{
    type Tx = U::Tx;

    fn execute<T>(&self, work: impl FnOnce(&mut Self::Tx) -> WorkflowResult<T>) -> WorkflowResult<T> {
        (**self).execute(work)
    }

    fn query<T>(&self, read: impl FnOnce(&Self::Tx) -> WorkflowResult<T>) -> WorkflowResult<T> {
        (**self).query(read)
    }
}

/// Complete in-memory state: ledger, event streams, and request snapshots.
#[derive(Debug, Default)]
pub struct InMemoryTransaction {
    ledger: InMemoryInventoryLedger,
    events: InMemoryEventStore,
    transfers: InMemoryTenantStore<TransferRequestId, TransferSnapshot>,
    procurements: InMemoryTenantStore<ProcurementRequestId, ProcurementSnapshot>,
}

impl Transaction for InMemoryTransaction {
    type Ledger = InMemoryInventoryLedger;
    type Events = InMemoryEventStore;
    type Transfers = InMemoryTenantStore<TransferRequestId, TransferSnapshot>;
    type Procurements = InMemoryTenantStore<ProcurementRequestId, ProcurementSnapshot>;

    fn ledger(&self) -> &Self::Ledger {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut Self::Ledger {
        &mut self.ledger
    }

    fn events(&self) -> &Self::Events {
        &self.events
    }

    fn events_mut(&mut self) -> &mut Self::Events {
        &mut self.events
    }

    fn transfers(&self) -> &Self::Transfers {
        &self.transfers
    }

    fn transfers_mut(&mut self) -> &mut Self::Transfers {
        &mut self.transfers
    }

    fn procurements(&self) -> &Self::Procurements {
        &self.procurements
    }

    fn procurements_mut(&mut self) -> &mut Self::Procurements {
        &mut self.procurements
    }
}

impl InMemoryTransaction {
    fn begin(&mut self) {
        self.ledger.begin();
        self.events.begin();
        self.transfers.begin();
        self.procurements.begin();
    }

    fn commit(&mut self) {
        self.ledger.commit();
        self.events.commit();
        self.transfers.commit();
        self.procurements.commit();
    }

    /// A no-op when nothing is journaled.
    fn rollback(&mut self) {
        self.ledger.rollback();
        self.events.rollback();
        self.transfers.rollback();
        self.procurements.rollback();
    }
}

/// In-memory unit of work for tests/dev.
///
/// `execute` journals every write the closure makes and undoes them on `Err`,
/// so a unit of work costs what it touches rather than the size of the state.
/// The mutex serializes units of work. A closure that panics leaves its
/// journal open; the next lock rolls it back and carries on.
#[derive(Debug, Default)]
pub struct InMemoryUnitOfWork {
    committed: Mutex<InMemoryTransaction>,
}

impl InMemoryUnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a pre-stocked ledger.
    pub fn with_ledger(mut ledger: InMemoryInventoryLedger) -> Self {
        ledger.commit();
        Self {
            committed: Mutex::new(InMemoryTransaction {
                ledger,
                ..InMemoryTransaction::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryTransaction> {
        match self.committed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.rollback();
                self.committed.clear_poison();
                warn!("unit of work recovered after a panic; its writes were discarded");
                guard
            }
        }
    }
}

impl UnitOfWork for InMemoryUnitOfWork {
    type Tx = InMemoryTransaction;

    fn execute<T>(&self, work: impl FnOnce(&mut Self::Tx) -> WorkflowResult<T>) -> WorkflowResult<T> {
        let mut state = self.lock();
        state.begin();
        match work(&mut state) {
            Ok(out) => {
                state.commit();
                Ok(out)
            }
            Err(e) => {
                state.rollback();
                debug!(error = %e, "unit of work rolled back");
                Err(e)
            }
        }
    }

    fn query<T>(&self, read: impl FnOnce(&Self::Tx) -> WorkflowResult<T>) -> WorkflowResult<T> {
        let state = self.lock();
        read(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::{BranchId, ProductId, TenantId};

    #[test]
    fn failed_work_leaves_committed_state_untouched() {
        let (tenant, branch, product) = (TenantId::new(), BranchId::new(), ProductId::new());
        let uow = InMemoryUnitOfWork::new();
        uow.execute(|tx| {
            tx.ledger_mut()
                .update_inventory(tenant, branch, product, 20, "opening balance")?;
            Ok(())
        })
        .unwrap();

        let result: WorkflowResult<()> = uow.execute(|tx| {
            tx.ledger_mut().reserve(tenant, branch, product, 15)?;
            // Second hold overdraws; the first must not survive either.
            tx.ledger_mut().reserve(tenant, branch, product, 10)?;
            Ok(())
        });
        assert!(matches!(result, Err(WorkflowError::LedgerOperationFailed(_))));

        let available = uow
            .query(|tx| Ok(tx.ledger().available(tenant, branch, product)?))
            .unwrap();
        assert_eq!(available, 20);
    }

    #[test]
    fn successful_work_commits() {
        let (tenant, branch, product) = (TenantId::new(), BranchId::new(), ProductId::new());
        let uow = Arc::new(InMemoryUnitOfWork::new());
        uow.execute(|tx| {
            tx.ledger_mut()
                .update_inventory(tenant, branch, product, 5, "opening balance")?;
            tx.ledger_mut().reserve(tenant, branch, product, 2)?;
            Ok(())
        })
        .unwrap();

        let level = uow
            .query(|tx| Ok(tx.ledger().level(tenant, branch, product)?))
            .unwrap();
        assert_eq!((level.on_hand, level.reserved), (5, 2));
    }

    #[test]
    fn panicking_work_is_discarded_and_the_unit_keeps_working() {
        let (tenant, branch, product) = (TenantId::new(), BranchId::new(), ProductId::new());
        let uow = InMemoryUnitOfWork::new();
        uow.execute(|tx| {
            tx.ledger_mut()
                .update_inventory(tenant, branch, product, 20, "opening balance")?;
            Ok(())
        })
        .unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            uow.execute(|tx| -> WorkflowResult<()> {
                tx.ledger_mut().reserve(tenant, branch, product, 15)?;
                panic!("work aborted midway");
            })
        }));
        assert!(outcome.is_err());

        let level = uow
            .query(|tx| Ok(tx.ledger().level(tenant, branch, product)?))
            .unwrap();
        assert_eq!((level.on_hand, level.reserved), (20, 0));

        uow.execute(|tx| {
            tx.ledger_mut().reserve(tenant, branch, product, 5)?;
            Ok(())
        })
        .unwrap();
        let available = uow
            .query(|tx| Ok(tx.ledger().available(tenant, branch, product)?))
            .unwrap();
        assert_eq!(available, 15);
    }
}
