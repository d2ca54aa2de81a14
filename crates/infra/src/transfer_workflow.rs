//! Branch-to-branch transfer workflow service.
//!
//! Each operation opens one unit of work, reads the ledger facts the decision
//! needs, dispatches the command to the `TransferRequest` aggregate, applies the
//! ledger effects its events imply, and stores the refreshed snapshot. Events are
//! published only after the unit of work commits.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use stockflow_core::{
    AggregateId, BranchId, DateRange, ProductId, RequestNumber, TRANSFER_PREFIX, TenantId, UserId,
};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_ledger::{InventoryLedger, LedgerError};
use stockflow_transfers::{
    ApproveTransfer, CancelTransfer, CompleteTransfer, CreateTransfer, NewTransferLine,
    RejectTransfer, StockAvailability, TransferCommand, TransferEvent, TransferItemId,
    TransferRequest, TransferRequestId, TransferSnapshot, TransferStatus, TransferredLine,
    demand_by_product,
};

use crate::branches::BranchDirectory;
use crate::command_dispatcher::{self, Dispatched};
use crate::error::{WorkflowError, WorkflowResult};
use crate::event_store::StoredEvent;
use crate::read_model::TenantStore;
use crate::stats::TransferStats;
use crate::unit_of_work::{Transaction, UnitOfWork};

/// Aggregate type recorded on every transfer stream.
pub const TRANSFER_AGGREGATE: &str = "transfers.request";

/// One requested line of a new transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub tenant_id: TenantId,
    pub source_branch_id: BranchId,
    pub destination_branch_id: BranchId,
    pub requested_by: UserId,
    pub items: Vec<TransferLine>,
    pub notes: Option<String>,
}

pub struct TransferWorkflow<U, D, B> {
    uow: U,
    branches: D,
    bus: B,
    prefix: String,
}

impl<U, D, B> TransferWorkflow<U, D, B>
where
    U: UnitOfWork,
    D: BranchDirectory,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(uow: U, branches: D, bus: B) -> Self {
        Self {
            uow,
            branches,
            bus,
            prefix: TRANSFER_PREFIX.to_string(),
        }
    }

    /// Override the transfer number prefix (default `TRF`).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Create a pending transfer after an advisory availability check at the source.
    #[instrument(skip_all, fields(tenant = %input.tenant_id))]
    pub fn create(&self, input: NewTransfer) -> WorkflowResult<TransferSnapshot> {
        let tenant_id = input.tenant_id;
        for branch_id in [input.source_branch_id, input.destination_branch_id] {
            if !self.branches.contains(tenant_id, branch_id) {
                return Err(WorkflowError::not_found("branch", branch_id));
            }
        }

        let request_id = TransferRequestId::new(AggregateId::new());
        let lines: Vec<NewTransferLine> = input
            .items
            .iter()
            .map(|line| NewTransferLine {
                item_id: TransferItemId::new(),
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect();

        let result = self.uow.execute(|tx| {
            let now = Utc::now();
            let transfer_number = next_transfer_number(tx, tenant_id, &self.prefix, now);
            let availability = read_availability(
                tx.ledger(),
                tenant_id,
                input.source_branch_id,
                lines.iter().map(|l| (l.product_id, l.quantity)),
            )?;

            let command = TransferCommand::Create(CreateTransfer {
                tenant_id,
                request_id,
                transfer_number,
                source_branch_id: input.source_branch_id,
                destination_branch_id: input.destination_branch_id,
                requested_by: input.requested_by,
                lines,
                availability,
                notes: input.notes,
                occurred_at: now,
            });
            commit_transition(tx, tenant_id, request_id, &command)
        });

        let (snapshot, committed) = result
            .inspect_err(|e| warn!(error = %e, "transfer creation rejected"))?;
        command_dispatcher::publish(&self.bus, &committed)?;
        info!(
            request_id = %snapshot.request_id,
            transfer_number = %snapshot.transfer_number,
            source = %snapshot.source_branch_id,
            destination = %snapshot.destination_branch_id,
            "transfer request created"
        );
        Ok(snapshot)
    }

    /// Re-check availability, then reserve every item's requested quantity at the source.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn approve(
        &self,
        tenant_id: TenantId,
        request_id: TransferRequestId,
        approved_by: UserId,
        notes: Option<String>,
    ) -> WorkflowResult<TransferSnapshot> {
        let result = self.uow.execute(|tx| {
            let availability = match tx.transfers().get(tenant_id, &request_id) {
                Some(current) if current.status == TransferStatus::Pending => read_availability(
                    tx.ledger(),
                    tenant_id,
                    current.source_branch_id,
                    current.items.iter().map(|i| (i.product_id, i.quantity_requested)),
                )?,
                // The aggregate reports the missing request or illegal transition.
                _ => StockAvailability::new(),
            };

            let command = TransferCommand::Approve(ApproveTransfer {
                tenant_id,
                request_id,
                approved_by,
                availability,
                notes,
                occurred_at: Utc::now(),
            });
            commit_transition(tx, tenant_id, request_id, &command)
        });

        let (snapshot, committed) = result
            .inspect_err(|e| warn!(error = %e, "transfer approval rejected"))?;
        command_dispatcher::publish(&self.bus, &committed)?;
        info!(approved_by = %approved_by, items = snapshot.items.len(), "transfer request approved");
        Ok(snapshot)
    }

    /// Move the transferred quantities and release whatever was approved but not sent.
    ///
    /// Items missing from `lines` are treated as not transferred at all.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn complete(
        &self,
        tenant_id: TenantId,
        request_id: TransferRequestId,
        lines: Vec<TransferredLine>,
    ) -> WorkflowResult<TransferSnapshot> {
        let command = TransferCommand::Complete(CompleteTransfer {
            tenant_id,
            request_id,
            lines,
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "transfer completion rejected"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(
            units_transferred = snapshot.total_transferred(),
            "transfer request completed"
        );
        Ok(snapshot)
    }

    /// Reject a pending transfer. Nothing was reserved, so the ledger is not touched.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn reject(
        &self,
        tenant_id: TenantId,
        request_id: TransferRequestId,
        rejected_by: UserId,
        reason: &str,
    ) -> WorkflowResult<TransferSnapshot> {
        let command = TransferCommand::Reject(RejectTransfer {
            tenant_id,
            request_id,
            rejected_by,
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "transfer rejection refused"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(rejected_by = %rejected_by, "transfer request rejected");
        Ok(snapshot)
    }

    /// Cancel a pending or approved transfer, releasing any holds it owns.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        request_id: TransferRequestId,
        cancelled_by: UserId,
        reason: &str,
    ) -> WorkflowResult<TransferSnapshot> {
        let command = TransferCommand::Cancel(CancelTransfer {
            tenant_id,
            request_id,
            cancelled_by,
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "transfer cancellation refused"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(cancelled_by = %cancelled_by, "transfer request cancelled");
        Ok(snapshot)
    }

    pub fn get_by_id(
        &self,
        tenant_id: TenantId,
        request_id: TransferRequestId,
    ) -> WorkflowResult<TransferSnapshot> {
        self.uow.query(|tx| {
            tx.transfers()
                .get(tenant_id, &request_id)
                .ok_or_else(|| WorkflowError::not_found("transfer request", request_id))
        })
    }

    /// Pending transfers leaving from or arriving at `branch_id`, oldest first.
    pub fn get_pending(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> WorkflowResult<Vec<TransferSnapshot>> {
        let mut pending: Vec<TransferSnapshot> = self.uow.query(|tx| {
            Ok(tx
                .transfers()
                .list(tenant_id)
                .into_iter()
                .filter(|t| t.status == TransferStatus::Pending && t.involves(branch_id))
                .collect())
        })?;
        pending.sort_by(|a, b| (a.created_at, &a.transfer_number).cmp(&(b.created_at, &b.transfer_number)));
        Ok(pending)
    }

    /// Every transfer touching `branch_id` created within `range`, newest first.
    pub fn get_history(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        range: DateRange,
    ) -> WorkflowResult<Vec<TransferSnapshot>> {
        let mut history: Vec<TransferSnapshot> = self.uow.query(|tx| {
            Ok(tx
                .transfers()
                .list(tenant_id)
                .into_iter()
                .filter(|t| t.involves(branch_id) && range.contains(t.created_at))
                .collect())
        })?;
        history.sort_by(|a, b| (b.created_at, &b.transfer_number).cmp(&(a.created_at, &a.transfer_number)));
        Ok(history)
    }

    pub fn get_stats(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        range: DateRange,
    ) -> WorkflowResult<TransferStats> {
        let history = self.get_history(tenant_id, branch_id, range)?;
        Ok(TransferStats::from_requests(&history))
    }

    /// Committed events of one transfer, in order.
    pub fn audit_trail(
        &self,
        tenant_id: TenantId,
        request_id: TransferRequestId,
    ) -> WorkflowResult<Vec<StoredEvent>> {
        let trail = self
            .uow
            .query(|tx| command_dispatcher::load_stream(tx.events(), tenant_id, request_id.0))?;
        if trail.is_empty() {
            return Err(WorkflowError::not_found("transfer request", request_id));
        }
        Ok(trail)
    }
}

fn next_transfer_number<T: Transaction>(
    tx: &T,
    tenant_id: TenantId,
    prefix: &str,
    now: DateTime<Utc>,
) -> RequestNumber {
    let today = now.date_naive();
    let created_today = tx
        .transfers()
        .list(tenant_id)
        .iter()
        .filter(|t| t.created_at.date_naive() == today)
        .count();
    RequestNumber::next(prefix, today, created_today)
}

/// Unreserved stock at `branch_id` for every product the lines mention.
fn read_availability<L: InventoryLedger>(
    ledger: &L,
    tenant_id: TenantId,
    branch_id: BranchId,
    lines: impl IntoIterator<Item = (ProductId, i64)>,
) -> WorkflowResult<StockAvailability> {
    demand_by_product(lines)?
        .into_iter()
        .map(|(product_id, _)| -> WorkflowResult<(ProductId, i64)> {
            Ok((product_id, ledger.available(tenant_id, branch_id, product_id)?))
        })
        .collect()
}

/// Dispatch, apply ledger effects, and refresh the snapshot inside `tx`.
fn commit_transition<T: Transaction>(
    tx: &mut T,
    tenant_id: TenantId,
    request_id: TransferRequestId,
    command: &TransferCommand,
) -> WorkflowResult<(TransferSnapshot, Vec<StoredEvent>)> {
    let Dispatched {
        aggregate,
        events,
        committed,
    } = command_dispatcher::dispatch(
        tx.events_mut(),
        tenant_id,
        request_id.0,
        TRANSFER_AGGREGATE,
        command,
        |id| TransferRequest::empty(TransferRequestId::new(id)),
    )?;

    let snapshot = aggregate
        .into_snapshot()
        .ok_or_else(|| WorkflowError::InvariantViolation("transfer has no state after dispatch".into()))?;
    for event in &events {
        apply_ledger_effects(tx.ledger_mut(), &snapshot, event)?;
    }
    tx.transfers_mut().upsert(tenant_id, request_id, snapshot.clone());
    Ok((snapshot, committed))
}

/// Ledger primitives implied by one transfer event, in item order.
fn apply_ledger_effects<L: InventoryLedger>(
    ledger: &mut L,
    transfer: &TransferSnapshot,
    event: &TransferEvent,
) -> Result<(), LedgerError> {
    let tenant_id = transfer.tenant_id;
    let source = transfer.source_branch_id;
    match event {
        TransferEvent::TransferCreated(_) | TransferEvent::TransferRejected(_) => Ok(()),
        TransferEvent::TransferApproved(e) => e
            .reservations
            .iter()
            .try_for_each(|hold| ledger.reserve(tenant_id, source, hold.product_id, hold.quantity)),
        TransferEvent::TransferCompleted(e) => e.lines.iter().try_for_each(|line| {
            ledger.transfer(
                tenant_id,
                source,
                transfer.destination_branch_id,
                line.product_id,
                line.quantity_transferred,
            )?;
            ledger.release(tenant_id, source, line.product_id, line.quantity_released)
        }),
        TransferEvent::TransferCancelled(e) => e
            .released
            .iter()
            .try_for_each(|hold| ledger.release(tenant_id, source, hold.product_id, hold.quantity)),
    }
}
