//! Procurement workflow service: request, approve, receive, and distribute stock.
//!
//! Only distribution touches the ledger; approval fixes quantities and prices
//! without reserving anything.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use stockflow_core::{
    AggregateId, BranchId, DateRange, PROCUREMENT_PREFIX, ProductId, RequestNumber, TenantId,
    UserId,
};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_ledger::{InventoryLedger, LedgerError};
use stockflow_procurement::{
    ApproveProcurement, ApprovedLine, CancelProcurement, CreateProcurement,
    DistributeProcurement, DistributionLine, NewProcurementLine, ProcurementCommand,
    ProcurementEvent, ProcurementItemId, ProcurementKind, ProcurementRequest,
    ProcurementRequestId, ProcurementSnapshot, ProcurementStatus, ReceiveProcurement,
    ReceivedLine, RejectProcurement,
};

use crate::branches::BranchDirectory;
use crate::command_dispatcher::{self, Dispatched};
use crate::error::{WorkflowError, WorkflowResult};
use crate::event_store::StoredEvent;
use crate::read_model::TenantStore;
use crate::stats::ProcurementStats;
use crate::unit_of_work::{Transaction, UnitOfWork};

pub const PROCUREMENT_AGGREGATE: &str = "procurement.request";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcurementLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProcurement {
    pub tenant_id: TenantId,
    pub kind: ProcurementKind,
    pub requesting_branch_id: BranchId,
    pub supplier: Option<String>,
    pub requested_by: UserId,
    pub items: Vec<ProcurementLine>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

pub struct ProcurementWorkflow<U, D, B> {
    uow: U,
    branches: D,
    bus: B,
    prefix: String,
}

impl<U, D, B> ProcurementWorkflow<U, D, B>
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
            prefix: PROCUREMENT_PREFIX.to_string(),
        }
    }

    /// Override the request number prefix (default `PRC`).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[instrument(skip_all, fields(tenant = %input.tenant_id, kind = input.kind.as_str()))]
    pub fn create(&self, input: NewProcurement) -> WorkflowResult<ProcurementSnapshot> {
        let tenant_id = input.tenant_id;
        if !self.branches.contains(tenant_id, input.requesting_branch_id) {
            return Err(WorkflowError::not_found("branch", input.requesting_branch_id));
        }

        let request_id = ProcurementRequestId::new(AggregateId::new());
        let lines: Vec<NewProcurementLine> = input
            .items
            .into_iter()
            .map(|line| NewProcurementLine {
                item_id: ProcurementItemId::new(),
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                notes: line.notes,
            })
            .collect();

        let result = self.uow.execute(|tx| {
            let now = Utc::now();
            let command = ProcurementCommand::Create(CreateProcurement {
                tenant_id,
                request_id,
                request_number: next_request_number(tx, tenant_id, &self.prefix, now),
                kind: input.kind,
                requesting_branch_id: input.requesting_branch_id,
                supplier: input.supplier,
                requested_by: input.requested_by,
                lines,
                expected_delivery_date: input.expected_delivery_date,
                notes: input.notes,
                occurred_at: now,
            });
            commit_transition(tx, tenant_id, request_id, &command)
        });

        let (snapshot, committed) = result
            .inspect_err(|e| warn!(error = %e, "procurement creation rejected"))?;
        command_dispatcher::publish(&self.bus, &committed)?;
        info!(
            request_id = %snapshot.request_id,
            request_number = %snapshot.request_number,
            total_amount = %snapshot.total_amount,
            "procurement request created"
        );
        Ok(snapshot)
    }

    /// Fix approved quantities and prices; the tenant's main branch becomes the approver.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn approve(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
        approved_by: UserId,
        lines: Vec<ApprovedLine>,
        notes: Option<String>,
    ) -> WorkflowResult<ProcurementSnapshot> {
        let approving_branch_id = self
            .branches
            .main_branch(tenant_id)
            .ok_or_else(|| WorkflowError::not_found("main branch", tenant_id))
            .inspect_err(|e| warn!(error = %e, "procurement approval rejected"))?;

        let command = ProcurementCommand::Approve(ApproveProcurement {
            tenant_id,
            request_id,
            approved_by,
            approving_branch_id,
            lines,
            notes,
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "procurement approval rejected"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(
            approving_branch = %approving_branch_id,
            total_amount = %snapshot.total_amount,
            "procurement request approved"
        );
        Ok(snapshot)
    }

    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn reject(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
        rejected_by: UserId,
        reason: &str,
    ) -> WorkflowResult<ProcurementSnapshot> {
        let command = ProcurementCommand::Reject(RejectProcurement {
            tenant_id,
            request_id,
            rejected_by,
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "procurement rejection refused"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(rejected_by = %rejected_by, "procurement request rejected");
        Ok(snapshot)
    }

    /// Requester withdraws a request that is still pending.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
        cancelled_by: UserId,
        reason: &str,
    ) -> WorkflowResult<ProcurementSnapshot> {
        let command = ProcurementCommand::Cancel(CancelProcurement {
            tenant_id,
            request_id,
            cancelled_by,
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "procurement cancellation refused"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(cancelled_by = %cancelled_by, "procurement request cancelled");
        Ok(snapshot)
    }

    /// Record received quantities. Items missing from `lines` are received as approved.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn receive(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
        received_by: UserId,
        lines: Vec<ReceivedLine>,
    ) -> WorkflowResult<ProcurementSnapshot> {
        let command = ProcurementCommand::Receive(ReceiveProcurement {
            tenant_id,
            request_id,
            received_by,
            lines,
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "procurement receipt rejected"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(total_amount = %snapshot.total_amount, "procurement request received");
        Ok(snapshot)
    }

    /// Split received stock across branches and add it to their on-hand quantity.
    #[instrument(skip_all, fields(tenant = %tenant_id, request_id = %request_id))]
    pub fn distribute(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
        distributed_by: UserId,
        lines: Vec<DistributionLine>,
    ) -> WorkflowResult<ProcurementSnapshot> {
        if let Some(line) = lines
            .iter()
            .find(|l| !self.branches.contains(tenant_id, l.branch_id))
        {
            let err = WorkflowError::not_found("branch", line.branch_id);
            warn!(error = %err, "procurement distribution rejected");
            return Err(err);
        }

        let command = ProcurementCommand::Distribute(DistributeProcurement {
            tenant_id,
            request_id,
            distributed_by,
            lines,
            occurred_at: Utc::now(),
        });
        let (snapshot, committed) = self
            .uow
            .execute(|tx| commit_transition(tx, tenant_id, request_id, &command))
            .inspect_err(|e| warn!(error = %e, "procurement distribution rejected"))?;

        command_dispatcher::publish(&self.bus, &committed)?;
        info!(
            destinations = snapshot.distributions.len(),
            "procurement request distributed"
        );
        Ok(snapshot)
    }

    pub fn get_by_id(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
    ) -> WorkflowResult<ProcurementSnapshot> {
        self.uow.query(|tx| {
            tx.procurements()
                .get(tenant_id, &request_id)
                .ok_or_else(|| WorkflowError::not_found("procurement request", request_id))
        })
    }

    /// Pending requests raised by `branch_id`; the main branch sees every
    /// pending request of the tenant, since it is the one approving them.
    pub fn get_pending(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> WorkflowResult<Vec<ProcurementSnapshot>> {
        let is_main = self.branches.main_branch(tenant_id) == Some(branch_id);
        let mut pending: Vec<ProcurementSnapshot> = self.uow.query(|tx| {
            Ok(tx
                .procurements()
                .list(tenant_id)
                .into_iter()
                .filter(|p| {
                    p.status == ProcurementStatus::Pending
                        && (is_main || p.requesting_branch_id == branch_id)
                })
                .collect())
        })?;
        pending.sort_by(|a, b| (a.created_at, &a.request_number).cmp(&(b.created_at, &b.request_number)));
        Ok(pending)
    }

    /// Requests raised, approved, or distributed to by `branch_id` within `range`, newest first.
    pub fn get_history(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        range: DateRange,
    ) -> WorkflowResult<Vec<ProcurementSnapshot>> {
        let mut history: Vec<ProcurementSnapshot> = self.uow.query(|tx| {
            Ok(tx
                .procurements()
                .list(tenant_id)
                .into_iter()
                .filter(|p| p.involves(branch_id) && range.contains(p.created_at))
                .collect())
        })?;
        history.sort_by(|a, b| (b.created_at, &b.request_number).cmp(&(a.created_at, &a.request_number)));
        Ok(history)
    }

    pub fn get_stats(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        range: DateRange,
    ) -> WorkflowResult<ProcurementStats> {
        let history = self.get_history(tenant_id, branch_id, range)?;
        Ok(ProcurementStats::from_requests(&history))
    }

    pub fn audit_trail(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
    ) -> WorkflowResult<Vec<StoredEvent>> {
        let trail = self
            .uow
            .query(|tx| command_dispatcher::load_stream(tx.events(), tenant_id, request_id.0))?;
        if trail.is_empty() {
            return Err(WorkflowError::not_found("procurement request", request_id));
        }
        Ok(trail)
    }
}

fn next_request_number<T: Transaction>(
    tx: &T,
    tenant_id: TenantId,
    prefix: &str,
    now: DateTime<Utc>,
) -> RequestNumber {
    let today = now.date_naive();
    let created_today = tx
        .procurements()
        .list(tenant_id)
        .iter()
        .filter(|p| p.created_at.date_naive() == today)
        .count();
    RequestNumber::next(prefix, today, created_today)
}

fn commit_transition<T: Transaction>(
    tx: &mut T,
    tenant_id: TenantId,
    request_id: ProcurementRequestId,
    command: &ProcurementCommand,
) -> WorkflowResult<(ProcurementSnapshot, Vec<StoredEvent>)> {
    let Dispatched {
        aggregate,
        events,
        committed,
    } = command_dispatcher::dispatch(
        tx.events_mut(),
        tenant_id,
        request_id.0,
        PROCUREMENT_AGGREGATE,
        command,
        |id| ProcurementRequest::empty(ProcurementRequestId::new(id)),
    )?;

    let snapshot = aggregate.into_snapshot().ok_or_else(|| {
        WorkflowError::InvariantViolation("procurement has no state after dispatch".into())
    })?;
    for event in &events {
        apply_ledger_effects(tx.ledger_mut(), tenant_id, event)?;
    }
    tx.procurements_mut().upsert(tenant_id, request_id, snapshot.clone());
    Ok((snapshot, committed))
}

fn apply_ledger_effects<L: InventoryLedger>(
    ledger: &mut L,
    tenant_id: TenantId,
    event: &ProcurementEvent,
) -> Result<(), LedgerError> {
    match event {
        ProcurementEvent::ProcurementDistributed(e) => {
            let note = format!("procurement {} distribution", e.request_number);
            e.distributions.iter().try_for_each(|d| {
                ledger.update_inventory(tenant_id, d.branch_id, d.product_id, d.quantity_received, &note)
            })
        }
        ProcurementEvent::ProcurementCreated(_)
        | ProcurementEvent::ProcurementApproved(_)
        | ProcurementEvent::ProcurementRejected(_)
        | ProcurementEvent::ProcurementCancelled(_)
        | ProcurementEvent::ProcurementReceived(_) => Ok(()),
    }
}
