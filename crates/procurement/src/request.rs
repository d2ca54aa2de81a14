use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, AuditNote, BranchId, DomainError, ProductId,
    RequestNumber, TenantId, UserId, impl_uuid_newtype,
};
use stockflow_events::Event;

use crate::status::{ProcurementKind, ProcurementOperation, ProcurementStatus};

/// Procurement request identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcurementRequestId(pub AggregateId);

impl ProcurementRequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProcurementRequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of one line of a procurement request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcurementItemId(Uuid);

impl_uuid_newtype!(ProcurementItemId, "ProcurementItemId");

/// Procurement line item.
///
/// `quantity_approved` and `quantity_received` are written exactly once, at
/// approval and receipt respectively; both may differ from what was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementItem {
    pub item_id: ProcurementItemId,
    pub product_id: ProductId,
    pub quantity_requested: i64,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub quantity_approved: Option<i64>,
    pub quantity_received: Option<i64>,
    pub notes: Option<String>,
}

impl ProcurementItem {
    /// Quantity of the latest stage reached (received, else approved, else requested).
    pub fn current_quantity(&self) -> i64 {
        self.quantity_received
            .or(self.quantity_approved)
            .unwrap_or(self.quantity_requested)
    }

    /// Overflow is rejected by the command handlers before any event exists.
    fn reprice(&mut self) {
        self.total_price = Decimal::from(self.current_quantity())
            .checked_mul(self.unit_price)
            .unwrap_or(Decimal::MAX);
    }
}

/// Stock allocated from a received procurement to one destination branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementDistribution {
    pub branch_id: BranchId,
    pub item_id: ProcurementItemId,
    pub product_id: ProductId,
    pub quantity_received: i64,
}

/// Fully materialized state of a procurement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementSnapshot {
    pub request_id: ProcurementRequestId,
    pub tenant_id: TenantId,
    pub request_number: RequestNumber,
    pub kind: ProcurementKind,
    pub requesting_branch_id: BranchId,
    pub approving_branch_id: Option<BranchId>,
    pub supplier: Option<String>,
    pub requested_by: UserId,
    pub approved_by: Option<UserId>,
    pub status: ProcurementStatus,
    pub items: Vec<ProcurementItem>,
    pub distributions: Vec<ProcurementDistribution>,
    pub total_amount: Decimal,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Vec<AuditNote>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProcurementSnapshot {
    pub fn item(&self, item_id: ProcurementItemId) -> Option<&ProcurementItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    /// Whether `branch_id` requested, approved, or received stock from this request.
    pub fn involves(&self, branch_id: BranchId) -> bool {
        self.requesting_branch_id == branch_id
            || self.approving_branch_id == Some(branch_id)
            || self.distributions.iter().any(|d| d.branch_id == branch_id)
    }

    /// Units distributed per item.
    pub fn distributed_by_item(&self) -> HashMap<ProcurementItemId, i64> {
        let mut totals = HashMap::new();
        for d in &self.distributions {
            *totals.entry(d.item_id).or_insert(0) += d.quantity_received;
        }
        totals
    }

    fn recompute_total(&mut self) {
        self.total_amount = self
            .items
            .iter()
            .fold(Decimal::ZERO, |acc, i| acc.checked_add(i.total_price).unwrap_or(Decimal::MAX));
    }
}

/// Aggregate root: ProcurementRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcurementRequest {
    id: ProcurementRequestId,
    snapshot: Option<ProcurementSnapshot>,
    version: u64,
}

impl ProcurementRequest {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProcurementRequestId) -> Self {
        Self {
            id,
            snapshot: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ProcurementRequestId {
        self.id
    }

    pub fn snapshot(&self) -> Option<&ProcurementSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn into_snapshot(self) -> Option<ProcurementSnapshot> {
        self.snapshot
    }
}

impl AggregateRoot for ProcurementRequest {
    type Id = ProcurementRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProcurementLine {
    pub item_id: ProcurementItemId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

/// Command: CreateProcurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProcurement {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub request_number: RequestNumber,
    pub kind: ProcurementKind,
    pub requesting_branch_id: BranchId,
    pub supplier: Option<String>,
    pub requested_by: UserId,
    pub lines: Vec<NewProcurementLine>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Approved quantity and (possibly renegotiated) price for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedLine {
    pub item_id: ProcurementItemId,
    pub quantity_approved: i64,
    pub unit_price: Decimal,
}

/// Command: ApproveProcurement.
///
/// `approving_branch_id` is the tenant's main branch, resolved by the caller.
/// Lines left out are approved in full at the requested price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveProcurement {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub approved_by: UserId,
    pub approving_branch_id: BranchId,
    pub lines: Vec<ApprovedLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectProcurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectProcurement {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelProcurement (requester withdraws a pending request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelProcurement {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub item_id: ProcurementItemId,
    pub quantity_received: i64,
}

/// Command: ReceiveProcurement. Lines left out are received as approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveProcurement {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub received_by: UserId,
    pub lines: Vec<ReceivedLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionLine {
    pub branch_id: BranchId,
    pub item_id: ProcurementItemId,
    pub quantity: i64,
}

/// Command: DistributeProcurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributeProcurement {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub distributed_by: UserId,
    pub lines: Vec<DistributionLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcurementCommand {
    Create(CreateProcurement),
    Approve(ApproveProcurement),
    Reject(RejectProcurement),
    Cancel(CancelProcurement),
    Receive(ReceiveProcurement),
    Distribute(DistributeProcurement),
}

/// Event: ProcurementCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementCreated {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub request_number: RequestNumber,
    pub kind: ProcurementKind,
    pub requesting_branch_id: BranchId,
    pub supplier: Option<String>,
    pub requested_by: UserId,
    pub items: Vec<ProcurementItem>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcurementApproved. Carries a resolved line for every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementApproved {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub approved_by: UserId,
    pub approving_branch_id: BranchId,
    pub lines: Vec<ApprovedLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcurementRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementRejected {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcurementCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementCancelled {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcurementReceived. Carries a resolved line for every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementReceived {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub received_by: UserId,
    pub lines: Vec<ReceivedLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcurementDistributed.
///
/// The distribution set replaces any previous one wholesale. Infrastructure adds
/// each line to the destination branch's on-hand stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementDistributed {
    pub tenant_id: TenantId,
    pub request_id: ProcurementRequestId,
    pub request_number: RequestNumber,
    pub distributed_by: UserId,
    pub distributions: Vec<ProcurementDistribution>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcurementEvent {
    ProcurementCreated(ProcurementCreated),
    ProcurementApproved(ProcurementApproved),
    ProcurementRejected(ProcurementRejected),
    ProcurementCancelled(ProcurementCancelled),
    ProcurementReceived(ProcurementReceived),
    ProcurementDistributed(ProcurementDistributed),
}

impl Event for ProcurementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProcurementEvent::ProcurementCreated(_) => "procurement.request.created",
            ProcurementEvent::ProcurementApproved(_) => "procurement.request.approved",
            ProcurementEvent::ProcurementRejected(_) => "procurement.request.rejected",
            ProcurementEvent::ProcurementCancelled(_) => "procurement.request.cancelled",
            ProcurementEvent::ProcurementReceived(_) => "procurement.request.received",
            ProcurementEvent::ProcurementDistributed(_) => "procurement.request.distributed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProcurementEvent::ProcurementCreated(e) => e.occurred_at,
            ProcurementEvent::ProcurementApproved(e) => e.occurred_at,
            ProcurementEvent::ProcurementRejected(e) => e.occurred_at,
            ProcurementEvent::ProcurementCancelled(e) => e.occurred_at,
            ProcurementEvent::ProcurementReceived(e) => e.occurred_at,
            ProcurementEvent::ProcurementDistributed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProcurementRequest {
    type Command = ProcurementCommand;
    type Event = ProcurementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProcurementEvent::ProcurementCreated(e) => {
                self.id = e.request_id;
                let notes = e
                    .notes
                    .iter()
                    .map(|text| AuditNote::new(e.requested_by, text.clone(), e.occurred_at))
                    .collect();
                let mut snapshot = ProcurementSnapshot {
                    request_id: e.request_id,
                    tenant_id: e.tenant_id,
                    request_number: e.request_number.clone(),
                    kind: e.kind,
                    requesting_branch_id: e.requesting_branch_id,
                    approving_branch_id: None,
                    supplier: e.supplier.clone(),
                    requested_by: e.requested_by,
                    approved_by: None,
                    status: ProcurementStatus::Pending,
                    items: e.items.clone(),
                    distributions: Vec::new(),
                    total_amount: Decimal::ZERO,
                    expected_delivery_date: e.expected_delivery_date,
                    notes,
                    created_at: e.occurred_at,
                    approved_at: None,
                    received_at: None,
                    completed_at: None,
                    updated_at: e.occurred_at,
                };
                snapshot.recompute_total();
                self.snapshot = Some(snapshot);
            }
            ProcurementEvent::ProcurementApproved(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    for line in &e.lines {
                        if let Some(item) = s.items.iter_mut().find(|i| i.item_id == line.item_id) {
                            item.quantity_approved = Some(line.quantity_approved);
                            item.unit_price = line.unit_price;
                            item.reprice();
                        }
                    }
                    s.recompute_total();
                    if let Some(text) = &e.notes {
                        s.notes.push(AuditNote::new(e.approved_by, text.clone(), e.occurred_at));
                    }
                    s.status = ProcurementStatus::Approved;
                    s.approving_branch_id = Some(e.approving_branch_id);
                    s.approved_by = Some(e.approved_by);
                    s.approved_at = Some(e.occurred_at);
                    s.updated_at = e.occurred_at;
                }
            }
            ProcurementEvent::ProcurementRejected(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    s.notes.push(AuditNote::new(e.rejected_by, e.reason.clone(), e.occurred_at));
                    s.status = ProcurementStatus::Cancelled;
                    s.updated_at = e.occurred_at;
                }
            }
            ProcurementEvent::ProcurementCancelled(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    s.notes.push(AuditNote::new(e.cancelled_by, e.reason.clone(), e.occurred_at));
                    s.status = ProcurementStatus::Cancelled;
                    s.updated_at = e.occurred_at;
                }
            }
            ProcurementEvent::ProcurementReceived(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    for line in &e.lines {
                        if let Some(item) = s.items.iter_mut().find(|i| i.item_id == line.item_id) {
                            item.quantity_received = Some(line.quantity_received);
                            item.reprice();
                        }
                    }
                    s.recompute_total();
                    s.status = ProcurementStatus::Received;
                    s.received_at = Some(e.occurred_at);
                    s.updated_at = e.occurred_at;
                }
            }
            ProcurementEvent::ProcurementDistributed(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    s.distributions = e.distributions.clone();
                    s.status = ProcurementStatus::Completed;
                    s.completed_at = Some(e.occurred_at);
                    s.updated_at = e.occurred_at;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProcurementCommand::Create(cmd) => self.handle_create(cmd),
            ProcurementCommand::Approve(cmd) => self.handle_approve(cmd),
            ProcurementCommand::Reject(cmd) => self.handle_reject(cmd),
            ProcurementCommand::Cancel(cmd) => self.handle_cancel(cmd),
            ProcurementCommand::Receive(cmd) => self.handle_receive(cmd),
            ProcurementCommand::Distribute(cmd) => self.handle_distribute(cmd),
        }
    }
}

/// `quantity * unit_price`, rejecting totals beyond the decimal range.
fn line_total(quantity: i64, unit_price: Decimal) -> Result<Decimal, DomainError> {
    Decimal::from(quantity)
        .checked_mul(unit_price)
        .ok_or_else(|| DomainError::validation(format!("{quantity} x {unit_price} is out of range")))
}

fn amount(totals: impl IntoIterator<Item = Decimal>) -> Result<Decimal, DomainError> {
    totals.into_iter().try_fold(Decimal::ZERO, |acc, t| {
        acc.checked_add(t)
            .ok_or_else(|| DomainError::validation("total amount is out of range"))
    })
}

fn non_empty_reason(reason: &str) -> Result<String, DomainError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("a reason is required"));
    }
    Ok(reason.to_string())
}

fn clean_text(text: &Option<String>) -> Option<String> {
    text.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Index supplied per-item values, rejecting unknown and repeated items.
fn index_lines<T: Copy>(
    snapshot: &ProcurementSnapshot,
    lines: impl IntoIterator<Item = (ProcurementItemId, T)>,
) -> Result<HashMap<ProcurementItemId, T>, DomainError> {
    let mut indexed = HashMap::new();
    for (item_id, value) in lines {
        if snapshot.item(item_id).is_none() {
            return Err(DomainError::not_found("procurement item", item_id));
        }
        if indexed.insert(item_id, value).is_some() {
            return Err(DomainError::validation(format!(
                "item {item_id} listed more than once"
            )));
        }
    }
    Ok(indexed)
}

impl ProcurementRequest {
    /// Loaded snapshot for `request_id` within `tenant_id`.
    fn existing(
        &self,
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
    ) -> Result<&ProcurementSnapshot, DomainError> {
        let snapshot = self
            .snapshot
            .as_ref()
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or_else(|| DomainError::not_found("procurement request", request_id))?;
        if self.id != request_id {
            return Err(DomainError::invariant("request_id mismatch"));
        }
        Ok(snapshot)
    }

    fn handle_create(&self, cmd: &CreateProcurement) -> Result<Vec<ProcurementEvent>, DomainError> {
        if self.snapshot.is_some() {
            return Err(DomainError::conflict("procurement request already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "a procurement request needs at least one item",
            ));
        }

        let mut items: Vec<ProcurementItem> = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            if line.unit_price.is_sign_negative() {
                return Err(DomainError::validation(format!(
                    "unit price for product {} cannot be negative",
                    line.product_id
                )));
            }
            if items.iter().any(|i| i.item_id == line.item_id) {
                return Err(DomainError::validation(format!(
                    "item {} listed more than once",
                    line.item_id
                )));
            }
            items.push(ProcurementItem {
                item_id: line.item_id,
                product_id: line.product_id,
                quantity_requested: line.quantity,
                unit_price: line.unit_price,
                total_price: line_total(line.quantity, line.unit_price)?,
                quantity_approved: None,
                quantity_received: None,
                notes: clean_text(&line.notes),
            });
        }
        amount(items.iter().map(|i| i.total_price))?;

        Ok(vec![ProcurementEvent::ProcurementCreated(ProcurementCreated {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            request_number: cmd.request_number.clone(),
            kind: cmd.kind,
            requesting_branch_id: cmd.requesting_branch_id,
            supplier: clean_text(&cmd.supplier),
            requested_by: cmd.requested_by,
            items,
            expected_delivery_date: cmd.expected_delivery_date,
            notes: clean_text(&cmd.notes),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveProcurement) -> Result<Vec<ProcurementEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(ProcurementOperation::Approve)?;

        let supplied = index_lines(
            current,
            cmd.lines
                .iter()
                .map(|l| (l.item_id, (l.quantity_approved, l.unit_price))),
        )?;

        let mut lines = Vec::with_capacity(current.items.len());
        for item in &current.items {
            let (quantity_approved, unit_price) = supplied
                .get(&item.item_id)
                .copied()
                .unwrap_or((item.quantity_requested, item.unit_price));
            if quantity_approved < 0 || quantity_approved > item.quantity_requested {
                return Err(DomainError::validation(format!(
                    "approved quantity {quantity_approved} for item {} must be between 0 and {}",
                    item.item_id, item.quantity_requested
                )));
            }
            if unit_price.is_sign_negative() {
                return Err(DomainError::validation(format!(
                    "unit price for item {} cannot be negative",
                    item.item_id
                )));
            }
            lines.push(ApprovedLine {
                item_id: item.item_id,
                quantity_approved,
                unit_price,
            });
        }
        amount(
            lines
                .iter()
                .map(|l| line_total(l.quantity_approved, l.unit_price))
                .collect::<Result<Vec<_>, _>>()?,
        )?;

        Ok(vec![ProcurementEvent::ProcurementApproved(ProcurementApproved {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            approved_by: cmd.approved_by,
            approving_branch_id: cmd.approving_branch_id,
            lines,
            notes: clean_text(&cmd.notes),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectProcurement) -> Result<Vec<ProcurementEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(ProcurementOperation::Reject)?;
        let reason = non_empty_reason(&cmd.reason)?;

        Ok(vec![ProcurementEvent::ProcurementRejected(ProcurementRejected {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            rejected_by: cmd.rejected_by,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelProcurement) -> Result<Vec<ProcurementEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(ProcurementOperation::Cancel)?;
        let reason = non_empty_reason(&cmd.reason)?;

        Ok(vec![ProcurementEvent::ProcurementCancelled(ProcurementCancelled {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            cancelled_by: cmd.cancelled_by,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveProcurement) -> Result<Vec<ProcurementEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(ProcurementOperation::Receive)?;

        let supplied = index_lines(
            current,
            cmd.lines.iter().map(|l| (l.item_id, l.quantity_received)),
        )?;

        let mut lines = Vec::with_capacity(current.items.len());
        for item in &current.items {
            let approved = item.quantity_approved.unwrap_or(0);
            let quantity_received = supplied.get(&item.item_id).copied().unwrap_or(approved);
            if quantity_received < 0 || quantity_received > approved {
                return Err(DomainError::validation(format!(
                    "received quantity {quantity_received} for item {} must be between 0 and {approved}",
                    item.item_id
                )));
            }
            lines.push(ReceivedLine {
                item_id: item.item_id,
                quantity_received,
            });
        }
        amount(
            current
                .items
                .iter()
                .zip(&lines)
                .map(|(item, l)| line_total(l.quantity_received, item.unit_price))
                .collect::<Result<Vec<_>, _>>()?,
        )?;

        Ok(vec![ProcurementEvent::ProcurementReceived(ProcurementReceived {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            received_by: cmd.received_by,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_distribute(
        &self,
        cmd: &DistributeProcurement,
    ) -> Result<Vec<ProcurementEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(ProcurementOperation::Distribute)?;

        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "a distribution needs at least one line",
            ));
        }

        let mut allocated: HashMap<ProcurementItemId, i64> = HashMap::new();
        let mut distributions = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            let item = current
                .item(line.item_id)
                .ok_or_else(|| DomainError::not_found("procurement item", line.item_id))?;
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "distributed quantity for item {} must be positive",
                    line.item_id
                )));
            }

            let received = item.quantity_received.unwrap_or(0);
            let total = allocated.entry(line.item_id).or_insert(0);
            *total = total
                .checked_add(line.quantity)
                .filter(|t| *t <= received)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "item {} distributes more than the {received} units received",
                        line.item_id
                    ))
                })?;

            distributions.push(ProcurementDistribution {
                branch_id: line.branch_id,
                item_id: line.item_id,
                product_id: item.product_id,
                quantity_received: line.quantity,
            });
        }

        Ok(vec![ProcurementEvent::ProcurementDistributed(ProcurementDistributed {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            request_number: current.request_number.clone(),
            distributed_by: cmd.distributed_by,
            distributions,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockflow_core::PROCUREMENT_PREFIX;
    use stockflow_events::execute;

    struct Fixture {
        tenant_id: TenantId,
        request_id: ProcurementRequestId,
        branch: BranchId,
        main_branch: BranchId,
        user: UserId,
        product: ProductId,
        item_id: ProcurementItemId,
    }

    fn fixture() -> Fixture {
        Fixture {
            tenant_id: TenantId::new(),
            request_id: ProcurementRequestId::new(AggregateId::new()),
            branch: BranchId::new(),
            main_branch: BranchId::new(),
            user: UserId::new(),
            product: ProductId::new(),
            item_id: ProcurementItemId::new(),
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn create_cmd(f: &Fixture, quantity: i64, unit_price: Decimal) -> ProcurementCommand {
        ProcurementCommand::Create(CreateProcurement {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            request_number: RequestNumber::next(
                PROCUREMENT_PREFIX,
                NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
                4,
            ),
            kind: ProcurementKind::Central,
            requesting_branch_id: f.branch,
            supplier: Some("Medisupply Ltd".to_string()),
            requested_by: f.user,
            lines: vec![NewProcurementLine {
                item_id: f.item_id,
                product_id: f.product,
                quantity,
                unit_price,
                notes: None,
            }],
            expected_delivery_date: None,
            notes: None,
            occurred_at: test_time(),
        })
    }

    fn approve_cmd(f: &Fixture, quantity: i64, unit_price: Decimal) -> ProcurementCommand {
        ProcurementCommand::Approve(ApproveProcurement {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            approved_by: f.user,
            approving_branch_id: f.main_branch,
            lines: vec![ApprovedLine {
                item_id: f.item_id,
                quantity_approved: quantity,
                unit_price,
            }],
            notes: Some("negotiated bulk price".to_string()),
            occurred_at: test_time(),
        })
    }

    fn receive_cmd(f: &Fixture, quantity: i64) -> ProcurementCommand {
        ProcurementCommand::Receive(ReceiveProcurement {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            received_by: f.user,
            lines: vec![ReceivedLine {
                item_id: f.item_id,
                quantity_received: quantity,
            }],
            occurred_at: test_time(),
        })
    }

    fn distribute_cmd(f: &Fixture, split: &[(BranchId, i64)]) -> ProcurementCommand {
        ProcurementCommand::Distribute(DistributeProcurement {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            distributed_by: f.user,
            lines: split
                .iter()
                .map(|&(branch_id, quantity)| DistributionLine {
                    branch_id,
                    item_id: f.item_id,
                    quantity,
                })
                .collect(),
            occurred_at: test_time(),
        })
    }

    fn received(f: &Fixture, requested: i64, approved: i64, got: i64) -> ProcurementRequest {
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(f, requested, dec!(2.50))).unwrap();
        execute(&mut request, &approve_cmd(f, approved, dec!(2.50))).unwrap();
        execute(&mut request, &receive_cmd(f, got)).unwrap();
        request
    }

    #[test]
    fn create_prices_items_and_totals_the_request() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 100, dec!(2.50))).unwrap();

        let s = request.snapshot().unwrap();
        assert_eq!(s.status, ProcurementStatus::Pending);
        assert_eq!(s.request_number.as_str(), "PRC202610160005");
        assert_eq!(s.items[0].total_price, dec!(250.00));
        assert_eq!(s.total_amount, dec!(250.00));
        assert_eq!(s.items[0].quantity_approved, None);
        assert!(s.distributions.is_empty());
    }

    #[test]
    fn create_rejects_negative_price_and_empty_items() {
        let f = fixture();
        let request = ProcurementRequest::empty(f.request_id);
        assert!(matches!(
            request.handle(&create_cmd(&f, 1, dec!(-0.01))),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            request.handle(&create_cmd(&f, 0, dec!(1))),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn approve_fixes_quantity_price_and_main_branch() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 100, dec!(2.50))).unwrap();
        execute(&mut request, &approve_cmd(&f, 80, dec!(2.25))).unwrap();

        let s = request.snapshot().unwrap();
        assert_eq!(s.status, ProcurementStatus::Approved);
        assert_eq!(s.approving_branch_id, Some(f.main_branch));
        assert_eq!(s.items[0].quantity_approved, Some(80));
        assert_eq!(s.items[0].unit_price, dec!(2.25));
        assert_eq!(s.total_amount, dec!(180.00));
        assert_eq!(s.notes.len(), 1);
    }

    #[test]
    fn approve_above_requested_is_rejected() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 10, dec!(1))).unwrap();
        assert!(matches!(
            request.handle(&approve_cmd(&f, 11, dec!(1))),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn omitted_lines_are_approved_in_full() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 10, dec!(3))).unwrap();
        let cmd = ProcurementCommand::Approve(ApproveProcurement {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            approved_by: f.user,
            approving_branch_id: f.main_branch,
            lines: vec![],
            notes: None,
            occurred_at: test_time(),
        });
        execute(&mut request, &cmd).unwrap();
        let item = &request.snapshot().unwrap().items[0];
        assert_eq!(item.quantity_approved, Some(10));
        assert_eq!(item.total_price, dec!(30));
    }

    #[test]
    fn second_approve_is_an_invalid_transition() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 10, dec!(1))).unwrap();
        execute(&mut request, &approve_cmd(&f, 10, dec!(1))).unwrap();
        assert_eq!(
            request.handle(&approve_cmd(&f, 10, dec!(1))).unwrap_err(),
            DomainError::invalid_transition("approve", "approved")
        );
    }

    #[test]
    fn reject_after_approval_is_not_possible() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 10, dec!(1))).unwrap();
        execute(&mut request, &approve_cmd(&f, 10, dec!(1))).unwrap();
        let cmd = ProcurementCommand::Reject(RejectProcurement {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            rejected_by: f.user,
            reason: "supplier out of stock".to_string(),
            occurred_at: test_time(),
        });
        assert_eq!(
            request.handle(&cmd).unwrap_err(),
            DomainError::invalid_transition("reject", "approved")
        );
    }

    #[test]
    fn receive_above_approved_is_rejected() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 100, dec!(1))).unwrap();
        execute(&mut request, &approve_cmd(&f, 80, dec!(1))).unwrap();
        assert!(matches!(
            request.handle(&receive_cmd(&f, 81)),
            Err(DomainError::Validation(msg)) if msg.contains("between 0 and 80")
        ));
    }

    #[test]
    fn receive_reprices_with_received_quantity() {
        let f = fixture();
        let request = received(&f, 100, 80, 75);
        let s = request.snapshot().unwrap();
        assert_eq!(s.status, ProcurementStatus::Received);
        assert_eq!(s.items[0].quantity_received, Some(75));
        assert_eq!(s.total_amount, dec!(187.50));
        assert!(s.received_at.is_some());
    }

    #[test]
    fn partial_approval_receipt_and_split_distribution_completes() {
        let f = fixture();
        let (x, y) = (BranchId::new(), BranchId::new());
        let mut request = received(&f, 100, 80, 75);
        let events = execute(&mut request, &distribute_cmd(&f, &[(x, 50), (y, 25)])).unwrap();

        let ProcurementEvent::ProcurementDistributed(e) = &events[0] else {
            panic!("expected ProcurementDistributed");
        };
        assert_eq!(e.distributions.len(), 2);
        assert_eq!(e.distributions[0].product_id, f.product);

        let s = request.snapshot().unwrap();
        assert_eq!(s.status, ProcurementStatus::Completed);
        assert_eq!(s.distributed_by_item().get(&f.item_id), Some(&75));
        assert!(s.involves(x) && s.involves(y));
    }

    #[test]
    fn over_distribution_is_rejected() {
        let f = fixture();
        let request = received(&f, 100, 80, 75);
        let err = request
            .handle(&distribute_cmd(&f, &[(BranchId::new(), 50), (BranchId::new(), 26)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("more than the 75 units received")));
    }

    #[test]
    fn distribute_before_receipt_is_an_invalid_transition() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 10, dec!(1))).unwrap();
        execute(&mut request, &approve_cmd(&f, 10, dec!(1))).unwrap();
        assert_eq!(
            request
                .handle(&distribute_cmd(&f, &[(BranchId::new(), 1)]))
                .unwrap_err(),
            DomainError::invalid_transition("distribute", "approved")
        );
    }

    #[test]
    fn unknown_item_in_approval_is_not_found() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, 10, dec!(1))).unwrap();
        let cmd = ProcurementCommand::Approve(ApproveProcurement {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            approved_by: f.user,
            approving_branch_id: f.main_branch,
            lines: vec![ApprovedLine {
                item_id: ProcurementItemId::new(),
                quantity_approved: 1,
                unit_price: dec!(1),
            }],
            notes: None,
            occurred_at: test_time(),
        });
        assert!(matches!(
            request.handle(&cmd),
            Err(DomainError::NotFound { entity: "procurement item", .. })
        ));
    }

    #[test]
    fn distribution_total_past_i64_range_is_rejected() {
        let f = fixture();
        let request = received(&f, 100, 100, 100);
        let err = request
            .handle(&distribute_cmd(&f, &[(BranchId::new(), 50), (BranchId::new(), i64::MAX)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn line_total_past_decimal_range_is_rejected_at_creation() {
        let f = fixture();
        let request = ProcurementRequest::empty(f.request_id);
        assert!(matches!(
            request.handle(&create_cmd(&f, i64::MAX, dec!(10000000000))),
            Err(DomainError::Validation(msg)) if msg.contains("out of range")
        ));
    }

    #[test]
    fn renegotiated_price_past_decimal_range_is_rejected_at_approval() {
        let f = fixture();
        let mut request = ProcurementRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(&f, i64::MAX, dec!(0))).unwrap();
        assert!(matches!(
            request.handle(&approve_cmd(&f, i64::MAX, dec!(10000000000))),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(request.snapshot().unwrap().status, ProcurementStatus::Pending);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any accepted distribution keeps the per-item sum within the
        /// received quantity; any split exceeding it is refused.
        #[test]
        fn distribution_never_exceeds_received(
            received_qty in 1i64..500,
            split in prop::collection::vec(1i64..200, 1..6)
        ) {
            let f = fixture();
            let mut request = received(&f, received_qty, received_qty, received_qty);
            let lines: Vec<(BranchId, i64)> =
                split.iter().map(|&q| (BranchId::new(), q)).collect();
            let total: i64 = split.iter().sum();

            match execute(&mut request, &distribute_cmd(&f, &lines)) {
                Ok(_) => {
                    prop_assert!(total <= received_qty);
                    let s = request.snapshot().unwrap();
                    let distributed = s.distributed_by_item().get(&f.item_id).copied().unwrap_or(0);
                    prop_assert!(distributed <= s.items[0].quantity_received.unwrap());
                }
                Err(DomainError::Validation(_)) => prop_assert!(total > received_qty),
                Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
            }
        }
    }
}
