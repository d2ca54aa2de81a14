use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, AuditNote, BranchId, DomainError, ProductId,
    RequestNumber, TenantId, UserId, impl_uuid_newtype,
};
use stockflow_events::Event;

use crate::availability::{StockAvailability, demand_by_product};
use crate::status::{TransferOperation, TransferStatus};

/// Transfer request identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferRequestId(pub AggregateId);

impl TransferRequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferRequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of one line of a transfer request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferItemId(Uuid);

impl_uuid_newtype!(TransferItemId, "TransferItemId");

/// One product line of a transfer request.
///
/// Invariant: `quantity_transferred <= quantity_approved <= quantity_requested`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub item_id: TransferItemId,
    pub product_id: ProductId,
    pub quantity_requested: i64,
    pub quantity_approved: i64,
    pub quantity_transferred: i64,
}

/// Fully materialized state of a transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub request_id: TransferRequestId,
    pub tenant_id: TenantId,
    pub transfer_number: RequestNumber,
    pub source_branch_id: BranchId,
    pub destination_branch_id: BranchId,
    pub requested_by: UserId,
    pub approved_by: Option<UserId>,
    pub status: TransferStatus,
    pub items: Vec<TransferItem>,
    pub notes: Vec<AuditNote>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TransferSnapshot {
    /// Whether `branch_id` is the source or the destination.
    pub fn involves(&self, branch_id: BranchId) -> bool {
        self.source_branch_id == branch_id || self.destination_branch_id == branch_id
    }

    pub fn item(&self, item_id: TransferItemId) -> Option<&TransferItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    /// Units actually moved by this request.
    pub fn total_transferred(&self) -> i64 {
        self.items.iter().map(|i| i.quantity_transferred).sum()
    }
}

/// Aggregate root: TransferRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    id: TransferRequestId,
    snapshot: Option<TransferSnapshot>,
    version: u64,
}

impl TransferRequest {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferRequestId) -> Self {
        Self {
            id,
            snapshot: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> TransferRequestId {
        self.id
    }

    /// `None` until the creation event has been applied.
    pub fn snapshot(&self) -> Option<&TransferSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn into_snapshot(self) -> Option<TransferSnapshot> {
        self.snapshot
    }
}

impl AggregateRoot for TransferRequest {
    type Id = TransferRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A line supplied when creating a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransferLine {
    pub item_id: TransferItemId,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Command: CreateTransfer.
///
/// `availability` is the advisory, non-binding ledger read at the source branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub transfer_number: RequestNumber,
    pub source_branch_id: BranchId,
    pub destination_branch_id: BranchId,
    pub requested_by: UserId,
    pub lines: Vec<NewTransferLine>,
    pub availability: StockAvailability,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveTransfer.
///
/// `availability` is read at approval time and is the binding check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTransfer {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub approved_by: UserId,
    pub availability: StockAvailability,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Quantity actually shipped for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferredLine {
    pub item_id: TransferItemId,
    pub quantity_transferred: i64,
}

/// Command: CompleteTransfer. Lines left out ship nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTransfer {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub lines: Vec<TransferredLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTransfer {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Create(CreateTransfer),
    Approve(ApproveTransfer),
    Complete(CompleteTransfer),
    Reject(RejectTransfer),
    Cancel(CancelTransfer),
}

/// Quantity held at the source branch for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockHold {
    pub item_id: TransferItemId,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Outcome of completion for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedLine {
    pub item_id: TransferItemId,
    pub product_id: ProductId,
    pub quantity_transferred: i64,
    /// Over-reservation handed back (`approved - transferred`).
    pub quantity_released: i64,
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub transfer_number: RequestNumber,
    pub source_branch_id: BranchId,
    pub destination_branch_id: BranchId,
    pub requested_by: UserId,
    pub items: Vec<TransferItem>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferApproved. Each hold is reserved at the source branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub approved_by: UserId,
    pub reservations: Vec<StockHold>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub lines: Vec<CompletedLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRejected {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled. `released` is empty when nothing was reserved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub tenant_id: TenantId,
    pub request_id: TransferRequestId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub released: Vec<StockHold>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferCreated(TransferCreated),
    TransferApproved(TransferApproved),
    TransferCompleted(TransferCompleted),
    TransferRejected(TransferRejected),
    TransferCancelled(TransferCancelled),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "transfers.request.created",
            TransferEvent::TransferApproved(_) => "transfers.request.approved",
            TransferEvent::TransferCompleted(_) => "transfers.request.completed",
            TransferEvent::TransferRejected(_) => "transfers.request.rejected",
            TransferEvent::TransferCancelled(_) => "transfers.request.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferCreated(e) => e.occurred_at,
            TransferEvent::TransferApproved(e) => e.occurred_at,
            TransferEvent::TransferCompleted(e) => e.occurred_at,
            TransferEvent::TransferRejected(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TransferRequest {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferCreated(e) => {
                self.id = e.request_id;
                let notes = e
                    .notes
                    .iter()
                    .map(|text| AuditNote::new(e.requested_by, text.clone(), e.occurred_at))
                    .collect();
                self.snapshot = Some(TransferSnapshot {
                    request_id: e.request_id,
                    tenant_id: e.tenant_id,
                    transfer_number: e.transfer_number.clone(),
                    source_branch_id: e.source_branch_id,
                    destination_branch_id: e.destination_branch_id,
                    requested_by: e.requested_by,
                    approved_by: None,
                    status: TransferStatus::Pending,
                    items: e.items.clone(),
                    notes,
                    created_at: e.occurred_at,
                    approved_at: None,
                    completed_at: None,
                    updated_at: e.occurred_at,
                });
            }
            TransferEvent::TransferApproved(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    for hold in &e.reservations {
                        if let Some(item) = s.items.iter_mut().find(|i| i.item_id == hold.item_id) {
                            item.quantity_approved = hold.quantity;
                        }
                    }
                    if let Some(text) = &e.notes {
                        s.notes.push(AuditNote::new(e.approved_by, text.clone(), e.occurred_at));
                    }
                    s.status = TransferStatus::Approved;
                    s.approved_by = Some(e.approved_by);
                    s.approved_at = Some(e.occurred_at);
                    s.updated_at = e.occurred_at;
                }
            }
            TransferEvent::TransferCompleted(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    for line in &e.lines {
                        if let Some(item) = s.items.iter_mut().find(|i| i.item_id == line.item_id) {
                            item.quantity_transferred = line.quantity_transferred;
                        }
                    }
                    s.status = TransferStatus::Completed;
                    s.completed_at = Some(e.occurred_at);
                    s.updated_at = e.occurred_at;
                }
            }
            TransferEvent::TransferRejected(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    s.notes.push(AuditNote::new(e.rejected_by, e.reason.clone(), e.occurred_at));
                    s.status = TransferStatus::Cancelled;
                    s.updated_at = e.occurred_at;
                }
            }
            TransferEvent::TransferCancelled(e) => {
                if let Some(s) = self.snapshot.as_mut() {
                    s.notes.push(AuditNote::new(e.cancelled_by, e.reason.clone(), e.occurred_at));
                    s.status = TransferStatus::Cancelled;
                    s.updated_at = e.occurred_at;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Create(cmd) => self.handle_create(cmd),
            TransferCommand::Approve(cmd) => self.handle_approve(cmd),
            TransferCommand::Complete(cmd) => self.handle_complete(cmd),
            TransferCommand::Reject(cmd) => self.handle_reject(cmd),
            TransferCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn non_empty_reason(reason: &str) -> Result<String, DomainError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("a reason is required"));
    }
    Ok(reason.to_string())
}

fn clean_notes(notes: &Option<String>) -> Option<String> {
    notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

impl TransferRequest {
    /// Loaded snapshot for `request_id` within `tenant_id`.
    ///
    /// Requests of another tenant are reported as not found.
    fn existing(
        &self,
        tenant_id: TenantId,
        request_id: TransferRequestId,
    ) -> Result<&TransferSnapshot, DomainError> {
        let snapshot = self
            .snapshot
            .as_ref()
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or_else(|| DomainError::not_found("transfer request", request_id))?;
        if self.id != request_id {
            return Err(DomainError::invariant("request_id mismatch"));
        }
        Ok(snapshot)
    }

    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.snapshot.is_some() {
            return Err(DomainError::conflict("transfer request already exists"));
        }
        if cmd.source_branch_id == cmd.destination_branch_id {
            return Err(DomainError::validation(
                "destination branch must differ from source branch",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("a transfer needs at least one item"));
        }

        let mut seen = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            if seen.contains(&line.item_id) {
                return Err(DomainError::validation(format!(
                    "item {} listed more than once",
                    line.item_id
                )));
            }
            seen.push(line.item_id);
        }

        let demand = demand_by_product(cmd.lines.iter().map(|l| (l.product_id, l.quantity)))?;
        cmd.availability.ensure_covers(&demand)?;

        let items = cmd
            .lines
            .iter()
            .map(|l| TransferItem {
                item_id: l.item_id,
                product_id: l.product_id,
                quantity_requested: l.quantity,
                quantity_approved: 0,
                quantity_transferred: 0,
            })
            .collect();

        Ok(vec![TransferEvent::TransferCreated(TransferCreated {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            transfer_number: cmd.transfer_number.clone(),
            source_branch_id: cmd.source_branch_id,
            destination_branch_id: cmd.destination_branch_id,
            requested_by: cmd.requested_by,
            items,
            notes: clean_notes(&cmd.notes),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(TransferOperation::Approve)?;

        // Binding re-check: stock may have been consumed since creation.
        let demand = demand_by_product(
            current
                .items
                .iter()
                .map(|i| (i.product_id, i.quantity_requested)),
        )?;
        cmd.availability.ensure_covers(&demand)?;

        let reservations = current
            .items
            .iter()
            .map(|i| StockHold {
                item_id: i.item_id,
                product_id: i.product_id,
                quantity: i.quantity_requested,
            })
            .collect();

        Ok(vec![TransferEvent::TransferApproved(TransferApproved {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            approved_by: cmd.approved_by,
            reservations,
            notes: clean_notes(&cmd.notes),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(TransferOperation::Complete)?;

        let mut shipped: HashMap<TransferItemId, i64> = HashMap::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            let item = current
                .item(line.item_id)
                .ok_or_else(|| DomainError::not_found("transfer item", line.item_id))?;
            if line.quantity_transferred < 0 {
                return Err(DomainError::validation(format!(
                    "transferred quantity for item {} cannot be negative",
                    line.item_id
                )));
            }
            if line.quantity_transferred > item.quantity_approved {
                return Err(DomainError::validation(format!(
                    "item {} cannot transfer {} units: only {} approved",
                    line.item_id, line.quantity_transferred, item.quantity_approved
                )));
            }
            if shipped.insert(line.item_id, line.quantity_transferred).is_some() {
                return Err(DomainError::validation(format!(
                    "item {} listed more than once",
                    line.item_id
                )));
            }
        }

        let lines = current
            .items
            .iter()
            .map(|i| {
                let transferred = shipped.get(&i.item_id).copied().unwrap_or(0);
                CompletedLine {
                    item_id: i.item_id,
                    product_id: i.product_id,
                    quantity_transferred: transferred,
                    quantity_released: i.quantity_approved - transferred,
                }
            })
            .collect();

        Ok(vec![TransferEvent::TransferCompleted(TransferCompleted {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(TransferOperation::Reject)?;
        let reason = non_empty_reason(&cmd.reason)?;

        Ok(vec![TransferEvent::TransferRejected(TransferRejected {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            rejected_by: cmd.rejected_by,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        let current = self.existing(cmd.tenant_id, cmd.request_id)?;
        current.status.after(TransferOperation::Cancel)?;
        let reason = non_empty_reason(&cmd.reason)?;

        // Only an approved request holds stock.
        let released = match current.status {
            TransferStatus::Approved => current
                .items
                .iter()
                .filter(|i| i.quantity_approved > 0)
                .map(|i| StockHold {
                    item_id: i.item_id,
                    product_id: i.product_id,
                    quantity: i.quantity_approved,
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(vec![TransferEvent::TransferCancelled(TransferCancelled {
            tenant_id: cmd.tenant_id,
            request_id: cmd.request_id,
            cancelled_by: cmd.cancelled_by,
            reason,
            released,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use stockflow_core::TRANSFER_PREFIX;
    use stockflow_events::execute;

    struct Fixture {
        tenant_id: TenantId,
        request_id: TransferRequestId,
        source: BranchId,
        destination: BranchId,
        user: UserId,
        product: ProductId,
        item_id: TransferItemId,
    }

    fn fixture() -> Fixture {
        Fixture {
            tenant_id: TenantId::new(),
            request_id: TransferRequestId::new(AggregateId::new()),
            source: BranchId::new(),
            destination: BranchId::new(),
            user: UserId::new(),
            product: ProductId::new(),
            item_id: TransferItemId::new(),
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn number() -> RequestNumber {
        RequestNumber::next(
            TRANSFER_PREFIX,
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            0,
        )
    }

    fn create_cmd(f: &Fixture, quantity: i64, available: i64) -> TransferCommand {
        TransferCommand::Create(CreateTransfer {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            transfer_number: number(),
            source_branch_id: f.source,
            destination_branch_id: f.destination,
            requested_by: f.user,
            lines: vec![NewTransferLine {
                item_id: f.item_id,
                product_id: f.product,
                quantity,
            }],
            availability: StockAvailability::new().with(f.product, available),
            notes: Some("restock weekend".to_string()),
            occurred_at: test_time(),
        })
    }

    fn approve_cmd(f: &Fixture, available: i64) -> TransferCommand {
        TransferCommand::Approve(ApproveTransfer {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            approved_by: f.user,
            availability: StockAvailability::new().with(f.product, available),
            notes: None,
            occurred_at: test_time(),
        })
    }

    fn complete_cmd(f: &Fixture, transferred: i64) -> TransferCommand {
        TransferCommand::Complete(CompleteTransfer {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            lines: vec![TransferredLine {
                item_id: f.item_id,
                quantity_transferred: transferred,
            }],
            occurred_at: test_time(),
        })
    }

    fn cancel_cmd(f: &Fixture) -> TransferCommand {
        TransferCommand::Cancel(CancelTransfer {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            cancelled_by: f.user,
            reason: "no longer needed".to_string(),
            occurred_at: test_time(),
        })
    }

    fn created(f: &Fixture, quantity: i64) -> TransferRequest {
        let mut request = TransferRequest::empty(f.request_id);
        execute(&mut request, &create_cmd(f, quantity, quantity)).unwrap();
        request
    }

    fn approved(f: &Fixture, quantity: i64) -> TransferRequest {
        let mut request = created(f, quantity);
        execute(&mut request, &approve_cmd(f, quantity)).unwrap();
        request
    }

    #[test]
    fn create_emits_pending_request_with_zeroed_quantities() {
        let f = fixture();
        let request = created(&f, 10);
        let s = request.snapshot().unwrap();

        assert_eq!(s.status, TransferStatus::Pending);
        assert_eq!(s.transfer_number.as_str(), "TRF202610160001");
        assert_eq!(s.items.len(), 1);
        assert_eq!(s.items[0].quantity_requested, 10);
        assert_eq!(s.items[0].quantity_approved, 0);
        assert_eq!(s.items[0].quantity_transferred, 0);
        assert_eq!(s.notes.len(), 1);
        assert_eq!(request.version(), 1);
    }

    #[test]
    fn create_with_insufficient_stock_emits_nothing() {
        let f = fixture();
        let request = TransferRequest::empty(f.request_id);
        let err = request.handle(&create_cmd(&f, 30, 20)).unwrap_err();
        assert_eq!(err, DomainError::insufficient(f.product, 30, 20));
        assert_eq!(err.shortfall(), 10);
    }

    #[test]
    fn create_rejects_same_source_and_destination() {
        let mut f = fixture();
        f.destination = f.source;
        let err = TransferRequest::empty(f.request_id)
            .handle(&create_cmd(&f, 1, 1))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("differ")));
    }

    #[test]
    fn create_rejects_non_positive_quantity_and_empty_items() {
        let f = fixture();
        let request = TransferRequest::empty(f.request_id);
        assert!(matches!(
            request.handle(&create_cmd(&f, 0, 10)),
            Err(DomainError::Validation(_))
        ));

        let TransferCommand::Create(mut cmd) = create_cmd(&f, 1, 1) else {
            unreachable!()
        };
        cmd.lines.clear();
        assert!(matches!(
            request.handle(&TransferCommand::Create(cmd)),
            Err(DomainError::Validation(msg)) if msg.contains("at least one item")
        ));
    }

    #[test]
    fn create_sums_demand_for_repeated_products() {
        let f = fixture();
        let TransferCommand::Create(mut cmd) = create_cmd(&f, 6, 10) else {
            unreachable!()
        };
        cmd.lines.push(NewTransferLine {
            item_id: TransferItemId::new(),
            product_id: f.product,
            quantity: 6,
        });
        let err = TransferRequest::empty(f.request_id)
            .handle(&TransferCommand::Create(cmd))
            .unwrap_err();
        assert_eq!(err, DomainError::insufficient(f.product, 12, 10));
    }

    #[test]
    fn approve_reserves_requested_quantities() {
        let f = fixture();
        let request = created(&f, 10);
        let events = request.handle(&approve_cmd(&f, 20)).unwrap();

        match &events[0] {
            TransferEvent::TransferApproved(e) => {
                assert_eq!(e.reservations.len(), 1);
                assert_eq!(e.reservations[0].quantity, 10);
                assert_eq!(e.reservations[0].product_id, f.product);
            }
            other => panic!("expected TransferApproved, got {other:?}"),
        }

        let mut request = request;
        request.apply(&events[0]);
        let s = request.snapshot().unwrap();
        assert_eq!(s.status, TransferStatus::Approved);
        assert_eq!(s.items[0].quantity_approved, 10);
        assert_eq!(s.approved_by, Some(f.user));
        assert!(s.approved_at.is_some());
    }

    #[test]
    fn approve_fails_when_stock_was_consumed_after_creation() {
        let f = fixture();
        let request = created(&f, 10);
        let err = request.handle(&approve_cmd(&f, 4)).unwrap_err();
        assert_eq!(err, DomainError::insufficient(f.product, 10, 4));
        assert_eq!(request.snapshot().unwrap().status, TransferStatus::Pending);
    }

    #[test]
    fn second_approve_is_an_invalid_transition() {
        let f = fixture();
        let request = approved(&f, 10);
        let err = request.handle(&approve_cmd(&f, 100)).unwrap_err();
        assert_eq!(err, DomainError::invalid_transition("approve", "approved"));
    }

    #[test]
    fn partial_completion_releases_the_difference() {
        let f = fixture();
        let mut request = approved(&f, 10);
        let events = execute(&mut request, &complete_cmd(&f, 7)).unwrap();

        match &events[0] {
            TransferEvent::TransferCompleted(e) => {
                assert_eq!(e.lines[0].quantity_transferred, 7);
                assert_eq!(e.lines[0].quantity_released, 3);
            }
            other => panic!("expected TransferCompleted, got {other:?}"),
        }
        let s = request.snapshot().unwrap();
        assert_eq!(s.status, TransferStatus::Completed);
        assert_eq!(s.items[0].quantity_transferred, 7);
        assert_eq!(s.total_transferred(), 7);
    }

    #[test]
    fn completion_cannot_exceed_approved_quantity() {
        let f = fixture();
        let request = approved(&f, 10);
        assert!(matches!(
            request.handle(&complete_cmd(&f, 11)),
            Err(DomainError::Validation(msg)) if msg.contains("only 10 approved")
        ));
    }

    #[test]
    fn completion_with_unknown_item_is_not_found() {
        let f = fixture();
        let request = approved(&f, 10);
        let cmd = TransferCommand::Complete(CompleteTransfer {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            lines: vec![TransferredLine {
                item_id: TransferItemId::new(),
                quantity_transferred: 1,
            }],
            occurred_at: test_time(),
        });
        assert!(matches!(
            request.handle(&cmd),
            Err(DomainError::NotFound { entity: "transfer item", .. })
        ));
    }

    #[test]
    fn complete_before_approval_is_an_invalid_transition() {
        let f = fixture();
        let request = created(&f, 10);
        assert_eq!(
            request.handle(&complete_cmd(&f, 10)).unwrap_err(),
            DomainError::invalid_transition("complete", "pending")
        );
    }

    #[test]
    fn reject_after_approval_is_an_invalid_transition() {
        let f = fixture();
        let request = approved(&f, 10);
        let cmd = TransferCommand::Reject(RejectTransfer {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            rejected_by: f.user,
            reason: "too late".to_string(),
            occurred_at: test_time(),
        });
        assert_eq!(
            request.handle(&cmd).unwrap_err(),
            DomainError::invalid_transition("reject", "approved")
        );
    }

    #[test]
    fn reject_requires_a_reason_and_appends_it() {
        let f = fixture();
        let mut request = created(&f, 10);
        let mut cmd = RejectTransfer {
            tenant_id: f.tenant_id,
            request_id: f.request_id,
            rejected_by: f.user,
            reason: "   ".to_string(),
            occurred_at: test_time(),
        };
        assert!(matches!(
            request.handle(&TransferCommand::Reject(cmd.clone())),
            Err(DomainError::Validation(_))
        ));

        cmd.reason = "branch closed".to_string();
        execute(&mut request, &TransferCommand::Reject(cmd)).unwrap();
        let s = request.snapshot().unwrap();
        assert_eq!(s.status, TransferStatus::Cancelled);
        assert_eq!(s.notes.last().unwrap().text, "branch closed");
    }

    #[test]
    fn cancel_of_approved_request_releases_every_reservation() {
        let f = fixture();
        let request = approved(&f, 10);
        let events = request.handle(&cancel_cmd(&f)).unwrap();
        match &events[0] {
            TransferEvent::TransferCancelled(e) => {
                assert_eq!(e.released.len(), 1);
                assert_eq!(e.released[0].quantity, 10);
            }
            other => panic!("expected TransferCancelled, got {other:?}"),
        }
    }

    #[test]
    fn cancel_of_pending_request_releases_nothing() {
        let f = fixture();
        let request = created(&f, 10);
        match &request.handle(&cancel_cmd(&f)).unwrap()[0] {
            TransferEvent::TransferCancelled(e) => assert!(e.released.is_empty()),
            other => panic!("expected TransferCancelled, got {other:?}"),
        }
    }

    #[test]
    fn terminal_request_rejects_further_operations() {
        let f = fixture();
        let mut request = approved(&f, 10);
        execute(&mut request, &complete_cmd(&f, 10)).unwrap();

        assert_eq!(
            request.handle(&cancel_cmd(&f)).unwrap_err(),
            DomainError::invalid_transition("cancel", "completed")
        );
        assert_eq!(
            request.handle(&complete_cmd(&f, 10)).unwrap_err(),
            DomainError::invalid_transition("complete", "completed")
        );
    }

    #[test]
    fn other_tenant_sees_not_found() {
        let f = fixture();
        let request = created(&f, 10);
        let other = Fixture {
            tenant_id: TenantId::new(),
            ..fixture()
        };
        let cmd = TransferCommand::Approve(ApproveTransfer {
            tenant_id: other.tenant_id,
            request_id: f.request_id,
            approved_by: f.user,
            availability: StockAvailability::new().with(f.product, 10),
            notes: None,
            occurred_at: test_time(),
        });
        assert!(matches!(
            request.handle(&cmd),
            Err(DomainError::NotFound { entity: "transfer request", .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: approved <= requested and transferred <= approved at every
        /// step, and released + transferred always equals the approved hold.
        #[test]
        fn quantities_stay_ordered_through_the_lifecycle(
            requested in 1i64..1_000,
            shipped_ratio in 0u32..=100
        ) {
            let f = fixture();
            let mut request = created(&f, requested);
            let check = |r: &TransferRequest| {
                for i in &r.snapshot().unwrap().items {
                    assert!(i.quantity_approved <= i.quantity_requested);
                    assert!(i.quantity_transferred <= i.quantity_approved);
                }
            };
            check(&request);

            execute(&mut request, &approve_cmd(&f, requested)).unwrap();
            check(&request);

            let shipped = requested * i64::from(shipped_ratio) / 100;
            let events = execute(&mut request, &complete_cmd(&f, shipped)).unwrap();
            check(&request);

            let TransferEvent::TransferCompleted(done) = &events[0] else {
                panic!("expected TransferCompleted");
            };
            prop_assert_eq!(
                done.lines[0].quantity_transferred + done.lines[0].quantity_released,
                requested
            );
        }
    }
}
