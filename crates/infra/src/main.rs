//! `stockflow-demo`: runs a transfer and a procurement end to end against
//! in-memory backends and logs every transition.

use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::info;

use stockflow_core::{BranchId, DateRange, ProductId, TenantId, UserId};
use stockflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockflow_infra::config::Settings;
use stockflow_infra::{
    InMemoryBranchDirectory, InMemoryUnitOfWork, NewProcurement, NewTransfer, ProcurementLine,
    ProcurementWorkflow, TransferLine, TransferWorkflow, WorkflowError,
};
use stockflow_ledger::{InMemoryInventoryLedger, InventoryLedger};
use stockflow_procurement::{ApprovedLine, DistributionLine, ProcurementKind, ReceivedLine};
use stockflow_transfers::TransferredLine;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load().context("failed to load settings")?;
    stockflow_observability::init(&settings.logging);

    let tenant = TenantId::new();
    let (main_branch, branch_a, branch_b) = (BranchId::new(), BranchId::new(), BranchId::new());
    let (paracetamol, gauze) = (ProductId::new(), ProductId::new());
    let clerk = UserId::new();
    let manager = UserId::new();

    let branches = Arc::new(InMemoryBranchDirectory::new());
    branches.register_main(tenant, main_branch);
    branches.register(tenant, branch_a);
    branches.register(tenant, branch_b);

    let mut ledger = InMemoryInventoryLedger::new();
    ledger.update_inventory(tenant, branch_a, paracetamol, 20, "opening balance")?;
    let uow = Arc::new(InMemoryUnitOfWork::with_ledger(ledger));

    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let published = bus.subscribe();

    let transfers = TransferWorkflow::new(uow.clone(), branches.clone(), bus.clone())
        .with_prefix(settings.numbering.transfer_prefix.clone());
    let procurement = ProcurementWorkflow::new(uow.clone(), branches.clone(), bus.clone())
        .with_prefix(settings.numbering.procurement_prefix.clone());

    // Transfer: 10 units of paracetamol from A to B.
    let transfer = transfers.create(NewTransfer {
        tenant_id: tenant,
        source_branch_id: branch_a,
        destination_branch_id: branch_b,
        requested_by: clerk,
        items: vec![TransferLine {
            product_id: paracetamol,
            quantity: 10,
        }],
        notes: Some("weekend restock".to_string()),
    })?;
    transfers.approve(tenant, transfer.request_id, manager, None)?;
    let lines = transfer
        .items
        .iter()
        .map(|item| TransferredLine {
            item_id: item.item_id,
            quantity_transferred: item.quantity_requested,
        })
        .collect();
    let transfer = transfers.complete(tenant, transfer.request_id, lines)?;
    info!(
        transfer_number = %transfer.transfer_number,
        status = transfer.status.as_str(),
        "transfer finished"
    );

    // Asking for more than branch A still has is refused up front.
    match transfers.create(NewTransfer {
        tenant_id: tenant,
        source_branch_id: branch_a,
        destination_branch_id: branch_b,
        requested_by: clerk,
        items: vec![TransferLine {
            product_id: paracetamol,
            quantity: 30,
        }],
        notes: None,
    }) {
        Err(e @ WorkflowError::InsufficientInventory { .. }) => {
            info!(shortfall = e.shortfall(), "oversized transfer refused as expected")
        }
        other => anyhow::bail!("expected an insufficient inventory error, got {other:?}"),
    }

    // Procurement: 100 requested, 80 approved, 75 received, split 50 / 25.
    let request = procurement.create(NewProcurement {
        tenant_id: tenant,
        kind: ProcurementKind::Central,
        requesting_branch_id: main_branch,
        supplier: Some("Medisupply Ltd".to_string()),
        requested_by: clerk,
        items: vec![ProcurementLine {
            product_id: gauze,
            quantity: 100,
            unit_price: Decimal::new(250, 2),
            notes: None,
        }],
        expected_delivery_date: None,
        notes: None,
    })?;
    let item_id = request
        .items
        .first()
        .map(|i| i.item_id)
        .context("procurement request has no items")?;

    procurement.approve(
        tenant,
        request.request_id,
        manager,
        vec![ApprovedLine {
            item_id,
            quantity_approved: 80,
            unit_price: Decimal::new(225, 2),
        }],
        Some("bulk price agreed".to_string()),
    )?;
    procurement.receive(
        tenant,
        request.request_id,
        clerk,
        vec![ReceivedLine {
            item_id,
            quantity_received: 75,
        }],
    )?;
    let request = procurement.distribute(
        tenant,
        request.request_id,
        manager,
        vec![
            DistributionLine {
                branch_id: branch_a,
                item_id,
                quantity: 50,
            },
            DistributionLine {
                branch_id: branch_b,
                item_id,
                quantity: 25,
            },
        ],
    )?;
    info!(
        request_number = %request.request_number,
        status = request.status.as_str(),
        total_amount = %request.total_amount,
        "procurement finished"
    );

    let stats = transfers.get_stats(tenant, branch_a, DateRange::unbounded())?;
    info!(
        completed = stats.completed,
        units_transferred = stats.units_transferred,
        "transfer stats for branch A"
    );
    let stats = procurement.get_stats(tenant, main_branch, DateRange::unbounded())?;
    info!(
        completed = stats.completed,
        completed_amount = %stats.completed_amount,
        "procurement stats for the main branch"
    );

    for envelope in published.drain() {
        info!(
            event_type = envelope.event_type(),
            sequence = envelope.sequence_number(),
            aggregate_id = %envelope.aggregate_id(),
            "published"
        );
    }

    Ok(())
}
