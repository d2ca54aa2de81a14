use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{BranchId, ProductId, TenantId};

/// Stock position of one product at one branch.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    /// Physical quantity at the branch.
    pub on_hand: i64,
    /// Quantity held for in-flight requests.
    pub reserved: i64,
}

impl StockLevel {
    /// Quantity-on-hand minus currently reserved quantity.
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

/// Ledger primitive failure. Every failure leaves the ledger unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(
        "insufficient stock of product {product_id} at branch {branch_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        branch_id: BranchId,
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    #[error(
        "cannot consume {requested} reserved units of product {product_id} at branch {branch_id}: only {reserved} reserved"
    )]
    InsufficientReservation {
        branch_id: BranchId,
        product_id: ProductId,
        requested: i64,
        reserved: i64,
    },

    #[error(
        "adjusting product {product_id} at branch {branch_id} by {delta} would leave on-hand below reserved stock"
    )]
    NegativeOnHand {
        branch_id: BranchId,
        product_id: ProductId,
        delta: i64,
    },

    #[error("invalid ledger quantity: {0}")]
    InvalidQuantity(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Atomic per-branch-per-product ledger primitives consumed by the workflows.
///
/// Implementations serialize conflicting calls themselves; the workflow layer
/// holds no locks of its own. All quantities are non-negative; a zero quantity is
/// a no-op for `reserve`, `release`, and `transfer`.
pub trait InventoryLedger {
    /// Current stock position (zeroed if the product was never stocked there).
    fn level(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
    ) -> Result<StockLevel, LedgerError>;

    /// Currently unreserved stock; reflects prior `reserve` calls.
    fn available(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
    ) -> Result<i64, LedgerError> {
        Ok(self.level(tenant_id, branch_id, product_id)?.available())
    }

    /// Hold `quantity` against available stock without touching on-hand.
    fn reserve(
        &mut self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), LedgerError>;

    /// Return previously reserved quantity to available stock.
    fn release(
        &mut self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), LedgerError>;

    /// Move reserved stock from `source` to `destination` on-hand.
    fn transfer(
        &mut self,
        tenant_id: TenantId,
        source: BranchId,
        destination: BranchId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), LedgerError>;

    /// Adjust on-hand by a signed, non-zero delta (newly procured stock).
    fn update_inventory(
        &mut self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
        delta: i64,
        note: &str,
    ) -> Result<(), LedgerError>;
}
