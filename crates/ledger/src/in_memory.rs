use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stockflow_core::{BranchId, ProductId, TenantId};

use crate::ledger::{InventoryLedger, LedgerError, StockLevel};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StockKey {
    tenant_id: TenantId,
    branch_id: BranchId,
    product_id: ProductId,
}

/// Kind of a recorded ledger movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Reserved,
    Released,
    TransferredOut,
    TransferredIn,
    Adjusted,
}

/// One applied ledger primitive, in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub note: Option<String>,
}

/// Pre-images of the levels touched since [`InMemoryInventoryLedger::begin`].
#[derive(Debug, Clone, Default)]
struct Checkpoint {
    levels: HashMap<StockKey, Option<StockLevel>>,
    movements: usize,
}

/// In-memory ledger keyed by (tenant, branch, product).
///
/// Intended for tests/dev. Between `begin` and `commit` every touched level is
/// journaled, so `rollback` undoes a unit of work in time proportional to what
/// it changed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryLedger {
    levels: HashMap<StockKey, StockLevel>,
    movements: Vec<StockMovement>,
    checkpoint: Option<Checkpoint>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every primitive applied since the last drain.
    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    /// Hand the movement log to the caller and start a fresh one.
    ///
    /// Drained movements are not restored by a later `rollback`.
    pub fn drain_movements(&mut self) -> Vec<StockMovement> {
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            checkpoint.movements = 0;
        }
        std::mem::take(&mut self.movements)
    }

    /// Start journaling. A checkpoint already open is kept.
    pub fn begin(&mut self) {
        if self.checkpoint.is_none() {
            self.checkpoint = Some(Checkpoint {
                levels: HashMap::new(),
                movements: self.movements.len(),
            });
        }
    }

    /// Keep every change since `begin`.
    pub fn commit(&mut self) {
        self.checkpoint = None;
    }

    /// Undo every change since `begin`. A no-op without an open checkpoint.
    pub fn rollback(&mut self) {
        let Some(checkpoint) = self.checkpoint.take() else {
            return;
        };
        for (key, previous) in checkpoint.levels {
            match previous {
                Some(level) => self.levels.insert(key, level),
                None => self.levels.remove(&key),
            };
        }
        self.movements.truncate(checkpoint.movements);
    }

    fn key(tenant_id: TenantId, branch_id: BranchId, product_id: ProductId) -> StockKey {
        StockKey {
            tenant_id,
            branch_id,
            product_id,
        }
    }

    fn current(&self, key: StockKey) -> StockLevel {
        self.levels.get(&key).copied().unwrap_or_default()
    }

    fn store(&mut self, key: StockKey, level: StockLevel) {
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            checkpoint
                .levels
                .entry(key)
                .or_insert_with(|| self.levels.get(&key).copied());
        }
        self.levels.insert(key, level);
    }

    fn record(&mut self, key: StockKey, kind: MovementKind, quantity: i64, note: Option<&str>) {
        self.movements.push(StockMovement {
            tenant_id: key.tenant_id,
            branch_id: key.branch_id,
            product_id: key.product_id,
            kind,
            quantity,
            note: note.map(str::to_string),
        });
    }

    fn ensure_non_negative(quantity: i64) -> Result<(), LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "quantity cannot be negative (got {quantity})"
            )));
        }
        Ok(())
    }
}

impl InventoryLedger for InMemoryInventoryLedger {
    fn level(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
    ) -> Result<StockLevel, LedgerError> {
        Ok(self.current(Self::key(tenant_id, branch_id, product_id)))
    }

    fn reserve(
        &mut self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        Self::ensure_non_negative(quantity)?;
        if quantity == 0 {
            return Ok(());
        }

        let key = Self::key(tenant_id, branch_id, product_id);
        let mut level = self.current(key);
        if level.available() < quantity {
            return Err(LedgerError::InsufficientStock {
                branch_id,
                product_id,
                requested: quantity,
                available: level.available(),
            });
        }

        level.reserved += quantity;
        self.store(key, level);
        self.record(key, MovementKind::Reserved, quantity, None);
        debug!(branch = %branch_id, product = %product_id, quantity, "stock reserved");
        Ok(())
    }

    fn release(
        &mut self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        Self::ensure_non_negative(quantity)?;
        if quantity == 0 {
            return Ok(());
        }

        let key = Self::key(tenant_id, branch_id, product_id);
        let mut level = self.current(key);
        if level.reserved < quantity {
            return Err(LedgerError::InsufficientReservation {
                branch_id,
                product_id,
                requested: quantity,
                reserved: level.reserved,
            });
        }

        level.reserved -= quantity;
        self.store(key, level);
        self.record(key, MovementKind::Released, quantity, None);
        debug!(branch = %branch_id, product = %product_id, quantity, "reservation released");
        Ok(())
    }

    fn transfer(
        &mut self,
        tenant_id: TenantId,
        source: BranchId,
        destination: BranchId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        Self::ensure_non_negative(quantity)?;
        if quantity == 0 {
            return Ok(());
        }
        if source == destination {
            return Err(LedgerError::InvalidQuantity(
                "source and destination branch must differ".to_string(),
            ));
        }

        let from_key = Self::key(tenant_id, source, product_id);
        let to_key = Self::key(tenant_id, destination, product_id);

        // The moved quantity must already be held at the source.
        let mut from = self.current(from_key);
        if from.reserved < quantity || from.on_hand < quantity {
            return Err(LedgerError::InsufficientReservation {
                branch_id: source,
                product_id,
                requested: quantity,
                reserved: from.reserved,
            });
        }
        let mut to = self.current(to_key);
        to.on_hand = to.on_hand.checked_add(quantity).ok_or_else(|| {
            LedgerError::InvalidQuantity(format!("quantity {quantity} overflows the destination"))
        })?;

        from.on_hand -= quantity;
        from.reserved -= quantity;

        self.store(from_key, from);
        self.store(to_key, to);
        self.record(from_key, MovementKind::TransferredOut, quantity, None);
        self.record(to_key, MovementKind::TransferredIn, quantity, None);
        debug!(
            source = %source,
            destination = %destination,
            product = %product_id,
            quantity,
            "stock transferred"
        );
        Ok(())
    }

    fn update_inventory(
        &mut self,
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
        delta: i64,
        note: &str,
    ) -> Result<(), LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidQuantity("delta cannot be zero".to_string()));
        }

        let key = Self::key(tenant_id, branch_id, product_id);
        let mut level = self.current(key);
        let on_hand = level
            .on_hand
            .checked_add(delta)
            .ok_or_else(|| LedgerError::InvalidQuantity(format!("delta {delta} overflows")))?;
        if on_hand < level.reserved {
            return Err(LedgerError::NegativeOnHand {
                branch_id,
                product_id,
                delta,
            });
        }

        level.on_hand = on_hand;
        self.store(key, level);
        self.record(key, MovementKind::Adjusted, delta, Some(note));
        debug!(branch = %branch_id, product = %product_id, delta, note, "inventory adjusted");
        Ok(())
    }
}
