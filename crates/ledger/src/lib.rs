//! Inventory ledger boundary.
//!
//! The workflows treat the per-branch, per-product ledger as an external
//! collaborator with atomic `available` / `reserve` / `release` / `transfer` /
//! `update_inventory` primitives. This crate defines that contract and an
//! in-memory implementation used by tests, the demo binary, and the in-memory
//! unit of work.

pub mod in_memory;
pub mod ledger;

pub use in_memory::{InMemoryInventoryLedger, MovementKind, StockMovement};
pub use ledger::{InventoryLedger, LedgerError, StockLevel};
