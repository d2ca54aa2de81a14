//! Transfer domain module (branch-to-branch stock movement requests, event-sourced).
//!
//! This crate contains the transfer request state machine, implemented purely as
//! deterministic domain logic (no IO, no ledger access, no storage). Ledger facts
//! the decisions depend on arrive inside the commands.

pub mod availability;
pub mod request;
pub mod status;

pub use availability::{StockAvailability, demand_by_product};
pub use request::{
    ApproveTransfer, CancelTransfer, CompleteTransfer, CompletedLine, CreateTransfer,
    NewTransferLine, RejectTransfer, StockHold, TransferApproved, TransferCancelled,
    TransferCommand, TransferCompleted, TransferCreated, TransferEvent, TransferItem,
    TransferItemId, TransferRejected, TransferRequest, TransferRequestId, TransferSnapshot,
    TransferredLine,
};
pub use status::{TransferOperation, TransferStatus};
