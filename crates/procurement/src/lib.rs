//! Procurement domain module (supplier acquisition + distribution, event-sourced).
//!
//! This crate contains business rules for procurement requests, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage).

pub mod request;
pub mod status;

pub use request::{
    ApproveProcurement, ApprovedLine, CancelProcurement, CreateProcurement, DistributeProcurement,
    DistributionLine, NewProcurementLine, ProcurementApproved, ProcurementCancelled,
    ProcurementCommand, ProcurementCreated, ProcurementDistributed, ProcurementDistribution,
    ProcurementEvent, ProcurementItem, ProcurementItemId, ProcurementReceived, ProcurementRejected,
    ProcurementRequest, ProcurementRequestId, ProcurementSnapshot, ReceiveProcurement,
    ReceivedLine, RejectProcurement,
};
pub use status::{ProcurementKind, ProcurementOperation, ProcurementStatus};
