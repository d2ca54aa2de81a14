//! `stockflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the transfer and
//! procurement workflows (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod note;
pub mod numbering;
pub mod range;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, BranchId, ProductId, TenantId, UserId};
pub use note::AuditNote;
pub use numbering::{PROCUREMENT_PREFIX, RequestNumber, TRANSFER_PREFIX};
pub use range::DateRange;
