//! Domain error model.

use thiserror::Error;

use crate::id::ProductId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// state machine violations, stock shortfalls). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. zero quantity, empty item list).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A request, item, or referenced entity does not exist for this tenant.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation is not legal from the request's current status.
    #[error("cannot {operation} a request in status '{status}'")]
    InvalidStateTransition {
        operation: &'static str,
        status: &'static str,
    },

    /// Not enough unreserved stock to cover the requested quantity.
    #[error(
        "insufficient inventory for product {product_id}: requested {requested}, available {available} (short by {})",
        .requested - .available
    )]
    InsufficientInventory {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(operation: &'static str, status: &'static str) -> Self {
        Self::InvalidStateTransition { operation, status }
    }

    pub fn insufficient(product_id: ProductId, requested: i64, available: i64) -> Self {
        Self::InsufficientInventory {
            product_id,
            requested,
            available,
        }
    }

    /// Missing quantity for an `InsufficientInventory` error, zero otherwise.
    pub fn shortfall(&self) -> i64 {
        match self {
            Self::InsufficientInventory {
                requested,
                available,
                ..
            } => (requested - available).max(0),
            _ => 0,
        }
    }
}
