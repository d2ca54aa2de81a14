//! Workflow error model surfaced to callers of the transfer and procurement services.

use thiserror::Error;

use stockflow_core::{DomainError, ProductId};
use stockflow_ledger::LedgerError;

use crate::event_store::EventStoreError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Error returned by every workflow operation.
///
/// Any error returned from inside a unit of work means nothing was committed:
/// request state, ledger holds, and the event stream are all left untouched.
/// The one exception is `Publish`, which is reported after a successful commit.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot {operation} a request in status '{status}'")]
    InvalidStateTransition {
        operation: &'static str,
        status: &'static str,
    },

    #[error(
        "insufficient inventory for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientInventory {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// A ledger primitive failed; the whole operation was rolled back.
    #[error("ledger operation failed: {0}")]
    LedgerOperationFailed(#[from] LedgerError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Optimistic concurrency failure (stale stream version).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// A stored event payload could not be read back into its typed form.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// Publication failed after commit (at-least-once; republishing is safe).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Units missing for an `InsufficientInventory` error, zero otherwise.
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

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => WorkflowError::Validation(msg),
            DomainError::NotFound { entity, id } => WorkflowError::NotFound { entity, id },
            DomainError::InvalidStateTransition { operation, status } => {
                WorkflowError::InvalidStateTransition { operation, status }
            }
            DomainError::InsufficientInventory {
                product_id,
                requested,
                available,
            } => WorkflowError::InsufficientInventory {
                product_id,
                requested,
                available,
            },
            DomainError::InvariantViolation(msg) => WorkflowError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => WorkflowError::Validation(msg),
            DomainError::Conflict(msg) => WorkflowError::Conflict(msg),
        }
    }
}

impl From<EventStoreError> for WorkflowError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => WorkflowError::Conflict(msg),
            EventStoreError::TenantIsolation(msg) => WorkflowError::TenantIsolation(msg),
            other => WorkflowError::Store(other),
        }
    }
}
