use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

/// Transfer request lifecycle.
///
/// ```text
/// pending ──approve──▶ approved ──complete──▶ completed
///    │                    │
///    └─reject/cancel──▶ cancelled ◀──cancel──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Approved,
    Completed,
    Cancelled,
}

/// State-changing operations on an existing transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOperation {
    Approve,
    Complete,
    Reject,
    Cancel,
}

impl TransferOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferOperation::Approve => "approve",
            TransferOperation::Complete => "complete",
            TransferOperation::Reject => "reject",
            TransferOperation::Cancel => "cancel",
        }
    }
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 4] = [
        TransferStatus::Pending,
        TransferStatus::Approved,
        TransferStatus::Completed,
        TransferStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }

    /// Status reached by applying `operation`, or `InvalidStateTransition`.
    pub fn after(self, operation: TransferOperation) -> Result<TransferStatus, DomainError> {
        use TransferOperation as Op;
        use TransferStatus as S;

        match (self, operation) {
            (S::Pending, Op::Approve) => Ok(S::Approved),
            (S::Approved, Op::Complete) => Ok(S::Completed),
            (S::Pending, Op::Reject) => Ok(S::Cancelled),
            (S::Pending | S::Approved, Op::Cancel) => Ok(S::Cancelled),
            (status, op) => Err(DomainError::invalid_transition(op.as_str(), status.as_str())),
        }
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
