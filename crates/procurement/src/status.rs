use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

/// Where procured stock is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcurementKind {
    /// Bought for the tenant's main branch and fanned out afterwards.
    Central,
    /// Bought for the single requesting branch.
    Branch,
}

impl ProcurementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcurementKind::Central => "central",
            ProcurementKind::Branch => "branch",
        }
    }
}

/// Procurement request lifecycle.
///
/// Once approved there is no way back: supplier commitments only move forward
/// (`approved → received → completed`). Only a pending request can be rejected or
/// cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcurementStatus {
    Pending,
    Approved,
    Received,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcurementOperation {
    Approve,
    Reject,
    Cancel,
    Receive,
    Distribute,
}

impl ProcurementOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcurementOperation::Approve => "approve",
            ProcurementOperation::Reject => "reject",
            ProcurementOperation::Cancel => "cancel",
            ProcurementOperation::Receive => "receive",
            ProcurementOperation::Distribute => "distribute",
        }
    }
}

impl ProcurementStatus {
    pub const ALL: [ProcurementStatus; 5] = [
        ProcurementStatus::Pending,
        ProcurementStatus::Approved,
        ProcurementStatus::Received,
        ProcurementStatus::Completed,
        ProcurementStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcurementStatus::Pending => "pending",
            ProcurementStatus::Approved => "approved",
            ProcurementStatus::Received => "received",
            ProcurementStatus::Completed => "completed",
            ProcurementStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcurementStatus::Completed | ProcurementStatus::Cancelled)
    }

    /// Status reached by applying `operation`, or `InvalidStateTransition`.
    pub fn after(self, operation: ProcurementOperation) -> Result<ProcurementStatus, DomainError> {
        use ProcurementOperation as Op;
        use ProcurementStatus as S;

        match (self, operation) {
            (S::Pending, Op::Approve) => Ok(S::Approved),
            (S::Pending, Op::Reject | Op::Cancel) => Ok(S::Cancelled),
            (S::Approved, Op::Receive) => Ok(S::Received),
            (S::Received, Op::Distribute) => Ok(S::Completed),
            (status, op) => Err(DomainError::invalid_transition(op.as_str(), status.as_str())),
        }
    }
}

impl core::fmt::Display for ProcurementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_request_cannot_be_rejected_or_cancelled() {
        for op in [ProcurementOperation::Reject, ProcurementOperation::Cancel] {
            assert_eq!(
                ProcurementStatus::Approved.after(op),
                Err(DomainError::invalid_transition(op.as_str(), "approved"))
            );
        }
    }

    #[test]
    fn happy_path_walks_every_stage() {
        let mut status = ProcurementStatus::Pending;
        for op in [
            ProcurementOperation::Approve,
            ProcurementOperation::Receive,
            ProcurementOperation::Distribute,
        ] {
            status = status.after(op).unwrap();
        }
        assert_eq!(status, ProcurementStatus::Completed);
        assert!(status.is_terminal());
    }
}
