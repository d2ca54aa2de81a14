//! Read-only rollups over request history.

use rust_decimal::Decimal;
use serde::Serialize;

use stockflow_procurement::{ProcurementSnapshot, ProcurementStatus};
use stockflow_transfers::{TransferSnapshot, TransferStatus};

/// Transfer counts per status, plus units moved by completed transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub units_transferred: i64,
}

impl TransferStats {
    pub fn from_requests<'a>(requests: impl IntoIterator<Item = &'a TransferSnapshot>) -> Self {
        requests.into_iter().fold(Self::default(), |mut stats, request| {
            stats.total += 1;
            match request.status {
                TransferStatus::Pending => stats.pending += 1,
                TransferStatus::Approved => stats.approved += 1,
                TransferStatus::Completed => {
                    stats.completed += 1;
                    stats.units_transferred += request.total_transferred();
                }
                TransferStatus::Cancelled => stats.cancelled += 1,
            }
            stats
        })
    }
}

/// Procurement counts per status, plus the value of completed requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcurementStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub received: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub completed_amount: Decimal,
}

impl ProcurementStats {
    pub fn from_requests<'a>(requests: impl IntoIterator<Item = &'a ProcurementSnapshot>) -> Self {
        requests.into_iter().fold(Self::default(), |mut stats, request| {
            stats.total += 1;
            match request.status {
                ProcurementStatus::Pending => stats.pending += 1,
                ProcurementStatus::Approved => stats.approved += 1,
                ProcurementStatus::Received => stats.received += 1,
                ProcurementStatus::Completed => {
                    stats.completed += 1;
                    stats.completed_amount += request.total_amount;
                }
                ProcurementStatus::Cancelled => stats.cancelled += 1,
            }
            stats
        })
    }
}
