//! Human-readable, date-scoped request numbers (`<PREFIX><yyyyMMdd><seq4>`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default prefix for branch-to-branch transfer requests.
pub const TRANSFER_PREFIX: &str = "TRF";

/// Default prefix for procurement requests.
pub const PROCUREMENT_PREFIX: &str = "PRC";

/// A request number such as `TRF202610160003`.
///
/// The sequence part is `1 + requests of the same kind created that day for the
/// tenant`, so the caller must count and insert inside one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestNumber(String);

impl RequestNumber {
    /// Format a number from its parts. Sequences past 9999 keep growing in width.
    pub fn format(prefix: &str, date: NaiveDate, sequence: u32) -> Self {
        Self(format!("{prefix}{}{sequence:04}", date.format("%Y%m%d")))
    }

    /// Next number for a day on which `created_today` requests already exist.
    pub fn next(prefix: &str, date: NaiveDate, created_today: usize) -> Self {
        let sequence = u32::try_from(created_today).unwrap_or(u32::MAX - 1) + 1;
        Self::format(prefix, date, sequence)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a number back into its date and sequence, if it carries `prefix`.
    pub fn parts(&self, prefix: &str) -> Option<(NaiveDate, u32)> {
        let rest = self.0.strip_prefix(prefix)?;
        if rest.len() < 12 || !rest.is_char_boundary(8) {
            return None;
        }
        let (date, sequence) = rest.split_at(8);
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        let sequence = sequence.parse().ok()?;
        Some((date, sequence))
    }
}

impl core::fmt::Display for RequestNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
