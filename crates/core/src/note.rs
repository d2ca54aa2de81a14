//! Append-only audit notes attached to requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// One entry of a request's notes log (creation remarks, approval notes,
/// rejection and cancellation reasons). Entries are never edited or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNote {
    pub author: UserId,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditNote {
    pub fn new(author: UserId, text: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            author,
            text: text.into(),
            recorded_at,
        }
    }
}
