use chrono::{DateTime, Utc};

/// A domain event describing one committed request transition.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - **append-only**: together they form the request's audit trail
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "transfers.request.approved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the transition happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
