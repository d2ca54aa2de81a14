//! Append-only event store boundary.
//!
//! Every committed request transition is stored as a sequence-numbered event in
//! the request's stream. The stream doubles as the request's audit trail.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
