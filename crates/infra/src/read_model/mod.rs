//! Tenant-isolated read model storage for request snapshots.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
