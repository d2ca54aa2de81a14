use std::collections::HashMap;
use std::hash::Hash;

use stockflow_core::TenantId;

/// Tenant-isolated key/value store for materialized request snapshots.
///
/// Snapshots are written in the same transaction as the events they are derived
/// from, so a read never observes a half-applied transition.
pub trait TenantStore<K, V> {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&mut self, tenant_id: TenantId, key: K, value: V);
    /// Every record of the tenant, in no particular order.
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
}

/// In-memory tenant-isolated store for tests/dev.
///
/// Between `begin` and `commit` the previous value of every upserted key is
/// journaled so `rollback` can restore it.
#[derive(Debug, Clone)]
pub struct InMemoryTenantStore<K, V> {
    inner: HashMap<(TenantId, K), V>,
    checkpoint: Option<HashMap<(TenantId, K), Option<V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
            checkpoint: None,
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn begin(&mut self) {
        self.checkpoint.get_or_insert_with(HashMap::new);
    }

    pub fn commit(&mut self) {
        self.checkpoint = None;
    }

    pub fn rollback(&mut self) {
        let Some(previous) = self.checkpoint.take() else {
            return;
        };
        for (key, value) in previous {
            match value {
                Some(v) => self.inner.insert(key, v),
                None => self.inner.remove(&key),
            };
        }
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        self.inner.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&mut self, tenant_id: TenantId, key: K, value: V) {
        let key = (tenant_id, key);
        if let Some(previous) = self.checkpoint.as_mut() {
            if !previous.contains_key(&key) {
                previous.insert(key.clone(), self.inner.get(&key).cloned());
            }
        }
        self.inner.insert(key, value);
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        self.inner
            .iter()
            .filter_map(|((t, _k), v)| (*t == tenant_id).then(|| v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_invisible_to_other_tenants() {
        let (a, b) = (TenantId::new(), TenantId::new());
        let mut store: InMemoryTenantStore<u32, &str> = InMemoryTenantStore::new();
        store.upsert(a, 1, "first");
        store.upsert(a, 1, "second");

        assert_eq!(store.get(a, &1), Some("second"));
        assert_eq!(store.get(b, &1), None);
        assert_eq!(store.list(a), vec!["second"]);
        assert!(store.list(b).is_empty());
    }

    #[test]
    fn rollback_restores_previous_values() {
        let tenant = TenantId::new();
        let mut store: InMemoryTenantStore<u32, &str> = InMemoryTenantStore::new();
        store.upsert(tenant, 1, "committed");

        store.begin();
        store.upsert(tenant, 1, "draft");
        store.upsert(tenant, 1, "second draft");
        store.upsert(tenant, 2, "new");
        store.rollback();

        assert_eq!(store.get(tenant, &1), Some("committed"));
        assert_eq!(store.get(tenant, &2), None);
    }
}
