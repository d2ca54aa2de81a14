//! Branch directory: which branches belong to a tenant, and which one is main.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockflow_core::{BranchId, TenantId};

/// Read-only view of a tenant's branches.
pub trait BranchDirectory: Send + Sync {
    /// The tenant's main branch (approves procurement requests), if configured.
    fn main_branch(&self, tenant_id: TenantId) -> Option<BranchId>;

    fn contains(&self, tenant_id: TenantId, branch_id: BranchId) -> bool;
}

impl<D> BranchDirectory for Arc<D>
where
    D: BranchDirectory + ?Sized,
{
    fn main_branch(&self, tenant_id: TenantId) -> Option<BranchId> {
        (**self).main_branch(tenant_id)
    }

    fn contains(&self, tenant_id: TenantId, branch_id: BranchId) -> bool {
        (**self).contains(tenant_id, branch_id)
    }
}

#[derive(Debug, Default)]
struct TenantBranches {
    main: Option<BranchId>,
    branches: HashSet<BranchId>,
}

/// In-memory branch directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBranchDirectory {
    inner: RwLock<HashMap<TenantId, TenantBranches>>,
}

impl InMemoryBranchDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: TenantId, branch_id: BranchId) {
        self.write()
            .entry(tenant_id)
            .or_default()
            .branches
            .insert(branch_id);
    }

    /// Register `branch_id` and make it the tenant's main branch.
    pub fn register_main(&self, tenant_id: TenantId, branch_id: BranchId) {
        let mut map = self.write();
        let tenant = map.entry(tenant_id).or_default();
        tenant.branches.insert(branch_id);
        tenant.main = Some(branch_id);
    }

    // Every write is a single insert, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TenantId, TenantBranches>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TenantId, TenantBranches>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BranchDirectory for InMemoryBranchDirectory {
    fn main_branch(&self, tenant_id: TenantId) -> Option<BranchId> {
        self.read().get(&tenant_id).and_then(|t| t.main)
    }

    fn contains(&self, tenant_id: TenantId, branch_id: BranchId) -> bool {
        self.read()
            .get(&tenant_id)
            .is_some_and(|t| t.branches.contains(&branch_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branches_are_scoped_to_their_tenant() {
        let directory = InMemoryBranchDirectory::new();
        let (tenant, other) = (TenantId::new(), TenantId::new());
        let (main, shop) = (BranchId::new(), BranchId::new());
        directory.register_main(tenant, main);
        directory.register(tenant, shop);

        assert_eq!(directory.main_branch(tenant), Some(main));
        assert!(directory.contains(tenant, shop));
        assert!(!directory.contains(other, shop));
        assert_eq!(directory.main_branch(other), None);
    }

    #[test]
    fn registration_survives_a_poisoned_lock() {
        let directory = InMemoryBranchDirectory::new();
        let (tenant, branch) = (TenantId::new(), BranchId::new());
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = directory.inner.write().unwrap();
            panic!("writer died holding the lock");
        }));

        directory.register_main(tenant, branch);
        assert_eq!(directory.main_branch(tenant), Some(branch));
        assert!(directory.contains(tenant, branch));
    }
}
