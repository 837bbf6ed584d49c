//! Injected store handles
//!
//! The evaluator and the admin service receive their backing stores as an
//! explicit bundle of handles rather than reading process-wide state, so
//! tests supply isolated fixtures per case and deployments swap backends
//! behind the traits.

use crate::assignment::{InMemoryAssignmentStore, RoleAssignmentStore};
use crate::catalog::RoleCatalog;
use crate::delegation::{DelegationStore, InMemoryDelegationStore};
use crate::overrides::{InMemoryOverrideStore, OverrideStore};
use crate::super_admin::{InMemorySuperAdminStore, SuperAdminStore};
use std::sync::Arc;

/// The stores backing one engine instance
#[derive(Clone)]
pub struct Stores {
    /// Role definitions; read-only at evaluation time
    pub catalog: Arc<RoleCatalog>,

    /// Role assignments
    pub assignments: Arc<dyn RoleAssignmentStore>,

    /// Permission overrides
    pub overrides: Arc<dyn OverrideStore>,

    /// Delegations
    pub delegations: Arc<dyn DelegationStore>,

    /// Super-admin set
    pub super_admins: Arc<dyn SuperAdminStore>,
}

impl Stores {
    /// In-memory stores over the given catalog
    pub fn in_memory(catalog: RoleCatalog) -> Self {
        let assignments: Arc<dyn RoleAssignmentStore> = Arc::new(InMemoryAssignmentStore::new());
        let delegations: Arc<dyn DelegationStore> =
            Arc::new(InMemoryDelegationStore::new(assignments.clone()));

        Self {
            catalog: Arc::new(catalog),
            assignments,
            overrides: Arc::new(InMemoryOverrideStore::new()),
            delegations,
            super_admins: Arc::new(InMemorySuperAdminStore::new()),
        }
    }
}
