//! Super-admin registry
//!
//! A flat set of subjects whose membership short-circuits every scope and
//! role check. Orthogonal to the role hierarchy; the bootstrap grant is
//! seeded out-of-band by the system that creates an organization.

use crate::error::Result;
use crate::types::SubjectId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Platform-wide administrative grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperAdminGrant {
    /// Subject with unrestricted access
    pub subject_id: SubjectId,

    /// Who granted it
    pub granted_by: SubjectId,

    /// When it was granted
    pub granted_at: DateTime<Utc>,

    /// Why it exists; never empty
    pub reason: String,
}

/// Storage contract for the super-admin set
#[async_trait]
pub trait SuperAdminStore: Send + Sync {
    /// Whether the subject is a super-admin
    async fn is_super_admin(&self, subject_id: SubjectId) -> Result<bool>;

    /// Add a subject to the set; idempotent (the earliest grant wins)
    async fn grant(&self, grant: SuperAdminGrant) -> Result<()>;

    /// Remove a subject from the set; idempotent
    async fn revoke(&self, subject_id: SubjectId) -> Result<()>;
}

/// In-memory super-admin store
pub struct InMemorySuperAdminStore {
    grants: Arc<RwLock<HashMap<SubjectId, SuperAdminGrant>>>,
}

impl InMemorySuperAdminStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            grants: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySuperAdminStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SuperAdminStore for InMemorySuperAdminStore {
    async fn is_super_admin(&self, subject_id: SubjectId) -> Result<bool> {
        let grants = self.grants.read().await;
        Ok(grants.contains_key(&subject_id))
    }

    async fn grant(&self, grant: SuperAdminGrant) -> Result<()> {
        let mut grants = self.grants.write().await;
        debug!(subject = %grant.subject_id, "super-admin granted");
        grants.entry(grant.subject_id).or_insert(grant);
        Ok(())
    }

    async fn revoke(&self, subject_id: SubjectId) -> Result<()> {
        let mut grants = self.grants.write().await;
        grants.remove(&subject_id);
        debug!(subject = %subject_id, "super-admin revoked");
        Ok(())
    }
}
