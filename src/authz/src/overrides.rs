//! Permission overrides
//!
//! Narrow, justified point grants that bypass role lookup: one subject, one
//! resource type (optionally one resource instance), one action, inside an
//! organization or a single site. Kept for audit until the retention sweep
//! hard-deletes them a grace period after expiry.

use crate::error::{AuthzError, Result};
use crate::scope::RequestScope;
use crate::types::{OrganizationId, OverrideId, SiteId, SubjectId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A point permission grant bypassing role lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverride {
    /// Unique override id
    pub id: OverrideId,

    /// Subject receiving the exception
    pub subject_id: SubjectId,

    /// Organization the override belongs to
    pub organization_id: OrganizationId,

    /// Narrows the override to one site; `None` covers the whole organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,

    /// Resource type the override applies to
    pub resource_type: String,

    /// Pins the override to one resource instance; `None` covers the type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Single permitted action
    pub action: String,

    /// Administrator who granted the exception
    pub granted_by: SubjectId,

    /// When the exception was granted
    pub granted_at: DateTime<Utc>,

    /// Overrides are exceptions and must be explainable; never empty
    pub justification: String,

    /// End of the validity window, if bounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionOverride {
    /// Inside its validity window at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }

    /// Whether this override covers the request
    pub fn matches(
        &self,
        resource: &str,
        resource_id: Option<&str>,
        action: &str,
        scope: &RequestScope,
    ) -> bool {
        if self.organization_id != scope.organization_id {
            return false;
        }
        // A site-bound override only covers requests at that site.
        if let Some(site) = self.site_id {
            if scope.site_id != Some(site) {
                return false;
            }
        }
        if self.resource_type != resource || self.action != action {
            return false;
        }
        // An override pinned to an instance covers only that instance.
        match &self.resource_id {
            Some(pinned) => resource_id == Some(pinned.as_str()),
            None => true,
        }
    }
}

/// Storage contract for permission overrides
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Persist a new override; rejects an empty justification
    async fn grant(&self, permission_override: PermissionOverride) -> Result<OverrideId>;

    /// Fetch one override by id
    async fn get(&self, id: OverrideId) -> Result<Option<PermissionOverride>>;

    /// All non-expired overrides for a subject in an organization
    async fn active_overrides_for(
        &self,
        subject_id: SubjectId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionOverride>>;

    /// Hard-delete one override
    async fn delete(&self, id: OverrideId) -> Result<()>;

    /// Hard-delete overrides whose expiry predates the cutoff
    ///
    /// Retention sweep: expired overrides stay queryable for audit until the
    /// grace period has passed. Returns the number deleted.
    async fn purge(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// In-memory override store
pub struct InMemoryOverrideStore {
    rows: Arc<RwLock<HashMap<OverrideId, PermissionOverride>>>,
}

impl InMemoryOverrideStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryOverrideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverrideStore for InMemoryOverrideStore {
    async fn grant(&self, permission_override: PermissionOverride) -> Result<OverrideId> {
        if permission_override.justification.trim().is_empty() {
            return Err(AuthzError::Validation(
                "override justification must not be empty".into(),
            ));
        }

        let mut rows = self.rows.write().await;
        let id = permission_override.id;
        debug!(
            override_id = %id,
            subject = %permission_override.subject_id,
            resource = %permission_override.resource_type,
            action = %permission_override.action,
            "override granted"
        );
        rows.insert(id, permission_override);
        Ok(id)
    }

    async fn get(&self, id: OverrideId) -> Result<Option<PermissionOverride>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&id).cloned())
    }

    async fn active_overrides_for(
        &self,
        subject_id: SubjectId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionOverride>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| {
                row.subject_id == subject_id
                    && row.organization_id == organization_id
                    && row.is_live(now)
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, id: OverrideId) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.remove(&id).ok_or(AuthzError::OverrideNotFound(id))?;
        Ok(())
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.expires_at.map_or(true, |at| at > older_than));
        let purged = before - rows.len();

        if purged > 0 {
            debug!(purged, "expired overrides purged");
        }
        Ok(purged)
    }
}
