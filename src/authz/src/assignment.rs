//! Role assignments
//!
//! A grant of a catalog role to a subject inside one organization, optionally
//! narrowed to a region or site, with an optional validity window. Revocation
//! deactivates the row and keeps it for audit; rows are never deleted.

use crate::error::{AuthzError, Result};
use crate::scope::GrantScope;
use crate::types::{AssignmentId, OrganizationId, SubjectId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// A role granted to a subject within a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Unique assignment id
    pub id: AssignmentId,

    /// Subject holding the role
    pub subject_id: SubjectId,

    /// Catalog role name
    pub role: String,

    /// Organization the grant belongs to
    pub organization_id: OrganizationId,

    /// Org-wide, region-wide, or site-specific
    pub scope: GrantScope,

    /// Administrator who granted the role
    pub granted_by: SubjectId,

    /// When the grant was made
    pub granted_at: DateTime<Utc>,

    /// End of the validity window, if bounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Cleared on revocation or by the expiry sweep
    pub active: bool,
}

impl RoleAssignment {
    /// Create an active assignment with a fresh id
    pub fn new(
        subject_id: SubjectId,
        role: impl Into<String>,
        organization_id: OrganizationId,
        scope: GrantScope,
        granted_by: SubjectId,
        granted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            role: role.into(),
            organization_id,
            scope,
            granted_by,
            granted_at,
            expires_at,
            active: true,
        }
    }

    /// Active and inside its validity window at `now`
    ///
    /// Expiry is applied at read time; a past `expires_at` makes the
    /// assignment unusable whether or not the sweep has run.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |at| at > now)
    }

    fn same_tuple(&self, other: &RoleAssignment) -> bool {
        self.subject_id == other.subject_id
            && self.role == other.role
            && self.organization_id == other.organization_id
            && self.scope == other.scope
    }
}

/// Storage contract for role assignments
#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    /// Persist a new assignment
    ///
    /// Fails with `DuplicateAssignment` when a live assignment already exists
    /// for the identical `(subject, role, organization, scope)` tuple.
    async fn grant(&self, assignment: RoleAssignment) -> Result<AssignmentId>;

    /// Deactivate an assignment; idempotent, never deletes
    async fn revoke(&self, id: AssignmentId) -> Result<()>;

    /// Fetch one assignment by id
    async fn get(&self, id: AssignmentId) -> Result<Option<RoleAssignment>>;

    /// All live assignments for a subject in an organization
    async fn active_assignments_for(
        &self,
        subject_id: SubjectId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>>;

    /// Deactivate every assignment whose expiry has passed
    ///
    /// Idempotent storage-hygiene sweep; reads already filter by expiry.
    /// Returns the number of rows flipped.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// In-memory assignment store
pub struct InMemoryAssignmentStore {
    rows: Arc<RwLock<HashMap<AssignmentId, RoleAssignment>>>,
}

impl InMemoryAssignmentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryAssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleAssignmentStore for InMemoryAssignmentStore {
    async fn grant(&self, assignment: RoleAssignment) -> Result<AssignmentId> {
        let mut rows = self.rows.write().await;

        let duplicate = rows
            .values()
            .any(|row| row.same_tuple(&assignment) && row.is_live(assignment.granted_at));
        if duplicate {
            return Err(AuthzError::DuplicateAssignment {
                subject_id: assignment.subject_id,
                role: assignment.role,
            });
        }

        let id = assignment.id;
        debug!(
            assignment = %id,
            subject = %assignment.subject_id,
            role = %assignment.role,
            scope = %assignment.scope,
            "assignment granted"
        );
        rows.insert(id, assignment);
        Ok(id)
    }

    async fn revoke(&self, id: AssignmentId) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(AuthzError::AssignmentNotFound(id))?;

        row.active = false;
        debug!(assignment = %id, "assignment revoked");
        Ok(())
    }

    async fn get(&self, id: AssignmentId) -> Result<Option<RoleAssignment>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&id).cloned())
    }

    async fn active_assignments_for(
        &self,
        subject_id: SubjectId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>> {
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

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let mut swept = 0;

        for row in rows.values_mut() {
            if row.active && row.expires_at.is_some_and(|at| at <= now) {
                row.active = false;
                swept += 1;
            }
        }

        if swept > 0 {
            debug!(swept, "expired assignments deactivated");
        }
        Ok(swept)
    }
}
