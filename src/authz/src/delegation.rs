//! Delegations
//!
//! Time-bounded transfer of an existing role-assignment's authority from a
//! delegator to a delegate, pending until approved. A delegation never owns
//! authority of its own: it is usable only while the source assignment is
//! still live, re-checked at read time rather than cascaded on revocation.
//!
//! State machine: `Pending → Active` (on approval, guarded by source-assignment
//! liveness) → `Revoked` (explicit). Expiry is derived from `ends_at`, never
//! stored, and there is no path back to `Pending`.

use crate::assignment::RoleAssignmentStore;
use crate::error::{AuthzError, Result};
use crate::types::{AssignmentId, DelegationId, OrganizationId, PermissionGrant, SubjectId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// How much of the source assignment's authority is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationScope {
    /// Everything the delegator can do directly
    Full,
    /// Only the explicit permission subset
    Partial,
}

/// Stored lifecycle state; expiry is derived from `ends_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Active,
    Revoked,
}

/// A proposed or active transfer of assignment authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Unique delegation id
    pub id: DelegationId,

    /// Subject transferring authority
    pub delegator_subject_id: SubjectId,

    /// Subject receiving authority
    pub delegate_subject_id: SubjectId,

    /// Assignment whose authority is transferred
    pub source_assignment_id: AssignmentId,

    /// Full transfer or explicit subset
    pub scope: DelegationScope,

    /// Required iff `scope` is `Partial`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_subset: Option<Vec<PermissionGrant>>,

    /// Why the transfer exists; never empty
    pub reason: String,

    /// Start of the usable window
    pub starts_at: DateTime<Utc>,

    /// End of the usable window, if bounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,

    /// Lifecycle state
    pub status: DelegationStatus,

    /// Approver, set on approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<SubjectId>,

    /// Approval instant, set on approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl Delegation {
    /// Approved and inside the usable window at `now`
    ///
    /// Source-assignment liveness is a separate read-time check; see
    /// [`DelegationStore::active_delegations_to`].
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == DelegationStatus::Active
            && self.approved_at.is_some()
            && now >= self.starts_at
            && self.ends_at.map_or(true, |at| now < at)
    }

    /// Whether a partial subset carries the pair
    pub fn subset_permits(&self, resource: &str, action: &str) -> bool {
        self.permission_subset
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|grant| grant.resource == resource && grant.action == action)
    }
}

/// Parameters for proposing a delegation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationProposal {
    pub delegator_subject_id: SubjectId,
    pub delegate_subject_id: SubjectId,
    pub source_assignment_id: AssignmentId,
    pub scope: DelegationScope,
    #[serde(default)]
    pub permission_subset: Option<Vec<PermissionGrant>>,
    pub reason: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

/// Storage contract for delegations
#[async_trait]
pub trait DelegationStore: Send + Sync {
    /// Record a proposal in the `Pending` state
    ///
    /// Validates the proposal shape and that the source assignment exists and
    /// belongs to the delegator. Liveness of the source is not required yet;
    /// approval re-checks it.
    async fn propose(&self, proposal: DelegationProposal) -> Result<DelegationId>;

    /// Transition `Pending → Active`
    ///
    /// Guarded by the source assignment's state at approval time, not at
    /// proposal time: fails with `SourceAssignmentInactive` when the source is
    /// no longer live, leaving the delegation `Pending`.
    async fn approve(
        &self,
        id: DelegationId,
        approver: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Transition to `Revoked`; allowed from any state
    async fn revoke(&self, id: DelegationId) -> Result<()>;

    /// Fetch one delegation by id
    async fn get(&self, id: DelegationId) -> Result<Option<Delegation>>;

    /// Usable delegations to a delegate in an organization
    ///
    /// Approved, inside the window, and with a source assignment that is
    /// still live and in the requested organization, re-checked at read
    /// time rather than cached.
    async fn active_delegations_to(
        &self,
        delegate_subject_id: SubjectId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>>;
}

/// In-memory delegation store
///
/// Holds a handle to the assignment store so approval and reads can verify
/// source-assignment liveness without any cascade bookkeeping.
pub struct InMemoryDelegationStore {
    rows: Arc<RwLock<HashMap<DelegationId, Delegation>>>,
    assignments: Arc<dyn RoleAssignmentStore>,
}

impl InMemoryDelegationStore {
    /// Create an empty store backed by the given assignment store
    pub fn new(assignments: Arc<dyn RoleAssignmentStore>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            assignments,
        }
    }
}

fn validate_proposal(proposal: &DelegationProposal) -> Result<()> {
    if proposal.delegator_subject_id == proposal.delegate_subject_id {
        return Err(AuthzError::Validation(
            "delegator and delegate must be different subjects".into(),
        ));
    }
    if proposal.reason.trim().is_empty() {
        return Err(AuthzError::Validation(
            "delegation reason must not be empty".into(),
        ));
    }
    if let Some(ends_at) = proposal.ends_at {
        if ends_at <= proposal.starts_at {
            return Err(AuthzError::Validation(
                "delegation window must end after it starts".into(),
            ));
        }
    }
    match proposal.scope {
        DelegationScope::Partial => {
            if proposal
                .permission_subset
                .as_deref()
                .map_or(true, <[PermissionGrant]>::is_empty)
            {
                return Err(AuthzError::Validation(
                    "partial delegation requires a non-empty permission subset".into(),
                ));
            }
        }
        DelegationScope::Full => {
            if proposal.permission_subset.is_some() {
                return Err(AuthzError::Validation(
                    "full delegation must not carry a permission subset".into(),
                ));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DelegationStore for InMemoryDelegationStore {
    async fn propose(&self, proposal: DelegationProposal) -> Result<DelegationId> {
        validate_proposal(&proposal)?;

        let source = self
            .assignments
            .get(proposal.source_assignment_id)
            .await?
            .ok_or(AuthzError::AssignmentNotFound(
                proposal.source_assignment_id,
            ))?;
        if source.subject_id != proposal.delegator_subject_id {
            return Err(AuthzError::Validation(
                "source assignment does not belong to the delegator".into(),
            ));
        }

        let delegation = Delegation {
            id: Uuid::new_v4(),
            delegator_subject_id: proposal.delegator_subject_id,
            delegate_subject_id: proposal.delegate_subject_id,
            source_assignment_id: proposal.source_assignment_id,
            scope: proposal.scope,
            permission_subset: proposal.permission_subset,
            reason: proposal.reason,
            starts_at: proposal.starts_at,
            ends_at: proposal.ends_at,
            status: DelegationStatus::Pending,
            approved_by: None,
            approved_at: None,
        };

        let id = delegation.id;
        debug!(
            delegation = %id,
            delegator = %delegation.delegator_subject_id,
            delegate = %delegation.delegate_subject_id,
            "delegation proposed"
        );
        self.rows.write().await.insert(id, delegation);
        Ok(id)
    }

    async fn approve(
        &self,
        id: DelegationId,
        approver: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // The source assignment's state is read here, at approval time; the
        // state it had when the delegation was proposed is irrelevant.
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(AuthzError::DelegationNotFound(id))?;

        if row.status != DelegationStatus::Pending {
            return Err(AuthzError::Validation(format!(
                "delegation {} is not pending approval",
                id
            )));
        }

        let source_id = row.source_assignment_id;
        let source = self
            .assignments
            .get(source_id)
            .await?
            .ok_or(AuthzError::AssignmentNotFound(source_id))?;
        if !source.is_live(now) {
            return Err(AuthzError::SourceAssignmentInactive(source_id));
        }

        row.status = DelegationStatus::Active;
        row.approved_by = Some(approver);
        row.approved_at = Some(now);
        debug!(delegation = %id, approver = %approver, "delegation approved");
        Ok(())
    }

    async fn revoke(&self, id: DelegationId) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(AuthzError::DelegationNotFound(id))?;

        row.status = DelegationStatus::Revoked;
        debug!(delegation = %id, "delegation revoked");
        Ok(())
    }

    async fn get(&self, id: DelegationId) -> Result<Option<Delegation>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&id).cloned())
    }

    async fn active_delegations_to(
        &self,
        delegate_subject_id: SubjectId,
        organization_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delegation>> {
        let candidates: Vec<Delegation> = {
            let rows = self.rows.read().await;
            rows.values()
                .filter(|row| row.delegate_subject_id == delegate_subject_id && row.is_usable(now))
                .cloned()
                .collect()
        };

        // Re-check the source assignment for every candidate: a revoked or
        // expired source makes the delegation inert with no cascade write.
        let mut usable = Vec::with_capacity(candidates.len());
        for delegation in candidates {
            let source = self.assignments.get(delegation.source_assignment_id).await?;
            let live_in_org = source
                .map(|a| a.organization_id == organization_id && a.is_live(now))
                .unwrap_or(false);
            if live_in_org {
                usable.push(delegation);
            }
        }
        Ok(usable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::{InMemoryAssignmentStore, RoleAssignment};
    use crate::scope::GrantScope;
    use chrono::Duration;

    struct Fixture {
        assignments: Arc<InMemoryAssignmentStore>,
        delegations: InMemoryDelegationStore,
        delegator: SubjectId,
        delegate: SubjectId,
        org: OrganizationId,
        source_id: AssignmentId,
        now: DateTime<Utc>,
    }

    async fn fixture() -> Fixture {
        let assignments = Arc::new(InMemoryAssignmentStore::new());
        let delegations =
            InMemoryDelegationStore::new(assignments.clone() as Arc<dyn RoleAssignmentStore>);
        let now = Utc::now();
        let (delegator, delegate, org) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let source_id = assignments
            .grant(RoleAssignment::new(
                delegator,
                "account_owner",
                org,
                GrantScope::OrgWide,
                Uuid::new_v4(),
                now,
                None,
            ))
            .await
            .unwrap();

        Fixture {
            assignments,
            delegations,
            delegator,
            delegate,
            org,
            source_id,
            now,
        }
    }

    fn proposal(f: &Fixture) -> DelegationProposal {
        DelegationProposal {
            delegator_subject_id: f.delegator,
            delegate_subject_id: f.delegate,
            source_assignment_id: f.source_id,
            scope: DelegationScope::Full,
            permission_subset: None,
            reason: "parental leave cover".to_string(),
            starts_at: f.now,
            ends_at: Some(f.now + Duration::days(30)),
        }
    }

    #[tokio::test]
    async fn test_pending_delegation_is_not_usable() {
        let f = fixture().await;
        let id = f.delegations.propose(proposal(&f)).await.unwrap();

        assert!(f
            .delegations
            .active_delegations_to(f.delegate, f.org, f.now)
            .await
            .unwrap()
            .is_empty());

        let row = f.delegations.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, DelegationStatus::Pending);
    }

    #[tokio::test]
    async fn test_approval_activates() {
        let f = fixture().await;
        let id = f.delegations.propose(proposal(&f)).await.unwrap();
        let approver = Uuid::new_v4();

        f.delegations.approve(id, approver, f.now).await.unwrap();

        let usable = f
            .delegations
            .active_delegations_to(f.delegate, f.org, f.now)
            .await
            .unwrap();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].approved_by, Some(approver));
    }

    #[tokio::test]
    async fn test_approval_rejected_when_source_revoked() {
        let f = fixture().await;
        let id = f.delegations.propose(proposal(&f)).await.unwrap();
        f.assignments.revoke(f.source_id).await.unwrap();

        let result = f.delegations.approve(id, Uuid::new_v4(), f.now).await;
        assert!(matches!(
            result,
            Err(AuthzError::SourceAssignmentInactive(_))
        ));

        // Stays pending; a later re-grant cannot resurrect it implicitly.
        let row = f.delegations.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, DelegationStatus::Pending);
    }

    #[tokio::test]
    async fn test_source_revocation_makes_delegation_inert() {
        let f = fixture().await;
        let id = f.delegations.propose(proposal(&f)).await.unwrap();
        f.delegations.approve(id, Uuid::new_v4(), f.now).await.unwrap();

        f.assignments.revoke(f.source_id).await.unwrap();

        assert!(f
            .delegations
            .active_delegations_to(f.delegate, f.org, f.now)
            .await
            .unwrap()
            .is_empty());
        // No cascade: the delegation row itself still reads Active.
        let row = f.delegations.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, DelegationStatus::Active);
    }

    #[tokio::test]
    async fn test_window_expiry_is_derived() {
        let f = fixture().await;
        let id = f.delegations.propose(proposal(&f)).await.unwrap();
        f.delegations.approve(id, Uuid::new_v4(), f.now).await.unwrap();

        let past_window = f.now + Duration::days(31);
        assert!(f
            .delegations
            .active_delegations_to(f.delegate, f.org, past_window)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_no_transition_back_to_pending() {
        let f = fixture().await;
        let id = f.delegations.propose(proposal(&f)).await.unwrap();
        f.delegations.approve(id, Uuid::new_v4(), f.now).await.unwrap();
        f.delegations.revoke(id).await.unwrap();

        let result = f.delegations.approve(id, Uuid::new_v4(), f.now).await;
        assert!(matches!(result, Err(AuthzError::Validation(_))));
    }

    #[tokio::test]
    async fn test_partial_requires_subset() {
        let f = fixture().await;
        let mut p = proposal(&f);
        p.scope = DelegationScope::Partial;
        p.permission_subset = None;

        let result = f.delegations.propose(p).await;
        assert!(matches!(result, Err(AuthzError::Validation(_))));
    }

    #[tokio::test]
    async fn test_source_must_belong_to_delegator() {
        let f = fixture().await;
        let mut p = proposal(&f);
        p.delegator_subject_id = Uuid::new_v4();

        let result = f.delegations.propose(p).await;
        assert!(matches!(result, Err(AuthzError::Validation(_))));
    }

    #[tokio::test]
    async fn test_self_delegation_rejected() {
        let f = fixture().await;
        let mut p = proposal(&f);
        p.delegate_subject_id = f.delegator;

        let result = f.delegations.propose(p).await;
        assert!(matches!(result, Err(AuthzError::Validation(_))));
    }
}
