//! Administrative mutation API
//!
//! Every mutation to the grant stores flows through here: validate, apply,
//! record to the audit sink, then acknowledge. A mutation whose audit record
//! cannot be persisted is not acknowledged: creations are rolled back, and
//! the caller receives the audit error.
//!
//! Callers must already be authorized (typically via a prior evaluation of a
//! `permissions:manage` action); this service does not bootstrap its own
//! authorization. The first organization owner and platform super-admins are
//! seeded out-of-band by the system that creates an organization.

use crate::assignment::RoleAssignment;
use crate::audit::{AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::delegation::{DelegationProposal, DelegationScope};
use crate::error::{AuthzError, Result};
use crate::overrides::PermissionOverride;
use crate::scope::GrantScope;
use crate::stores::Stores;
use crate::super_admin::SuperAdminGrant;
use crate::types::{
    AssignmentId, DelegationId, OrganizationId, OverrideId, RegionId, SiteId, SubjectId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Configured resource/action vocabulary
///
/// Resource and action identifiers are free-form strings owned by the
/// deploying application. When a vocabulary is configured, administrative
/// mutations are validated against it; the evaluator itself stays agnostic.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    resources: HashSet<String>,
    actions: HashSet<String>,
}

impl Vocabulary {
    /// Build a vocabulary from the deployment's catalogs
    pub fn new<R, A, S>(resources: R, actions: A) -> Self
    where
        R: IntoIterator<Item = S>,
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }

    /// Validate one `(resource, action)` pair
    pub fn check(&self, resource: &str, action: &str) -> Result<()> {
        if !self.resources.contains(resource) {
            return Err(AuthzError::Validation(format!(
                "unknown resource type '{}'",
                resource
            )));
        }
        if !self.actions.contains(action) {
            return Err(AuthzError::Validation(format!(
                "unknown action '{}'",
                action
            )));
        }
        Ok(())
    }
}

/// Parameters for granting a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRoleRequest {
    pub subject_id: SubjectId,
    pub role: String,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub region_id: Option<RegionId>,
    #[serde(default)]
    pub site_id: Option<SiteId>,
    pub granted_by: SubjectId,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Parameters for granting an override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantOverrideRequest {
    pub subject_id: SubjectId,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub site_id: Option<SiteId>,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub action: String,
    pub granted_by: SubjectId,
    pub justification: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The administrative surface over the grant stores
pub struct AdminService {
    stores: Stores,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    vocabulary: Option<Vocabulary>,
}

impl AdminService {
    /// Create the service
    pub fn new(stores: Stores, audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            stores,
            audit,
            clock,
            vocabulary: None,
        }
    }

    /// Validate mutation resource/action strings against a vocabulary
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = Some(vocabulary);
        self
    }

    /// Grant a catalog role to a subject
    pub async fn grant_role(&self, request: GrantRoleRequest) -> Result<AssignmentId> {
        require_id(request.subject_id, "subject id")?;
        require_id(request.organization_id, "organization id")?;
        require_id(request.granted_by, "granting subject id")?;
        let scope = GrantScope::from_parts(request.region_id, request.site_id)?;
        let role = self.stores.catalog.lookup(&request.role)?;

        let now = self.clock.now();
        if request.expires_at.is_some_and(|at| at <= now) {
            return Err(AuthzError::Validation(
                "expiry must be in the future".into(),
            ));
        }

        let assignment = RoleAssignment::new(
            request.subject_id,
            role.name.clone(),
            request.organization_id,
            scope,
            request.granted_by,
            now,
            request.expires_at,
        );
        let event = AuditEvent::AssignmentGranted {
            assignment_id: assignment.id,
            subject_id: assignment.subject_id,
            role: assignment.role.clone(),
            organization_id: assignment.organization_id,
            scope: assignment.scope,
            granted_by: assignment.granted_by,
            expires_at: assignment.expires_at,
        };

        let id = self.stores.assignments.grant(assignment).await?;
        if let Err(err) = self.record(event).await {
            self.rollback(self.stores.assignments.revoke(id).await, "assignment grant");
            return Err(err);
        }

        info!(assignment = %id, subject = %request.subject_id, role = %request.role, "role granted");
        Ok(id)
    }

    /// Revoke a role assignment; the row is deactivated, never deleted
    pub async fn revoke_role(&self, id: AssignmentId, revoked_by: SubjectId) -> Result<()> {
        require_id(revoked_by, "revoking subject id")?;
        let assignment = self
            .stores
            .assignments
            .get(id)
            .await?
            .ok_or(AuthzError::AssignmentNotFound(id))?;

        self.stores.assignments.revoke(id).await?;
        // Removing authority is the fail-safe direction: if the audit write
        // fails the revocation stands and the caller sees the error.
        self.record(AuditEvent::AssignmentRevoked {
            assignment_id: id,
            subject_id: assignment.subject_id,
            organization_id: assignment.organization_id,
            revoked_by,
        })
        .await?;

        info!(assignment = %id, "role revoked");
        Ok(())
    }

    /// Grant a justified point override
    pub async fn grant_override(&self, request: GrantOverrideRequest) -> Result<OverrideId> {
        require_id(request.subject_id, "subject id")?;
        require_id(request.organization_id, "organization id")?;
        require_id(request.granted_by, "granting subject id")?;
        if request.site_id.is_some_and(|id| id.is_nil()) {
            return Err(AuthzError::Validation("site id must not be nil".into()));
        }
        if let Some(vocabulary) = &self.vocabulary {
            vocabulary.check(&request.resource_type, &request.action)?;
        }

        let now = self.clock.now();
        let row = PermissionOverride {
            id: Uuid::new_v4(),
            subject_id: request.subject_id,
            organization_id: request.organization_id,
            site_id: request.site_id,
            resource_type: request.resource_type,
            resource_id: request.resource_id,
            action: request.action,
            granted_by: request.granted_by,
            granted_at: now,
            justification: request.justification,
            expires_at: request.expires_at,
        };
        let event = AuditEvent::OverrideGranted {
            override_id: row.id,
            subject_id: row.subject_id,
            organization_id: row.organization_id,
            resource_type: row.resource_type.clone(),
            action: row.action.clone(),
            justification: row.justification.clone(),
            granted_by: row.granted_by,
            expires_at: row.expires_at,
        };

        let id = self.stores.overrides.grant(row).await?;
        if let Err(err) = self.record(event).await {
            self.rollback(self.stores.overrides.delete(id).await, "override grant");
            return Err(err);
        }

        info!(override_id = %id, subject = %request.subject_id, "override granted");
        Ok(id)
    }

    /// Propose a delegation; it stays pending until approved
    pub async fn propose_delegation(&self, proposal: DelegationProposal) -> Result<DelegationId> {
        require_id(proposal.delegator_subject_id, "delegator subject id")?;
        require_id(proposal.delegate_subject_id, "delegate subject id")?;
        if proposal.scope == DelegationScope::Partial {
            if let (Some(vocabulary), Some(subset)) =
                (&self.vocabulary, proposal.permission_subset.as_deref())
            {
                for grant in subset {
                    vocabulary.check(&grant.resource, &grant.action)?;
                }
            }
        }

        let source = self
            .stores
            .assignments
            .get(proposal.source_assignment_id)
            .await?
            .ok_or(AuthzError::AssignmentNotFound(proposal.source_assignment_id))?;

        let delegate = proposal.delegate_subject_id;
        let delegator = proposal.delegator_subject_id;
        let source_id = proposal.source_assignment_id;
        let reason = proposal.reason.clone();

        let id = self.stores.delegations.propose(proposal).await?;
        let event = AuditEvent::DelegationProposed {
            delegation_id: id,
            delegator_subject_id: delegator,
            delegate_subject_id: delegate,
            source_assignment_id: source_id,
            organization_id: source.organization_id,
            reason,
        };
        if let Err(err) = self.record(event).await {
            self.rollback(
                self.stores.delegations.revoke(id).await,
                "delegation proposal",
            );
            return Err(err);
        }

        info!(delegation = %id, delegator = %delegator, delegate = %delegate, "delegation proposed");
        Ok(id)
    }

    /// Approve a pending delegation
    ///
    /// The source assignment's state is read at approval time, not at
    /// proposal time; an inactive source rejects the approval and the
    /// delegation stays pending.
    pub async fn approve_delegation(&self, id: DelegationId, approved_by: SubjectId) -> Result<()> {
        require_id(approved_by, "approving subject id")?;
        let now = self.clock.now();

        self.stores.delegations.approve(id, approved_by, now).await?;

        let delegation = self
            .stores
            .delegations
            .get(id)
            .await?
            .ok_or(AuthzError::DelegationNotFound(id))?;
        let source = self
            .stores
            .assignments
            .get(delegation.source_assignment_id)
            .await?
            .ok_or(AuthzError::AssignmentNotFound(delegation.source_assignment_id))?;

        let event = AuditEvent::DelegationApproved {
            delegation_id: id,
            delegate_subject_id: delegation.delegate_subject_id,
            organization_id: source.organization_id,
            approved_by,
        };
        if let Err(err) = self.record(event).await {
            self.rollback(
                self.stores.delegations.revoke(id).await,
                "delegation approval",
            );
            return Err(err);
        }

        info!(delegation = %id, "delegation approved");
        Ok(())
    }

    /// Revoke a delegation at any point in its lifecycle
    pub async fn revoke_delegation(&self, id: DelegationId, revoked_by: SubjectId) -> Result<()> {
        require_id(revoked_by, "revoking subject id")?;
        let delegation = self
            .stores
            .delegations
            .get(id)
            .await?
            .ok_or(AuthzError::DelegationNotFound(id))?;
        let source = self
            .stores
            .assignments
            .get(delegation.source_assignment_id)
            .await?
            .ok_or(AuthzError::AssignmentNotFound(delegation.source_assignment_id))?;

        self.stores.delegations.revoke(id).await?;
        self.record(AuditEvent::DelegationRevoked {
            delegation_id: id,
            delegate_subject_id: delegation.delegate_subject_id,
            organization_id: source.organization_id,
            revoked_by,
        })
        .await?;

        info!(delegation = %id, "delegation revoked");
        Ok(())
    }

    /// Add a subject to the super-admin set
    pub async fn grant_super_admin(
        &self,
        subject_id: SubjectId,
        granted_by: SubjectId,
        reason: impl Into<String>,
    ) -> Result<()> {
        require_id(subject_id, "subject id")?;
        require_id(granted_by, "granting subject id")?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(AuthzError::Validation(
                "super-admin reason must not be empty".into(),
            ));
        }

        let now = self.clock.now();
        self.stores
            .super_admins
            .grant(SuperAdminGrant {
                subject_id,
                granted_by,
                granted_at: now,
                reason: reason.clone(),
            })
            .await?;
        if let Err(err) = self
            .record(AuditEvent::SuperAdminGranted {
                subject_id,
                granted_by,
                reason,
            })
            .await
        {
            self.rollback(
                self.stores.super_admins.revoke(subject_id).await,
                "super-admin grant",
            );
            return Err(err);
        }

        info!(subject = %subject_id, "super-admin granted");
        Ok(())
    }

    /// Remove a subject from the super-admin set
    pub async fn revoke_super_admin(
        &self,
        subject_id: SubjectId,
        revoked_by: SubjectId,
    ) -> Result<()> {
        require_id(subject_id, "subject id")?;
        require_id(revoked_by, "revoking subject id")?;

        self.stores.super_admins.revoke(subject_id).await?;
        self.record(AuditEvent::SuperAdminRevoked {
            subject_id,
            revoked_by,
        })
        .await?;

        info!(subject = %subject_id, "super-admin revoked");
        Ok(())
    }

    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.audit
            .record(event, self.clock.now())
            .await
            .map(|_| ())
            .map_err(|err| match err {
                err @ AuthzError::Audit(_) => err,
                other => AuthzError::Audit(other.to_string()),
            })
    }

    fn rollback(&self, result: Result<()>, what: &str) {
        if let Err(err) = result {
            warn!(error = %err, "rollback after failed audit write: {}", what);
        }
    }
}

fn require_id(id: Uuid, what: &str) -> Result<()> {
    if id.is_nil() {
        return Err(AuthzError::Validation(format!("{} must not be nil", what)));
    }
    Ok(())
}
