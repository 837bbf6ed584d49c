//! Evaluation request and decision types

use crate::error::Result;
use crate::scope::RequestScope;
use crate::types::{DelegationId, OrganizationId, OverrideId, SiteId, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single permission question: may `subject` perform `action` on
/// `resource` within `scope`?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    /// Subject making the request
    pub subject_id: SubjectId,

    /// Resource type being accessed (e.g. "systems", "reports")
    pub resource: String,

    /// Specific resource instance, when the caller knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Action being performed (e.g. "view", "edit")
    pub action: String,

    /// Tenancy scope of the request
    pub scope: RequestScope,
}

impl EvaluateRequest {
    /// Organization-level request
    pub fn org(
        subject_id: SubjectId,
        resource: impl Into<String>,
        action: impl Into<String>,
        organization_id: OrganizationId,
    ) -> Result<Self> {
        Ok(Self {
            subject_id,
            resource: resource.into(),
            resource_id: None,
            action: action.into(),
            scope: RequestScope::org(organization_id)?,
        })
    }

    /// Site-level request
    pub fn site(
        subject_id: SubjectId,
        resource: impl Into<String>,
        action: impl Into<String>,
        organization_id: OrganizationId,
        site_id: SiteId,
    ) -> Result<Self> {
        Ok(Self {
            subject_id,
            resource: resource.into(),
            resource_id: None,
            action: action.into(),
            scope: RequestScope::site(organization_id, site_id)?,
        })
    }

    /// Pin the request to one resource instance
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

/// Which grant source produced the decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum MatchedSource {
    /// Subject is in the super-admin set
    SuperAdmin,
    /// A role assignment matched; carries the role name
    Role(String),
    /// A permission override matched
    Override(OverrideId),
    /// A delegation matched
    Delegation(DelegationId),
    /// Nothing matched
    NoGrant,
}

impl fmt::Display for MatchedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuperAdmin => write!(f, "super_admin"),
            Self::Role(name) => write!(f, "role:{}", name),
            Self::Override(id) => write!(f, "override:{}", id),
            Self::Delegation(id) => write!(f, "delegation:{}", id),
            Self::NoGrant => write!(f, "no_grant"),
        }
    }
}

/// Outcome of an evaluation
///
/// A deny is a normal, successful decision; errors are reserved for
/// validation and store failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Which grant source matched (or `NoGrant`)
    pub source: MatchedSource,

    /// Human-readable explanation
    pub reason: String,

    /// When the decision was made
    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    /// Allow decision
    pub fn allow(source: MatchedSource, reason: impl Into<String>, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            source,
            reason: reason.into(),
            evaluated_at,
        }
    }

    /// Deny decision
    pub fn deny(reason: impl Into<String>, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            source: MatchedSource::NoGrant,
            reason: reason.into(),
            evaluated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_matched_source_rendering() {
        assert_eq!(MatchedSource::SuperAdmin.to_string(), "super_admin");
        assert_eq!(
            MatchedSource::Role("facility_manager".into()).to_string(),
            "role:facility_manager"
        );
        assert_eq!(MatchedSource::NoGrant.to_string(), "no_grant");

        let id = Uuid::new_v4();
        assert_eq!(
            MatchedSource::Delegation(id).to_string(),
            format!("delegation:{}", id)
        );
    }

    #[test]
    fn test_deny_is_no_grant() {
        let decision = Decision::deny("no matching grant", Utc::now());
        assert!(!decision.allowed);
        assert_eq!(decision.source, MatchedSource::NoGrant);
    }

    #[test]
    fn test_nil_org_rejected_at_construction() {
        let result = EvaluateRequest::org(Uuid::new_v4(), "reports", "view", Uuid::nil());
        assert!(result.is_err());
    }
}
