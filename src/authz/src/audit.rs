//! Audit trail
//!
//! Append-only record of every mutation to the grant stores, plus optional
//! sampled records of denied evaluations. A mutation is acknowledged to its
//! caller only after its audit record is durable; audit loss on a permission
//! change is treated as the change itself failing.

use crate::error::{AuthzError, Result};
use crate::scope::GrantScope;
use crate::types::{
    AssignmentId, DelegationId, OrganizationId, OverrideId, SubjectId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One auditable change or outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    AssignmentGranted {
        assignment_id: AssignmentId,
        subject_id: SubjectId,
        role: String,
        organization_id: OrganizationId,
        scope: GrantScope,
        granted_by: SubjectId,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    AssignmentRevoked {
        assignment_id: AssignmentId,
        subject_id: SubjectId,
        organization_id: OrganizationId,
        revoked_by: SubjectId,
    },
    OverrideGranted {
        override_id: OverrideId,
        subject_id: SubjectId,
        organization_id: OrganizationId,
        resource_type: String,
        action: String,
        justification: String,
        granted_by: SubjectId,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    DelegationProposed {
        delegation_id: DelegationId,
        delegator_subject_id: SubjectId,
        delegate_subject_id: SubjectId,
        source_assignment_id: AssignmentId,
        organization_id: OrganizationId,
        reason: String,
    },
    DelegationApproved {
        delegation_id: DelegationId,
        delegate_subject_id: SubjectId,
        organization_id: OrganizationId,
        approved_by: SubjectId,
    },
    DelegationRevoked {
        delegation_id: DelegationId,
        delegate_subject_id: SubjectId,
        organization_id: OrganizationId,
        revoked_by: SubjectId,
    },
    EvaluationDenied {
        subject_id: SubjectId,
        organization_id: OrganizationId,
        resource: String,
        action: String,
    },
    SuperAdminGranted {
        subject_id: SubjectId,
        granted_by: SubjectId,
        reason: String,
    },
    SuperAdminRevoked {
        subject_id: SubjectId,
        revoked_by: SubjectId,
    },
}

impl AuditEvent {
    /// The subject the event is primarily about
    pub fn subject_id(&self) -> SubjectId {
        match self {
            Self::AssignmentGranted { subject_id, .. }
            | Self::AssignmentRevoked { subject_id, .. }
            | Self::OverrideGranted { subject_id, .. }
            | Self::EvaluationDenied { subject_id, .. }
            | Self::SuperAdminGranted { subject_id, .. }
            | Self::SuperAdminRevoked { subject_id, .. } => *subject_id,
            Self::DelegationProposed {
                delegate_subject_id, ..
            }
            | Self::DelegationApproved {
                delegate_subject_id, ..
            }
            | Self::DelegationRevoked {
                delegate_subject_id, ..
            } => *delegate_subject_id,
        }
    }

    /// Organization the event belongs to; super-admin events are platform-wide
    pub fn organization_id(&self) -> Option<OrganizationId> {
        match self {
            Self::AssignmentGranted {
                organization_id, ..
            }
            | Self::AssignmentRevoked {
                organization_id, ..
            }
            | Self::OverrideGranted {
                organization_id, ..
            }
            | Self::DelegationProposed {
                organization_id, ..
            }
            | Self::DelegationApproved {
                organization_id, ..
            }
            | Self::DelegationRevoked {
                organization_id, ..
            }
            | Self::EvaluationDenied {
                organization_id, ..
            } => Some(*organization_id),
            Self::SuperAdminGranted { .. } | Self::SuperAdminRevoked { .. } => None,
        }
    }
}

/// A persisted audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id
    pub id: Uuid,

    /// When the event was recorded
    pub recorded_at: DateTime<Utc>,

    /// The event payload
    pub event: AuditEvent,
}

/// Filter for the read-only audit query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Restrict to events about one subject
    #[serde(default)]
    pub subject_id: Option<SubjectId>,

    /// Restrict to one organization
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,

    /// Inclusive lower bound on `recorded_at`
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,

    /// Exclusive upper bound on `recorded_at`
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,

    /// Records to skip
    #[serde(default)]
    pub offset: usize,

    /// Page size; zero means the default of 100
    #[serde(default)]
    pub limit: usize,
}

impl AuditQuery {
    const DEFAULT_LIMIT: usize = 100;

    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(subject) = self.subject_id {
            if record.event.subject_id() != subject {
                return false;
            }
        }
        if let Some(org) = self.organization_id {
            if record.event.organization_id() != Some(org) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.recorded_at < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.recorded_at >= until {
                return false;
            }
        }
        true
    }

    fn page_size(&self) -> usize {
        if self.limit == 0 {
            Self::DEFAULT_LIMIT
        } else {
            self.limit
        }
    }
}

/// One page of audit records, oldest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    /// Records in this page
    pub records: Vec<AuditRecord>,

    /// Total records matching the filter, across all pages
    pub total: usize,
}

/// Append-only sink for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one event; must complete before the mutation is acknowledged
    async fn record(&self, event: AuditEvent, recorded_at: DateTime<Utc>) -> Result<AuditRecord>;

    /// Read-only paginated query for compliance tooling
    async fn query(&self, query: &AuditQuery) -> Result<AuditPage>;
}

/// In-memory audit sink
///
/// Unbounded by design: the trail is append-only and never truncated.
pub struct InMemoryAuditSink {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of records written so far
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the trail is empty
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent, recorded_at: DateTime<Utc>) -> Result<AuditRecord> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            recorded_at,
            event,
        };

        let mut records = self.records.write().await;
        records.push(record.clone());
        Ok(record)
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        let records = self.records.read().await;
        let matching: Vec<&AuditRecord> =
            records.iter().filter(|r| query.matches(r)).collect();
        let total = matching.len();

        let page = matching
            .into_iter()
            .skip(query.offset)
            .take(query.page_size())
            .cloned()
            .collect();

        Ok(AuditPage {
            records: page,
            total,
        })
    }
}

/// Sink that fails every write; test double for rollback paths
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _event: AuditEvent, _recorded_at: DateTime<Utc>) -> Result<AuditRecord> {
        Err(AuthzError::Audit("sink unavailable".into()))
    }

    async fn query(&self, _query: &AuditQuery) -> Result<AuditPage> {
        Err(AuthzError::Audit("sink unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn denied(subject: SubjectId, org: OrganizationId) -> AuditEvent {
        AuditEvent::EvaluationDenied {
            subject_id: subject,
            organization_id: org,
            resource: "reports".to_string(),
            action: "export".to_string(),
        }
    }

    #[tokio::test]
    async fn test_records_append_in_order() {
        let sink = InMemoryAuditSink::new();
        let now = Utc::now();
        let (subject, org) = (Uuid::new_v4(), Uuid::new_v4());

        sink.record(denied(subject, org), now).await.unwrap();
        sink.record(denied(subject, org), now + Duration::seconds(1))
            .await
            .unwrap();

        let page = sink.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.records[0].recorded_at <= page.records[1].recorded_at);
    }

    #[tokio::test]
    async fn test_query_by_subject() {
        let sink = InMemoryAuditSink::new();
        let now = Utc::now();
        let org = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        sink.record(denied(alice, org), now).await.unwrap();
        sink.record(denied(bob, org), now).await.unwrap();

        let page = sink
            .query(&AuditQuery {
                subject_id: Some(alice),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].event.subject_id(), alice);
    }

    #[tokio::test]
    async fn test_query_time_range_and_pagination() {
        let sink = InMemoryAuditSink::new();
        let start = Utc::now();
        let (subject, org) = (Uuid::new_v4(), Uuid::new_v4());

        for i in 0..5 {
            sink.record(denied(subject, org), start + Duration::minutes(i))
                .await
                .unwrap();
        }

        let page = sink
            .query(&AuditQuery {
                from: Some(start + Duration::minutes(1)),
                until: Some(start + Duration::minutes(4)),
                offset: 1,
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].recorded_at, start + Duration::minutes(2));
    }
}
