//! Permission evaluator
//!
//! The core decision algorithm. Stateless per call over the injected stores;
//! composes their outputs under a fixed precedence order:
//!
//! ```text
//! 1. super-admin membership          → allow  source=super_admin
//! 2. role assignments (scope + capability) → allow  source=role:<name>
//! 3. permission overrides            → allow  source=override:<id>
//! 4. delegations (full | partial)    → allow  source=delegation:<id>
//! 5. otherwise                       → deny   source=no_grant
//! ```
//!
//! Store failures surface as `Evaluation` errors and must be treated as deny
//! by the caller. A legitimate deny is an `Ok` decision, never an error.

pub mod decision;

pub use decision::{Decision, EvaluateRequest, MatchedSource};

use crate::audit::{AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::delegation::DelegationScope;
use crate::error::{AuthzError, Result};
use crate::scope::RequestScope;
use crate::stores::Stores;
use crate::types::SubjectId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Evaluator configuration
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Record every Nth denied evaluation to the audit sink; 0 disables
    pub deny_audit_sample_every: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            deny_audit_sample_every: 0,
        }
    }
}

/// The decision engine
pub struct PermissionEvaluator {
    stores: Stores,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Arc<dyn Clock>,
    config: EvaluatorConfig,
    deny_counter: AtomicU64,
}

impl PermissionEvaluator {
    /// Create an evaluator over the given stores
    pub fn new(stores: Stores, clock: Arc<dyn Clock>) -> Self {
        Self {
            stores,
            audit: None,
            clock,
            config: EvaluatorConfig::default(),
            deny_counter: AtomicU64::new(0),
        }
    }

    /// Attach an audit sink for sampled deny records
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>, config: EvaluatorConfig) -> Self {
        self.audit = Some(audit);
        self.config = config;
        self
    }

    /// Decide whether the request is allowed
    pub async fn evaluate(&self, request: &EvaluateRequest) -> Result<Decision> {
        let now = self.clock.now();

        debug!(
            subject = %request.subject_id,
            resource = %request.resource,
            action = %request.action,
            organization = %request.scope.organization_id,
            "evaluating"
        );

        // Step 1: super-admin short-circuit.
        let is_super = self
            .stores
            .super_admins
            .is_super_admin(request.subject_id)
            .await
            .map_err(fail_closed)?;
        if is_super {
            debug!(subject = %request.subject_id, "allowed as super-admin");
            return Ok(Decision::allow(
                MatchedSource::SuperAdmin,
                "subject is a platform super-admin",
                now,
            ));
        }

        // Steps 2-3: the subject's own grants.
        if let Some(source) = self
            .direct_grant(request.subject_id, request, now)
            .await?
        {
            return Ok(self.allow_from(source, now));
        }

        // Step 4: delegated authority. Full delegations re-evaluate the
        // delegator's direct grants only, so a delegate can never inherit
        // authority that itself arrived through another delegation.
        let delegations = self
            .stores
            .delegations
            .active_delegations_to(request.subject_id, request.scope.organization_id, now)
            .await
            .map_err(fail_closed)?;

        for delegation in delegations {
            let matched = match delegation.scope {
                DelegationScope::Full => self
                    .direct_grant(delegation.delegator_subject_id, request, now)
                    .await?
                    .is_some(),
                DelegationScope::Partial => {
                    delegation.subset_permits(&request.resource, &request.action)
                        && self
                            .assignment_covers(delegation.source_assignment_id, &request.scope, now)
                            .await?
                }
            };

            if matched {
                debug!(delegation = %delegation.id, "allowed via delegation");
                return Ok(self.allow_from(MatchedSource::Delegation(delegation.id), now));
            }
        }

        // Step 5: no grant matched.
        let decision = Decision::deny("no matching grant", now);
        self.record_sampled_deny(request, now).await;
        Ok(decision)
    }

    /// Decide with a deadline; on timeout returns an `Evaluation` error
    /// (fail-closed), never a stale allow.
    pub async fn evaluate_with_deadline(
        &self,
        request: &EvaluateRequest,
        deadline: Instant,
    ) -> Result<Decision> {
        if Instant::now() >= deadline {
            return Err(AuthzError::Evaluation(
                "evaluation deadline exceeded".into(),
            ));
        }
        match tokio::time::timeout_at(deadline, self.evaluate(request)).await {
            Ok(decision) => decision,
            Err(_) => Err(AuthzError::Evaluation(
                "evaluation deadline exceeded".into(),
            )),
        }
    }

    /// Steps 2-3: role assignments, then overrides, for one subject.
    ///
    /// Shared between the main path and full-delegation re-evaluation; never
    /// consults the super-admin set or other delegations.
    async fn direct_grant(
        &self,
        subject_id: SubjectId,
        request: &EvaluateRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchedSource>> {
        // Step 2: role assignments whose scope contains the request.
        let assignments = self
            .stores
            .assignments
            .active_assignments_for(subject_id, request.scope.organization_id, now)
            .await
            .map_err(fail_closed)?;

        for assignment in &assignments {
            if !assignment.scope.contains(&request.scope) {
                continue;
            }
            let role = match self.stores.catalog.lookup(&assignment.role) {
                Ok(role) => role,
                Err(_) => {
                    // A grant referencing a role the catalog no longer defines
                    // confers nothing.
                    warn!(role = %assignment.role, assignment = %assignment.id, "assignment references unknown role");
                    continue;
                }
            };
            if role.permits(&request.resource, &request.action) {
                debug!(subject = %subject_id, role = %role.name, "allowed via role");
                return Ok(Some(MatchedSource::Role(role.name.clone())));
            }
        }

        // Step 3: point overrides.
        let overrides = self
            .stores
            .overrides
            .active_overrides_for(subject_id, request.scope.organization_id, now)
            .await
            .map_err(fail_closed)?;

        for row in &overrides {
            if row.matches(
                &request.resource,
                request.resource_id.as_deref(),
                &request.action,
                &request.scope,
            ) {
                debug!(subject = %subject_id, override_id = %row.id, "allowed via override");
                return Ok(Some(MatchedSource::Override(row.id)));
            }
        }

        Ok(None)
    }

    /// Whether the assignment is live and its scope contains the request
    async fn assignment_covers(
        &self,
        assignment_id: crate::types::AssignmentId,
        scope: &RequestScope,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let assignment = self
            .stores
            .assignments
            .get(assignment_id)
            .await
            .map_err(fail_closed)?;

        Ok(assignment.is_some_and(|a| {
            a.is_live(now)
                && a.organization_id == scope.organization_id
                && a.scope.contains(scope)
        }))
    }

    fn allow_from(&self, source: MatchedSource, now: DateTime<Utc>) -> Decision {
        let reason = format!("matched {}", source);
        Decision::allow(source, reason, now)
    }

    async fn record_sampled_deny(&self, request: &EvaluateRequest, now: DateTime<Utc>) {
        let every = self.config.deny_audit_sample_every;
        if every == 0 {
            return;
        }
        let Some(audit) = &self.audit else {
            return;
        };

        let n = self.deny_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % every != 0 {
            return;
        }

        let event = AuditEvent::EvaluationDenied {
            subject_id: request.subject_id,
            organization_id: request.scope.organization_id,
            resource: request.resource.clone(),
            action: request.action.clone(),
        };
        // Denies are sampled observability, not mutations; a sink failure
        // must not turn a valid deny into an error.
        if let Err(err) = audit.record(event, now).await {
            warn!(error = %err, "failed to record sampled deny");
        }
    }
}

fn fail_closed(err: AuthzError) -> AuthzError {
    match err {
        err @ AuthzError::Evaluation(_) => err,
        other => AuthzError::Evaluation(other.to_string()),
    }
}
