//! Evaluator integration tests
//!
//! Drives the full decision pipeline through the admin service:
//! super-admin short-circuit, scoped role matching, overrides, expiry.

use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;
use veridia_authz::{
    AdminService, AuthzError, Clock, EvaluateRequest, GrantOverrideRequest, GrantRoleRequest,
    HierarchyLevel, InMemoryAuditSink, ManualClock, MatchedSource, PermissionEvaluator, Role,
    RoleCatalog, Stores,
};

struct Harness {
    admin: AdminService,
    evaluator: PermissionEvaluator,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    harness_with_catalog(RoleCatalog::builtin())
}

fn harness_with_catalog(catalog: RoleCatalog) -> Harness {
    let stores = Stores::in_memory(catalog);
    let clock = Arc::new(ManualClock::starting_now());
    let audit = Arc::new(InMemoryAuditSink::new());
    let admin = AdminService::new(stores.clone(), audit, clock.clone());
    let evaluator = PermissionEvaluator::new(stores, clock.clone());

    Harness {
        admin,
        evaluator,
        clock,
    }
}

async fn grant_role(h: &Harness, subject: Uuid, role: &str, org: Uuid, site: Option<Uuid>) {
    h.admin
        .grant_role(GrantRoleRequest {
            subject_id: subject,
            role: role.to_string(),
            organization_id: org,
            region_id: None,
            site_id: site,
            granted_by: Uuid::new_v4(),
            expires_at: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_super_admin_allows_regardless_of_grants() {
    let h = harness();
    let (admin_subject, org, site) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    h.admin
        .grant_super_admin(admin_subject, Uuid::new_v4(), "platform operator")
        .await
        .unwrap();

    // No role, override, or delegation exists for this subject.
    for (resource, action) in [("emissions", "delete"), ("permissions", "manage")] {
        let request =
            EvaluateRequest::site(admin_subject, resource, action, org, site).unwrap();
        let decision = h.evaluator.evaluate(&request).await.unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.source, MatchedSource::SuperAdmin);
    }
}

#[tokio::test]
async fn test_facility_manager_site_scoping() {
    let h = harness();
    let (user, org, site, other_site) =
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    grant_role(&h, user, "facility_manager", org, Some(site)).await;

    let at_site = EvaluateRequest::site(user, "systems", "edit", org, site).unwrap();
    let decision = h.evaluator.evaluate(&at_site).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(
        decision.source,
        MatchedSource::Role("facility_manager".into())
    );

    // No org-wide assignment exists, so another site is out of scope.
    let elsewhere = EvaluateRequest::site(user, "systems", "edit", org, other_site).unwrap();
    let decision = h.evaluator.evaluate(&elsewhere).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.source, MatchedSource::NoGrant);
}

#[tokio::test]
async fn test_org_wide_assignment_covers_every_site() {
    let h = harness();
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    grant_role(&h, user, "sustainability_lead", org, None).await;

    for _ in 0..3 {
        let site = Uuid::new_v4();
        let request = EvaluateRequest::site(user, "reports", "export", org, site).unwrap();
        assert!(h.evaluator.evaluate(&request).await.unwrap().allowed);
    }
}

#[tokio::test]
async fn test_grants_do_not_leak_across_organizations() {
    let h = harness();
    let (user, org, other_org) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    grant_role(&h, user, "account_owner", org, None).await;

    let request = EvaluateRequest::org(user, "reports", "view", other_org).unwrap();
    assert!(!h.evaluator.evaluate(&request).await.unwrap().allowed);
}

#[tokio::test]
async fn test_expired_assignment_is_dead_before_the_sweep_runs() {
    let h = harness();
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    h.admin
        .grant_role(GrantRoleRequest {
            subject_id: user,
            role: "viewer".to_string(),
            organization_id: org,
            region_id: None,
            site_id: None,
            granted_by: Uuid::new_v4(),
            expires_at: Some(h.clock.now() + chrono::Duration::hours(1)),
        })
        .await
        .unwrap();

    let request = EvaluateRequest::org(user, "reports", "view", org).unwrap();
    assert!(h.evaluator.evaluate(&request).await.unwrap().allowed);

    // Past the expiry, with no expire_due() call in between.
    h.clock.advance(chrono::Duration::hours(2));
    assert!(!h.evaluator.evaluate(&request).await.unwrap().allowed);
}

#[tokio::test]
async fn test_override_allows_until_expiry() {
    let h = harness();
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    let override_id = h
        .admin
        .grant_override(GrantOverrideRequest {
            subject_id: user,
            organization_id: org,
            site_id: None,
            resource_type: "reports".to_string(),
            resource_id: None,
            action: "export".to_string(),
            granted_by: Uuid::new_v4(),
            justification: "quarter-end filing window".to_string(),
            expires_at: Some(h.clock.now() + chrono::Duration::hours(1)),
        })
        .await
        .unwrap();

    let request = EvaluateRequest::org(user, "reports", "export", org).unwrap();
    let decision = h.evaluator.evaluate(&request).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.source, MatchedSource::Override(override_id));

    h.clock.advance(chrono::Duration::hours(2));
    let decision = h.evaluator.evaluate(&request).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.source, MatchedSource::NoGrant);
}

#[tokio::test]
async fn test_override_requires_justification() {
    let h = harness();

    let result = h
        .admin
        .grant_override(GrantOverrideRequest {
            subject_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            site_id: None,
            resource_type: "reports".to_string(),
            resource_id: None,
            action: "export".to_string(),
            granted_by: Uuid::new_v4(),
            justification: "".to_string(),
            expires_at: None,
        })
        .await;

    assert!(matches!(result, Err(AuthzError::Validation(_))));
}

#[tokio::test]
async fn test_override_does_not_widen_beyond_its_action() {
    let h = harness();
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    h.admin
        .grant_override(GrantOverrideRequest {
            subject_id: user,
            organization_id: org,
            site_id: None,
            resource_type: "reports".to_string(),
            resource_id: None,
            action: "export".to_string(),
            granted_by: Uuid::new_v4(),
            justification: "one-off export".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();

    let edit = EvaluateRequest::org(user, "reports", "edit", org).unwrap();
    assert!(!h.evaluator.evaluate(&edit).await.unwrap().allowed);
}

#[tokio::test]
async fn test_roles_take_precedence_over_overrides() {
    let h = harness();
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    grant_role(&h, user, "analyst", org, None).await;
    h.admin
        .grant_override(GrantOverrideRequest {
            subject_id: user,
            organization_id: org,
            site_id: None,
            resource_type: "reports".to_string(),
            resource_id: None,
            action: "export".to_string(),
            granted_by: Uuid::new_v4(),
            justification: "redundant with analyst".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();

    // Both sources would allow; the role is the matched one.
    let request = EvaluateRequest::org(user, "reports", "export", org).unwrap();
    let decision = h.evaluator.evaluate(&request).await.unwrap();
    assert_eq!(decision.source, MatchedSource::Role("analyst".into()));
}

#[tokio::test]
async fn test_wildcard_resource_role() {
    let mut catalog = RoleCatalog::new();
    catalog
        .register(Role::new("read_all", HierarchyLevel::Organization).with_capability("*", ["view"]))
        .unwrap();
    let h = harness_with_catalog(catalog);
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    grant_role(&h, user, "read_all", org, None).await;

    let view = EvaluateRequest::org(user, "buildings", "view", org).unwrap();
    assert!(h.evaluator.evaluate(&view).await.unwrap().allowed);

    let edit = EvaluateRequest::org(user, "buildings", "edit", org).unwrap();
    assert!(!h.evaluator.evaluate(&edit).await.unwrap().allowed);
}

#[tokio::test]
async fn test_wildcard_action_role() {
    let mut catalog = RoleCatalog::new();
    catalog
        .register(
            Role::new("buildings_admin", HierarchyLevel::Site).with_capability("buildings", ["*"]),
        )
        .unwrap();
    let h = harness_with_catalog(catalog);
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    grant_role(&h, user, "buildings_admin", org, None).await;

    let any_action = EvaluateRequest::org(user, "buildings", "demolish", org).unwrap();
    assert!(h.evaluator.evaluate(&any_action).await.unwrap().allowed);

    let other_resource = EvaluateRequest::org(user, "reports", "view", org).unwrap();
    assert!(!h.evaluator.evaluate(&other_resource).await.unwrap().allowed);
}

#[tokio::test]
async fn test_deny_is_a_decision_not_an_error() {
    let h = harness();
    let request =
        EvaluateRequest::org(Uuid::new_v4(), "reports", "view", Uuid::new_v4()).unwrap();

    let decision = h.evaluator.evaluate(&request).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.source, MatchedSource::NoGrant);
    assert_eq!(decision.source.to_string(), "no_grant");
}

#[tokio::test]
async fn test_malformed_scope_rejected_before_evaluation() {
    let result = EvaluateRequest::org(Uuid::new_v4(), "reports", "view", Uuid::nil());
    assert!(matches!(result, Err(AuthzError::Validation(_))));

    let result = EvaluateRequest::site(Uuid::new_v4(), "reports", "view", Uuid::new_v4(), Uuid::nil());
    assert!(matches!(result, Err(AuthzError::Validation(_))));
}

#[tokio::test]
async fn test_duplicate_grant_reported_not_applied_twice() {
    let h = harness();
    let (user, org) = (Uuid::new_v4(), Uuid::new_v4());

    grant_role(&h, user, "viewer", org, None).await;
    let result = h
        .admin
        .grant_role(GrantRoleRequest {
            subject_id: user,
            role: "viewer".to_string(),
            organization_id: org,
            region_id: None,
            site_id: None,
            granted_by: Uuid::new_v4(),
            expires_at: None,
        })
        .await;

    assert!(matches!(
        result,
        Err(AuthzError::DuplicateAssignment { .. })
    ));
}

proptest! {
    // A role granting one action on every resource must never grant any
    // other action, whatever the resource.
    #[test]
    fn prop_wildcard_resource_is_action_bound(
        resource in "[a-z]{1,12}",
        action in "[a-z]{1,12}",
    ) {
        let role = Role::new("read_all", HierarchyLevel::Organization)
            .with_capability("*", ["view"]);

        prop_assert_eq!(role.permits(&resource, &action), action == "view");
    }

    // A role granting every action on one resource must never grant
    // anything on other resources.
    #[test]
    fn prop_wildcard_action_is_resource_bound(
        resource in "[a-z]{1,12}",
        action in "[a-z]{1,12}",
    ) {
        let role = Role::new("buildings_admin", HierarchyLevel::Site)
            .with_capability("buildings", ["*"]);

        prop_assert_eq!(role.permits(&resource, &action), resource == "buildings");
    }
}
