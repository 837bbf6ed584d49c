//! # Veridia Authorization Engine
//!
//! Hierarchical, multi-source permission evaluation for the Veridia
//! sustainability-reporting platform. Decides whether a subject may perform
//! an action on a resource within a scoped tenancy (organization / region /
//! site), composing role assignments, justified overrides, and approved
//! delegations under a fixed precedence order, with an append-only audit
//! trail over every grant mutation.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use uuid::Uuid;
//! use veridia_authz::{
//!     AdminService, EvaluateRequest, GrantRoleRequest, InMemoryAuditSink,
//!     PermissionEvaluator, RoleCatalog, Stores, SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stores = Stores::in_memory(RoleCatalog::builtin());
//!     let audit = Arc::new(InMemoryAuditSink::new());
//!     let clock = Arc::new(SystemClock);
//!
//!     let admin = AdminService::new(stores.clone(), audit.clone(), clock.clone());
//!     let evaluator = PermissionEvaluator::new(stores, clock);
//!
//!     let (user, org, operator) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
//!     admin
//!         .grant_role(GrantRoleRequest {
//!             subject_id: user,
//!             role: "facility_manager".to_string(),
//!             organization_id: org,
//!             region_id: None,
//!             site_id: None,
//!             granted_by: operator,
//!             expires_at: None,
//!         })
//!         .await?;
//!
//!     let request = EvaluateRequest::org(user, "systems", "edit", org)?;
//!     let decision = evaluator.evaluate(&request).await?;
//!     assert!(decision.allowed);
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod assignment;
pub mod audit;
pub mod catalog;
pub mod clock;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod overrides;
pub mod scope;
pub mod stores;
pub mod super_admin;
pub mod types;

// Re-export commonly used types
pub use admin::{AdminService, GrantOverrideRequest, GrantRoleRequest, Vocabulary};
pub use assignment::{InMemoryAssignmentStore, RoleAssignment, RoleAssignmentStore};
pub use audit::{
    AuditEvent, AuditPage, AuditQuery, AuditRecord, AuditSink, InMemoryAuditSink,
};
pub use catalog::{HierarchyLevel, Role, RoleCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use delegation::{
    Delegation, DelegationProposal, DelegationScope, DelegationStatus, DelegationStore,
    InMemoryDelegationStore,
};
pub use engine::{
    Decision, EvaluateRequest, EvaluatorConfig, MatchedSource, PermissionEvaluator,
};
pub use error::{AuthzError, Result};
pub use maintenance::{run_sweeps, sweep_once, SweepConfig};
pub use overrides::{InMemoryOverrideStore, OverrideStore, PermissionOverride};
pub use scope::{GrantScope, RequestScope};
pub use stores::Stores;
pub use super_admin::{InMemorySuperAdminStore, SuperAdminGrant, SuperAdminStore};
pub use types::{
    AssignmentId, DelegationId, OrganizationId, OverrideId, PermissionGrant, RegionId, SiteId,
    SubjectId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
