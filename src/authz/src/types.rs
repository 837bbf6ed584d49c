//! Core identifier and permission types
//!
//! Subject, organization, region, and site identifiers are opaque UUIDs owned
//! by the surrounding application; resource and action identifiers are
//! free-form strings from the deployment's vocabulary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject (user) identifier
pub type SubjectId = Uuid;

/// Organization (tenant) identifier
pub type OrganizationId = Uuid;

/// Region identifier
pub type RegionId = Uuid;

/// Site identifier
pub type SiteId = Uuid;

/// Role-assignment identifier
pub type AssignmentId = Uuid;

/// Permission-override identifier
pub type OverrideId = Uuid;

/// Delegation identifier
pub type DelegationId = Uuid;

/// A single `(resource, action)` pair
///
/// Used for partial-delegation subsets and vocabulary checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Resource type (e.g. "reports", "systems")
    pub resource: String,

    /// Action name (e.g. "view", "edit", "export")
    pub action: String,
}

impl PermissionGrant {
    /// Create a new permission pair
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}
