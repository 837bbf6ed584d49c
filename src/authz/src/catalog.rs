//! Role catalog
//!
//! Roles are configuration, not per-tenant data: an administrator-managed set
//! of named capability maps, each pinned to a hierarchy level. The catalog is
//! read-only at evaluation time.

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Wildcard resource or action
pub const WILDCARD: &str = "*";

/// Level of the tenancy hierarchy a role is designed for
///
/// Descriptive metadata carried through to audit records and admin UIs; not
/// enforced against grant scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    Platform,
    Organization,
    Regional,
    Site,
    External,
}

/// A named role with a resource → actions capability map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Globally unique role name
    pub name: String,

    /// Hierarchy level the role is designed for
    pub hierarchy_level: HierarchyLevel,

    /// Resource type → allowed actions; `"*"` is valid on either side
    pub capabilities: HashMap<String, HashSet<String>>,

    /// Whether the role ships with the platform or was added by a deployment
    pub is_system_defined: bool,
}

impl Role {
    /// Create an empty deployment-defined role
    pub fn new(name: impl Into<String>, hierarchy_level: HierarchyLevel) -> Self {
        Self {
            name: name.into(),
            hierarchy_level,
            capabilities: HashMap::new(),
            is_system_defined: false,
        }
    }

    /// Add a capability entry
    pub fn with_capability<I, S>(mut self, resource: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .entry(resource.into())
            .or_default()
            .extend(actions.into_iter().map(Into::into));
        self
    }

    fn system(mut self) -> Self {
        self.is_system_defined = true;
        self
    }

    /// Whether this role permits `action` on `resource`
    ///
    /// The pair is permitted iff the capability map has an entry for the
    /// resource (exact, or the literal `"*"` key) whose action set contains
    /// the action or `"*"`.
    pub fn permits(&self, resource: &str, action: &str) -> bool {
        [resource, WILDCARD].iter().any(|key| {
            self.capabilities
                .get(*key)
                .is_some_and(|actions| actions.contains(action) || actions.contains(WILDCARD))
        })
    }
}

/// Administrator-managed set of roles, keyed by globally unique name
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: HashMap<String, Role>,
}

impl RoleCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-loaded with the platform's system-defined roles
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        // The account_owner/admin/owner naming variants of earlier schema
        // revisions collapse into the single account_owner role.
        let roles = [
            Role::new("account_owner", HierarchyLevel::Organization)
                .with_capability(WILDCARD, [WILDCARD])
                .system(),
            Role::new("sustainability_lead", HierarchyLevel::Organization)
                .with_capability("emissions", ["view", "edit", "approve"])
                .with_capability("reports", ["view", "edit", "export"])
                .with_capability("targets", ["view", "edit"])
                .with_capability("surveys", ["view", "edit", "send"])
                .with_capability("documents", ["view", "upload"])
                .system(),
            Role::new("regional_manager", HierarchyLevel::Regional)
                .with_capability("sites", ["view", "edit"])
                .with_capability("systems", ["view", "edit"])
                .with_capability("emissions", ["view", "edit"])
                .with_capability("reports", ["view"])
                .system(),
            Role::new("facility_manager", HierarchyLevel::Site)
                .with_capability("systems", ["view", "edit"])
                .with_capability("emissions", ["view", "edit"])
                .with_capability("documents", ["view", "upload"])
                .system(),
            Role::new("analyst", HierarchyLevel::Organization)
                .with_capability("emissions", ["view"])
                .with_capability("reports", ["view", "export"])
                .with_capability("targets", ["view"])
                .system(),
            Role::new("auditor", HierarchyLevel::External)
                .with_capability("emissions", ["view"])
                .with_capability("reports", ["view"])
                .with_capability("documents", ["view"])
                .system(),
            Role::new("viewer", HierarchyLevel::Organization)
                .with_capability(WILDCARD, ["view"])
                .system(),
        ];

        for role in roles {
            catalog
                .register(role)
                .expect("builtin role names are unique");
        }

        catalog
    }

    /// Register a role; role names are globally unique
    pub fn register(&mut self, role: Role) -> Result<()> {
        if role.name.trim().is_empty() {
            return Err(AuthzError::Validation("role name must not be empty".into()));
        }
        if self.roles.contains_key(&role.name) {
            return Err(AuthzError::Validation(format!(
                "role '{}' is already defined",
                role.name
            )));
        }

        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Look up a role by name
    pub fn lookup(&self, name: &str) -> Result<&Role> {
        self.roles
            .get(name)
            .ok_or_else(|| AuthzError::RoleNotFound(name.to_string()))
    }

    /// Whether the catalog defines the given role name
    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    /// Iterate over all roles
    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }
}
