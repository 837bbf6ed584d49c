//! Hierarchical tenancy scopes
//!
//! A grant applies to an organization as a whole, to one region, or to one
//! site; a request names the organization it targets plus the region/site it
//! is about. Containment is an explicit match on the scope variant: a broader
//! grant covers every narrower request inside it, never the reverse.

use crate::error::{AuthzError, Result};
use crate::types::{OrganizationId, RegionId, SiteId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope of a grant (assignment or delegation source) inside its organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum GrantScope {
    /// Applies everywhere in the organization
    OrgWide,
    /// Applies to one region and the sites inside it
    RegionWide(RegionId),
    /// Applies to a single site
    SiteSpecific(SiteId),
}

impl GrantScope {
    /// Build a scope from the optional region/site of an administrative grant
    ///
    /// A grant names at most one of the two: a region-wide grant carries a
    /// region id, a site grant carries a site id, an organization-wide grant
    /// carries neither.
    pub fn from_parts(region_id: Option<RegionId>, site_id: Option<SiteId>) -> Result<Self> {
        match (region_id, site_id) {
            (None, None) => Ok(Self::OrgWide),
            (Some(region), None) => {
                if region.is_nil() {
                    return Err(AuthzError::Validation("region id must not be nil".into()));
                }
                Ok(Self::RegionWide(region))
            }
            (None, Some(site)) => {
                if site.is_nil() {
                    return Err(AuthzError::Validation("site id must not be nil".into()));
                }
                Ok(Self::SiteSpecific(site))
            }
            (Some(_), Some(_)) => Err(AuthzError::Validation(
                "a grant scope may name a region or a site, not both".into(),
            )),
        }
    }

    /// Whether a request inside the same organization falls under this scope
    pub fn contains(&self, request: &RequestScope) -> bool {
        match self {
            Self::OrgWide => true,
            Self::RegionWide(region) => request.region_id == Some(*region),
            Self::SiteSpecific(site) => request.site_id == Some(*site),
        }
    }
}

impl fmt::Display for GrantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrgWide => write!(f, "org-wide"),
            Self::RegionWide(region) => write!(f, "region:{}", region),
            Self::SiteSpecific(site) => write!(f, "site:{}", site),
        }
    }
}

/// Scope of an evaluation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestScope {
    /// Organization the request targets
    pub organization_id: OrganizationId,

    /// Region the request is about, when known to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<RegionId>,

    /// Site the request is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
}

impl RequestScope {
    /// Organization-level request scope
    pub fn org(organization_id: OrganizationId) -> Result<Self> {
        Self::new(organization_id, None, None)
    }

    /// Site-level request scope
    pub fn site(organization_id: OrganizationId, site_id: SiteId) -> Result<Self> {
        Self::new(organization_id, None, Some(site_id))
    }

    /// Validated request scope
    ///
    /// Rejected before any store is queried: a nil organization id, or nil
    /// region/site ids. A site or region is only meaningful inside an
    /// organization, so the organization id is always required.
    pub fn new(
        organization_id: OrganizationId,
        region_id: Option<RegionId>,
        site_id: Option<SiteId>,
    ) -> Result<Self> {
        if organization_id.is_nil() {
            return Err(AuthzError::Validation(
                "organization id is required for scoped requests".into(),
            ));
        }
        if region_id.is_some_and(|id| id.is_nil()) {
            return Err(AuthzError::Validation("region id must not be nil".into()));
        }
        if site_id.is_some_and(|id| id.is_nil()) {
            return Err(AuthzError::Validation("site id must not be nil".into()));
        }

        Ok(Self {
            organization_id,
            region_id,
            site_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_org_wide_contains_everything() {
        let (org, region, site) = ids();
        let scope = GrantScope::OrgWide;

        assert!(scope.contains(&RequestScope::org(org).unwrap()));
        assert!(scope.contains(&RequestScope::site(org, site).unwrap()));
        assert!(scope.contains(&RequestScope::new(org, Some(region), Some(site)).unwrap()));
    }

    #[test]
    fn test_site_scope_matches_only_that_site() {
        let (org, _, site) = ids();
        let other_site = Uuid::new_v4();
        let scope = GrantScope::SiteSpecific(site);

        assert!(scope.contains(&RequestScope::site(org, site).unwrap()));
        assert!(!scope.contains(&RequestScope::site(org, other_site).unwrap()));
        assert!(!scope.contains(&RequestScope::org(org).unwrap()));
    }

    #[test]
    fn test_region_scope_requires_region_in_request() {
        let (org, region, site) = ids();
        let scope = GrantScope::RegionWide(region);

        assert!(scope.contains(&RequestScope::new(org, Some(region), None).unwrap()));
        assert!(scope.contains(&RequestScope::new(org, Some(region), Some(site)).unwrap()));
        // Request that names no region cannot match a region-scoped grant.
        assert!(!scope.contains(&RequestScope::site(org, site).unwrap()));
    }

    #[test]
    fn test_nil_organization_rejected() {
        let result = RequestScope::org(Uuid::nil());
        assert!(matches!(result, Err(AuthzError::Validation(_))));
    }

    #[test]
    fn test_nil_site_rejected() {
        let result = RequestScope::site(Uuid::new_v4(), Uuid::nil());
        assert!(matches!(result, Err(AuthzError::Validation(_))));
    }

    #[test]
    fn test_grant_scope_from_parts() {
        let (_, region, site) = ids();

        assert_eq!(
            GrantScope::from_parts(None, None).unwrap(),
            GrantScope::OrgWide
        );
        assert_eq!(
            GrantScope::from_parts(Some(region), None).unwrap(),
            GrantScope::RegionWide(region)
        );
        assert_eq!(
            GrantScope::from_parts(None, Some(site)).unwrap(),
            GrantScope::SiteSpecific(site)
        );
        assert!(GrantScope::from_parts(Some(region), Some(site)).is_err());
    }
}
