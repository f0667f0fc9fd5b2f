//! Per-request tenant resolution.
//!
//! The isolation boundary (the RLS tenant id) is always a top-level
//! organization. A session acting in a child organization is resolved to its
//! top-level ancestor while the child id is kept for display and filtering.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use keystone_core::{ConstraintKind, EntityKind, Error, OrganizationId, Result, TenantId};

use crate::organization::MAX_HIERARCHY_DEPTH;
use crate::principal::Principal;
use crate::store::AccessStore;

/// Resolved tenant scope for one request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct TenantContext {
    tenant_id: TenantId,
    organization_id: OrganizationId,
}

impl TenantContext {
    /// Build a context from already-validated ids.
    ///
    /// Request handling goes through [`TenantContextResolver`]; this exists for
    /// storage adapters and tests.
    pub fn new(tenant_id: TenantId, organization_id: OrganizationId) -> Self {
        Self {
            tenant_id,
            organization_id,
        }
    }

    /// Context for a top-level organization acting as its own tenant.
    pub fn top_level(organization_id: OrganizationId) -> Self {
        Self::new(organization_id.into(), organization_id)
    }

    /// Isolation boundary: the top-level tenant id used for RLS.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Organization the request is acting in (memberships and roles live here).
    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn is_child(&self) -> bool {
        self.tenant_id.as_uuid() != self.organization_id.as_uuid()
    }
}

pub struct TenantContextResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for TenantContextResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: AccessStore> TenantContextResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolve the context for the session's active organization.
    pub async fn resolve(&self, active_organization: Option<OrganizationId>) -> Result<TenantContext> {
        let organization_id = active_organization.ok_or(Error::TenantContextMissing)?;
        self.resolve_organization(organization_id).await
    }

    /// Resolve the context for an explicit organization by walking up to its
    /// top-level ancestor.
    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    pub async fn resolve_organization(&self, organization_id: OrganizationId) -> Result<TenantContext> {
        let (root, depth) = self.walk(organization_id).await?;
        debug!(tenant_id = %root, depth, "tenant context resolved");
        Ok(TenantContext::new(root.into(), organization_id))
    }

    /// Level of `organization_id` in its hierarchy; a tenant is level 1.
    pub async fn depth(&self, organization_id: OrganizationId) -> Result<usize> {
        Ok(self.walk(organization_id).await?.1)
    }

    async fn walk(&self, organization_id: OrganizationId) -> Result<(OrganizationId, usize)> {
        let mut current = self.find_live(organization_id).await?;
        let mut visited = vec![current.id];

        while let Some(parent_id) = current.parent_id {
            if visited.contains(&parent_id) || visited.len() >= MAX_HIERARCHY_DEPTH {
                return Err(Error::Constraint(ConstraintKind::HierarchyDepth));
            }
            current = self.find_live(parent_id).await?;
            visited.push(current.id);
        }
        Ok((current.id, visited.len()))
    }

    async fn find_live(&self, id: OrganizationId) -> Result<crate::organization::Organization> {
        match self.store.find_organization(id).await? {
            Some(org) if !org.is_deleted() => Ok(org),
            _ => Err(Error::NotFound(EntityKind::Tenant)),
        }
    }
}

/// Request-scoped authorization state.
///
/// Holds the authenticated principal (if any), the session's active
/// organization, and a once-per-request cache of the resolved tenant context.
/// Create one per inbound request and never share it across requests.
#[derive(Debug, Default)]
pub struct RequestContext {
    principal: Option<Principal>,
    active_organization: Option<OrganizationId>,
    tenant: OnceCell<TenantContext>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(principal: Principal, active_organization: Option<OrganizationId>) -> Self {
        Self {
            principal: Some(principal),
            active_organization,
            tenant: OnceCell::new(),
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn active_organization(&self) -> Option<OrganizationId> {
        self.active_organization
    }

    /// Resolved tenant context, computed at most once for this request.
    pub async fn tenant<S: AccessStore>(&self, resolver: &TenantContextResolver<S>) -> Result<&TenantContext> {
        self.tenant
            .get_or_try_init(|| resolver.resolve(self.active_organization))
            .await
    }
}
