//! Declarative access requirements and the single evaluator that enforces them.
//!
//! Protected operations declare an [`AccessRequirements`] value (directly or
//! through [`Protected`]); handlers call [`AccessGuard::check`] before doing
//! any work.

use std::sync::Arc;

use tracing::{debug, instrument};

use keystone_core::{Error, Result};

use crate::permissions::{Permission, PermissionSet};
use crate::principal::Principal;
use crate::resolver::PermissionResolver;
use crate::roles::SystemRole;
use crate::store::AccessStore;
use crate::tenant::{RequestContext, TenantContext, TenantContextResolver};

/// Whether an operation needs a resolved tenant context.
///
/// `Required` is the default. Only endpoints that intentionally operate across
/// tenants opt out with `CrossTenant`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TenantRequirement {
    #[default]
    Required,
    CrossTenant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequirements {
    required_roles: Vec<SystemRole>,
    required_permissions: Vec<Permission>,
    tenant: TenantRequirement,
}

impl AccessRequirements {
    /// Authenticated principal with a resolvable tenant context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_role(mut self, role: SystemRole) -> Self {
        if !self.required_roles.contains(&role) {
            self.required_roles.push(role);
        }
        self
    }

    pub fn require_permission(mut self, permission: Permission) -> Self {
        if !self.required_permissions.contains(&permission) {
            self.required_permissions.push(permission);
        }
        self
    }

    pub fn require_permissions(self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        permissions
            .into_iter()
            .fold(self, |req, p| req.require_permission(p))
    }

    /// Explicitly opt out of the tenant requirement.
    pub fn cross_tenant(mut self) -> Self {
        self.tenant = TenantRequirement::CrossTenant;
        self
    }

    pub fn required_roles(&self) -> &[SystemRole] {
        &self.required_roles
    }

    pub fn required_permissions(&self) -> &[Permission] {
        &self.required_permissions
    }

    pub fn tenant(&self) -> TenantRequirement {
        self.tenant
    }
}

/// Implemented by operations that carry their own access requirements.
pub trait Protected {
    fn requirements(&self) -> AccessRequirements;
}

/// Result of a successful check.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    principal: Principal,
    tenant: Option<TenantContext>,
    permissions: PermissionSet,
}

impl AccessGrant {
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Resolved tenant. Always present unless the requirements opted out.
    pub fn tenant(&self) -> Result<&TenantContext> {
        self.tenant.as_ref().ok_or(Error::TenantContextMissing)
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }
}

pub struct AccessGuard<S> {
    tenants: TenantContextResolver<S>,
    permissions: PermissionResolver<S>,
}

impl<S> Clone for AccessGuard<S> {
    fn clone(&self) -> Self {
        Self {
            tenants: self.tenants.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

impl<S: AccessStore> AccessGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            tenants: TenantContextResolver::new(store.clone()),
            permissions: PermissionResolver::new(store),
        }
    }

    pub fn tenants(&self) -> &TenantContextResolver<S> {
        &self.tenants
    }

    pub fn permission_resolver(&self) -> &PermissionResolver<S> {
        &self.permissions
    }

    /// Evaluate `requirements` for `request`.
    ///
    /// Order: authentication, system role, tenant context, permissions.
    /// The first failing step decides the error kind. No side effects.
    #[instrument(skip_all, err(level = tracing::Level::DEBUG))]
    pub async fn check(&self, request: &RequestContext, requirements: &AccessRequirements) -> Result<AccessGrant> {
        let principal = request.principal().ok_or(Error::Unauthenticated)?;

        if !requirements.required_roles.is_empty()
            && !requirements.required_roles.contains(&principal.system_role())
        {
            debug!(user_id = %principal.user_id(), role = principal.system_role().as_str(), "system role rejected");
            return Err(Error::ForbiddenRole);
        }

        // Permissions are tenant-scoped, so asking for any forces resolution
        // even on cross-tenant endpoints.
        let needs_tenant = requirements.tenant == TenantRequirement::Required
            || !requirements.required_permissions.is_empty();
        let tenant = if needs_tenant {
            Some(*request.tenant(&self.tenants).await?)
        } else {
            None
        };

        let permissions = match &tenant {
            Some(ctx) => {
                self.permissions
                    .resolve_permissions(principal.user_id(), ctx)
                    .await?
            }
            None => PermissionSet::empty(),
        };

        let missing = permissions.missing(&requirements.required_permissions);
        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(|p| p.to_string()).collect();
            debug!(user_id = %principal.user_id(), missing = ?missing, "permission check failed");
            return Err(Error::ForbiddenPermission(missing));
        }

        Ok(AccessGrant {
            principal: principal.clone(),
            tenant,
            permissions,
        })
    }

    pub async fn authorize<P: Protected>(&self, request: &RequestContext, operation: &P) -> Result<AccessGrant> {
        self.check(request, &operation.requirements()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::permissions::catalog;
    use crate::principal::User;
    use crate::testing::Fixture;

    struct DeleteOrganization;

    impl Protected for DeleteOrganization {
        fn requirements(&self) -> AccessRequirements {
            AccessRequirements::new().require_permission(catalog::ORGANIZATION_DELETE)
        }
    }

    #[tokio::test]
    async fn anonymous_request_is_unauthenticated() {
        let fx = Fixture::new().await;
        let err = fx
            .guard()
            .check(&RequestContext::anonymous(), &AccessRequirements::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::Unauthenticated);
    }

    #[tokio::test]
    async fn system_role_is_checked_before_tenant() {
        let fx = Fixture::new().await;
        // No active organization: a role failure must still win.
        let request = fx.request_without_tenant(fx.owner).await;
        let req = AccessRequirements::new().require_role(SystemRole::Superadmin);

        assert_eq!(fx.guard().check(&request, &req).await.unwrap_err(), Error::ForbiddenRole);
    }

    #[tokio::test]
    async fn missing_tenant_is_rejected_by_default() {
        let fx = Fixture::new().await;
        let request = fx.request_without_tenant(fx.owner).await;

        assert_eq!(
            fx.guard().check(&request, &AccessRequirements::new()).await.unwrap_err(),
            Error::TenantContextMissing
        );
    }

    #[tokio::test]
    async fn cross_tenant_opt_out_skips_tenant_resolution() {
        let fx = Fixture::new().await;
        let mut admin = User::new("root@example.com", "Root");
        admin.system_role = SystemRole::Superadmin;
        fx.store.put_user(admin.clone()).await;
        let request = fx.request_without_tenant(admin.id).await;

        let req = AccessRequirements::new()
            .require_role(SystemRole::Superadmin)
            .cross_tenant();
        let grant = fx.guard().check(&request, &req).await.unwrap();
        assert_eq!(grant.tenant(), Err(Error::TenantContextMissing));
        assert!(grant.permissions().is_empty());
    }

    #[tokio::test]
    async fn cross_tenant_with_permissions_still_needs_a_tenant() {
        let fx = Fixture::new().await;
        let request = fx.request_without_tenant(fx.owner).await;
        let req = AccessRequirements::new()
            .cross_tenant()
            .require_permission(catalog::MEMBERS_READ);

        assert_eq!(fx.guard().check(&request, &req).await.unwrap_err(), Error::TenantContextMissing);
    }

    #[tokio::test]
    async fn missing_permissions_are_named() {
        let fx = Fixture::new().await;
        let viewer = fx.add_user("viewer@example.com").await;
        fx.add_member(viewer, fx.roles.viewer).await;
        let request = fx.request(viewer).await;

        let req = AccessRequirements::new().require_permissions([
            catalog::MEMBERS_READ,
            catalog::MEMBERS_WRITE,
            catalog::ROLES_DELETE,
        ]);
        let err = fx.guard().check(&request, &req).await.unwrap_err();
        assert_eq!(
            err,
            Error::ForbiddenPermission(vec!["members:write".into(), "roles:delete".into()])
        );
    }

    #[tokio::test]
    async fn protected_operation_is_evaluated_through_its_requirements() {
        let fx = Fixture::new().await;
        let admin = fx.add_user("admin@example.com").await;
        fx.add_member(admin, fx.roles.admin).await;

        let denied = fx.guard().authorize(&fx.request(admin).await, &DeleteOrganization).await;
        assert!(matches!(denied, Err(Error::ForbiddenPermission(_))));

        let grant = fx
            .guard()
            .authorize(&fx.request(fx.owner).await, &DeleteOrganization)
            .await
            .unwrap();
        assert_eq!(grant.principal().user_id(), fx.owner);
        assert_eq!(grant.tenant().unwrap(), &fx.tenant);
        assert!(grant.permissions().contains(&catalog::ORGANIZATION_DELETE));
    }

    #[tokio::test]
    async fn non_member_is_forbidden_not_unauthenticated() {
        let fx = Fixture::new().await;
        let stranger = fx.add_user("stranger@example.com").await;
        let request = fx.request(stranger).await;
        let req = AccessRequirements::new().require_permission(catalog::MEMBERS_READ);

        assert!(matches!(
            fx.guard().check(&request, &req).await,
            Err(Error::ForbiddenPermission(_))
        ));
    }

    #[tokio::test]
    async fn store_outage_is_reported_as_unavailable() {
        let fx = Fixture::new().await;
        let request = fx.request(fx.owner).await;
        fx.store.set_unavailable(true);

        let req = AccessRequirements::new().require_permission(catalog::MEMBERS_READ);
        let err = fx.guard().check(&request, &req).await.unwrap_err();
        assert!(matches!(err, Error::BackingStoreUnavailable(_)));
    }

    #[test]
    fn banned_user_never_becomes_a_principal() {
        let mut user = User::new("banned@example.com", "B");
        user.ban.banned = true;
        assert!(Principal::authenticate(&user, Utc::now()).is_err());
    }
}
