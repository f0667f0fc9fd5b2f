//! Permission resolution from role assignments.

use std::sync::Arc;

use tracing::instrument;

use keystone_core::{Result, UserId};

use crate::permissions::{Permission, PermissionSet};
use crate::store::AccessStore;
use crate::tenant::TenantContext;

/// Resolves the permissions a user holds in one tenant.
///
/// - No membership, or a membership without a role, resolves to the empty set.
/// - Storage failures surface as `BackingStoreUnavailable`, never as an empty set.
pub struct PermissionResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: AccessStore> PermissionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, tenant),
        fields(organization_id = %tenant.organization_id()),
        err
    )]
    pub async fn resolve_permissions(&self, user_id: UserId, tenant: &TenantContext) -> Result<PermissionSet> {
        let Some(membership) = self.store.find_membership_by_user(tenant, user_id).await? else {
            return Ok(PermissionSet::empty());
        };
        let Some(role_id) = membership.role_id else {
            return Ok(PermissionSet::empty());
        };

        let permissions = self.store.role_permissions(tenant, role_id).await?;
        Ok(permissions.into_iter().collect())
    }

    pub async fn has_permission(
        &self,
        user_id: UserId,
        tenant: &TenantContext,
        permission: &Permission,
    ) -> Result<bool> {
        Ok(self.resolve_permissions(user_id, tenant).await?.contains(permission))
    }
}

#[cfg(test)]
mod tests {
    use keystone_core::Error;

    use super::*;
    use crate::permissions::catalog;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn non_member_resolves_to_empty_set() {
        let fx = Fixture::new().await;
        let stranger = fx.add_user("stranger@example.com").await;

        let perms = fx.resolver().resolve_permissions(stranger, &fx.tenant).await.unwrap();
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn member_without_role_resolves_to_empty_set() {
        let fx = Fixture::new().await;
        let user = fx.add_user("pending@example.com").await;
        fx.add_membership_without_role(user).await;

        let perms = fx.resolver().resolve_permissions(user, &fx.tenant).await.unwrap();
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn viewer_gets_exactly_viewer_permissions() {
        let fx = Fixture::new().await;
        let user = fx.add_user("viewer@example.com").await;
        fx.add_member(user, fx.roles.viewer).await;

        let perms = fx.resolver().resolve_permissions(user, &fx.tenant).await.unwrap();
        let expected: PermissionSet = crate::roles::DefaultRole::Viewer.permissions().into_iter().collect();
        assert_eq!(perms, expected);

        assert!(fx.resolver().has_permission(user, &fx.tenant, &catalog::MEMBERS_READ).await.unwrap());
        assert!(!fx.resolver().has_permission(user, &fx.tenant, &catalog::MEMBERS_WRITE).await.unwrap());
    }

    #[tokio::test]
    async fn membership_in_another_tenant_grants_nothing_here() {
        let fx = Fixture::new().await;
        let other = Fixture::new_sharing(&fx).await;
        let user = fx.add_user("dual@example.com").await;
        other.add_member(user, other.roles.owner).await;

        let perms = fx.resolver().resolve_permissions(user, &fx.tenant).await.unwrap();
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn store_outage_is_not_an_empty_set() {
        let fx = Fixture::new().await;
        fx.store.set_unavailable(true);

        let err = fx.resolver().resolve_permissions(fx.owner, &fx.tenant).await.unwrap_err();
        assert!(matches!(err, Error::BackingStoreUnavailable(_)));
    }
}
