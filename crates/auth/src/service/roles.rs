use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use keystone_core::{ConflictKind, ConstraintKind, EntityKind, Error, Result, RoleId, UserId};

use super::{MembershipService, default_role, lookup_permission, validate_name};
use crate::audit::{Actor, AuditRecord};
use crate::permissions::{Permission, catalog};
use crate::roles::{DefaultRole, Role, RoleSlug};
use crate::store::{AccessStore, AccessTx};
use crate::tenant::TenantContext;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Partial role update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub permissions: Option<Vec<String>>,
}

/// A role together with its permission grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDetails {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDeletion {
    pub role: Role,
    /// Memberships moved to the `viewer` role.
    pub reassigned: u64,
}

/// Ids of the four default roles of one organization.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct SeededRoles {
    pub owner: RoleId,
    pub admin: RoleId,
    pub member: RoleId,
    pub viewer: RoleId,
}

impl SeededRoles {
    pub fn get(&self, kind: DefaultRole) -> RoleId {
        match kind {
            DefaultRole::Owner => self.owner,
            DefaultRole::Admin => self.admin,
            DefaultRole::Member => self.member,
            DefaultRole::Viewer => self.viewer,
        }
    }
}

fn resolve_permissions(raw: &[String]) -> Result<Vec<Permission>> {
    let mut out: Vec<Permission> = raw.iter().map(|p| lookup_permission(p)).collect::<Result<_>>()?;
    out.sort();
    out.dedup();
    Ok(out)
}

impl<S: AccessStore> MembershipService<S> {
    #[instrument(skip(self, tenant, new), fields(organization_id = %tenant.organization_id(), slug = %new.slug), err)]
    pub async fn create_role(&self, tenant: &TenantContext, actor: UserId, new: NewRole) -> Result<RoleDetails> {
        let slug = RoleSlug::parse(&new.slug)?;
        if slug.is_reserved() {
            return Err(Error::Conflict(ConflictKind::Slug));
        }
        let name = validate_name(&new.name)?;
        let permissions = resolve_permissions(&new.permissions)?;

        let mut tx = self.store.begin(tenant).await?;
        if tx.find_role_by_slug(&slug).await?.is_some() {
            return Err(Error::Conflict(ConflictKind::Slug));
        }

        let role = Role {
            id: RoleId::new(),
            organization_id: tenant.organization_id(),
            name,
            slug,
            is_default: false,
        };
        tx.insert_role(&role).await?;
        tx.set_role_permissions(role.id, &permissions).await?;
        tx.commit().await?;

        let details = RoleDetails { role, permissions };
        info!(role_id = %details.role.id, "role created");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "role.created", "role", details.role.id)
                .in_organization(tenant.organization_id())
                .after(&details),
        );
        Ok(details)
    }

    /// Rename, re-slug or re-grant a role.
    ///
    /// Default roles may be renamed; their slug and permission set are fixed.
    #[instrument(skip(self, tenant, update), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn update_role(
        &self,
        tenant: &TenantContext,
        actor: UserId,
        role_id: RoleId,
        update: RoleUpdate,
    ) -> Result<RoleDetails> {
        let mut tx = self.store.begin(tenant).await?;
        let role = tx
            .find_role(role_id)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;
        let before = RoleDetails {
            permissions: tx.role_permissions(role.id).await?,
            role: role.clone(),
        };

        let mut updated = role.clone();
        if let Some(name) = &update.name {
            updated.name = validate_name(name)?;
        }
        if let Some(raw) = &update.slug {
            let slug = RoleSlug::parse(raw)?;
            if slug != role.slug {
                if role.is_default {
                    return Err(Error::Constraint(ConstraintKind::DefaultRole));
                }
                if slug.is_reserved() {
                    return Err(Error::Conflict(ConflictKind::Slug));
                }
                updated.slug = slug;
            }
        }
        let permissions = match &update.permissions {
            Some(_) if role.is_default => return Err(Error::Constraint(ConstraintKind::DefaultRole)),
            Some(raw) => Some(resolve_permissions(raw)?),
            None => None,
        };

        tx.update_role(&updated).await?;
        if let Some(permissions) = &permissions {
            tx.set_role_permissions(updated.id, permissions).await?;
        }
        tx.commit().await?;

        let after = RoleDetails {
            role: updated,
            permissions: permissions.unwrap_or_else(|| before.permissions.clone()),
        };
        info!(role_id = %role_id, "role updated");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "role.updated", "role", role_id)
                .in_organization(tenant.organization_id())
                .before(&before)
                .after(&after),
        );
        Ok(after)
    }

    /// Delete a custom role, moving its holders to `viewer` first.
    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn delete_role(&self, tenant: &TenantContext, actor: UserId, role_id: RoleId) -> Result<RoleDeletion> {
        let mut tx = self.store.begin(tenant).await?;
        tx.lock_memberships().await?;

        let role = tx
            .find_role(role_id)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;
        if role.is_default {
            return Err(Error::Constraint(ConstraintKind::DefaultRole));
        }
        let viewer = default_role(&mut tx, DefaultRole::Viewer)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;

        let reassigned = tx.reassign_role(role.id, viewer.id).await?;
        tx.delete_role(role.id).await?;
        tx.commit().await?;

        info!(role_id = %role.id, reassigned, "role deleted");
        let deletion = RoleDeletion { role, reassigned };
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "role.deleted", "role", role_id)
                .in_organization(tenant.organization_id())
                .before(&deletion),
        );
        Ok(deletion)
    }

    /// Ensure the permission catalog and the four default roles exist.
    ///
    /// Idempotent: repeated calls return the same ids. A concurrent seeder
    /// racing on the same slug causes one retry against the committed rows.
    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn seed_default_roles(&self, tenant: &TenantContext) -> Result<SeededRoles> {
        match self.try_seed(tenant).await {
            Err(Error::Conflict(ConflictKind::Slug)) => {
                warn!("default role seeding raced with another seeder, retrying");
                self.try_seed(tenant).await
            }
            other => other,
        }
    }

    async fn try_seed(&self, tenant: &TenantContext) -> Result<SeededRoles> {
        let mut tx = self.store.begin(tenant).await?;
        tx.ensure_permissions(catalog::ALL).await?;

        let mut ids = Vec::with_capacity(DefaultRole::ALL.len());
        let mut created = Vec::new();
        for kind in DefaultRole::ALL {
            let id = match tx.find_role_by_slug(&kind.role_slug()).await? {
                Some(existing) => existing.id,
                None => {
                    let role = Role::seeded(tenant.organization_id(), kind);
                    tx.insert_role(&role).await?;
                    tx.set_role_permissions(role.id, &kind.permissions()).await?;
                    created.push(kind.slug());
                    role.id
                }
            };
            ids.push(id);
        }
        tx.commit().await?;

        let seeded = SeededRoles {
            owner: ids[0],
            admin: ids[1],
            member: ids[2],
            viewer: ids[3],
        };
        if !created.is_empty() {
            info!(created = ?created, "default roles seeded");
            self.audit.emit(
                AuditRecord::new(Actor::System, "roles.seeded", "organization", tenant.organization_id())
                    .in_organization(tenant.organization_id())
                    .after(&seeded),
            );
        }
        Ok(seeded)
    }

    /// Roles of the organization with their permission grants.
    pub async fn list_roles(&self, tenant: &TenantContext) -> Result<Vec<RoleDetails>> {
        let roles = self.store.list_roles(tenant).await?;
        let mut out = Vec::with_capacity(roles.len());
        for role in roles {
            let permissions = self.store.role_permissions(tenant, role.id).await?;
            out.push(RoleDetails { role, permissions });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    fn new_role(slug: &str, permissions: &[&str]) -> NewRole {
        NewRole {
            slug: slug.into(),
            name: "Custom".into(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn seeding_twice_keeps_one_row_per_slug_and_same_ids() {
        let fx = Fixture::new().await;
        let again = fx.service().seed_default_roles(&fx.tenant).await.unwrap();

        assert_eq!(again, fx.roles);
        assert_eq!(fx.store.role_count(fx.tenant.organization_id()).await, 4);

        let roles = fx.service().list_roles(&fx.tenant).await.unwrap();
        for kind in DefaultRole::ALL {
            let role = roles.iter().find(|r| r.role.slug == kind.role_slug()).unwrap();
            assert!(role.role.is_default);
            let mut expected = kind.permissions();
            expected.sort();
            assert_eq!(role.permissions, expected);
        }
    }

    #[tokio::test]
    async fn create_role_with_default_slug_conflicts() {
        let fx = Fixture::new().await;
        let err = fx
            .service()
            .create_role(&fx.tenant, fx.owner, new_role("admin", &[]))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Conflict(ConflictKind::Slug));
    }

    #[tokio::test]
    async fn create_role_validates_slug_and_permissions() {
        let fx = Fixture::new().await;
        let svc = fx.service();

        let err = svc
            .create_role(&fx.tenant, fx.owner, new_role("Bad Slug", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = svc
            .create_role(&fx.tenant, fx.owner, new_role("auditor", &["audit_logs:purge"]))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound(EntityKind::Permission));

        let created = svc
            .create_role(&fx.tenant, fx.owner, new_role("auditor", &["audit_logs:read", "members:read"]))
            .await
            .unwrap();
        assert!(!created.role.is_default);
        assert_eq!(created.permissions.len(), 2);

        let err = svc
            .create_role(&fx.tenant, fx.owner, new_role("auditor", &[]))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Conflict(ConflictKind::Slug));
    }

    #[tokio::test]
    async fn custom_role_grants_its_permissions() {
        let fx = Fixture::new().await;
        let role = fx
            .service()
            .create_role(&fx.tenant, fx.owner, new_role("auditor", &["audit_logs:read"]))
            .await
            .unwrap();
        let user = fx.add_user("auditor@example.com").await;
        fx.add_member(user, role.role.id).await;

        let perms = fx.resolver().resolve_permissions(user, &fx.tenant).await.unwrap();
        assert!(perms.contains(&catalog::AUDIT_LOGS_READ));
        assert_eq!(perms.len(), 1);
    }

    #[tokio::test]
    async fn default_roles_are_never_deletable() {
        let fx = Fixture::new().await;
        for kind in DefaultRole::ALL {
            let err = fx
                .service()
                .delete_role(&fx.tenant, fx.owner, fx.roles.get(kind))
                .await
                .unwrap_err();
            assert_eq!(err, Error::Constraint(ConstraintKind::DefaultRole), "{}", kind.slug());
        }
        assert_eq!(fx.store.role_count(fx.tenant.organization_id()).await, 4);
    }

    #[tokio::test]
    async fn deleting_custom_role_moves_holders_to_viewer() {
        let fx = Fixture::new().await;
        let svc = fx.service();
        let role = svc
            .create_role(&fx.tenant, fx.owner, new_role("contractor", &["members:read"]))
            .await
            .unwrap();
        let a = fx.add_user("a@example.com").await;
        let b = fx.add_user("b@example.com").await;
        fx.add_member(a, role.role.id).await;
        fx.add_member(b, role.role.id).await;

        let deletion = svc.delete_role(&fx.tenant, fx.owner, role.role.id).await.unwrap();
        assert_eq!(deletion.reassigned, 2);

        for user in [a, b] {
            let m = fx.store.find_membership_by_user(&fx.tenant, user).await.unwrap().unwrap();
            assert_eq!(m.role_id, Some(fx.roles.viewer));
        }
        assert_eq!(fx.store.role_count(fx.tenant.organization_id()).await, 4);
    }

    #[tokio::test]
    async fn default_role_can_be_renamed_but_not_reslugged_or_regranted() {
        let fx = Fixture::new().await;
        let svc = fx.service();

        let renamed = svc
            .update_role(
                &fx.tenant,
                fx.owner,
                fx.roles.admin,
                RoleUpdate {
                    name: Some("Administrator".into()),
                    slug: Some("admin".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.role.name, "Administrator");

        let err = svc
            .update_role(
                &fx.tenant,
                fx.owner,
                fx.roles.admin,
                RoleUpdate {
                    slug: Some("administrator".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, Error::Constraint(ConstraintKind::DefaultRole));

        let err = svc
            .update_role(
                &fx.tenant,
                fx.owner,
                fx.roles.viewer,
                RoleUpdate {
                    permissions: Some(vec!["organization:delete".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, Error::Constraint(ConstraintKind::DefaultRole));
    }

    #[tokio::test]
    async fn custom_role_update_replaces_grants_and_checks_slug_uniqueness() {
        let fx = Fixture::new().await;
        let svc = fx.service();
        svc.create_role(&fx.tenant, fx.owner, new_role("billing", &[]))
            .await
            .unwrap();
        let role = svc
            .create_role(&fx.tenant, fx.owner, new_role("support", &["members:read"]))
            .await
            .unwrap();

        let updated = svc
            .update_role(
                &fx.tenant,
                fx.owner,
                role.role.id,
                RoleUpdate {
                    permissions: Some(vec!["invitations:read".into(), "invitations:write".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            updated.permissions,
            vec![catalog::INVITATIONS_READ, catalog::INVITATIONS_WRITE]
        );

        let err = svc
            .update_role(
                &fx.tenant,
                fx.owner,
                role.role.id,
                RoleUpdate {
                    slug: Some("billing".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, Error::Conflict(ConflictKind::Slug));
    }

    #[tokio::test]
    async fn roles_are_tenant_scoped() {
        let fx = Fixture::new().await;
        let other = Fixture::new_sharing(&fx).await;

        let err = fx
            .service()
            .delete_role(&fx.tenant, fx.owner, other.roles.viewer)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound(EntityKind::Role));

        let roles = fx.service().list_roles(&fx.tenant).await.unwrap();
        assert_eq!(roles.len(), 4);
        assert!(roles.iter().all(|r| r.role.organization_id == fx.tenant.organization_id()));
    }
}
