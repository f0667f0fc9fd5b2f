//! Transactional writes for one organization.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::instrument;

use keystone_auth::{
    AccessTx, Invitation, InvitationStatus, Membership, Permission, Role, RoleSlug, StoreResult, TenantContext,
};
use keystone_core::{InvitationId, MembershipId, OrganizationId, RoleId};

use super::{map_sqlx_error, rows};

/// Open transaction with `app.tenant_id` applied.
///
/// Dropping it without [`AccessTx::commit`] rolls back every write.
pub struct PgAccessTx {
    tx: Transaction<'static, Postgres>,
    tenant: TenantContext,
}

impl PgAccessTx {
    pub(crate) fn new(tx: Transaction<'static, Postgres>, tenant: TenantContext) -> Self {
        Self { tx, tenant }
    }

    fn organization(&self) -> uuid::Uuid {
        *self.tenant.organization_id().as_uuid()
    }

    fn tenant(&self) -> uuid::Uuid {
        *self.tenant.tenant_id().as_uuid()
    }
}

pub(crate) async fn select_roles(
    tx: &mut Transaction<'static, Postgres>,
    organization_id: OrganizationId,
) -> StoreResult<Vec<Role>> {
    let sql = format!(
        "SELECT {} FROM roles WHERE organization_id = $1 ORDER BY slug",
        rows::ROLE_COLUMNS
    );
    let found = sqlx::query(&sql)
        .bind(*organization_id.as_uuid())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("select_roles", e))?;
    found
        .iter()
        .map(rows::role)
        .collect::<Result<_, _>>()
        .map_err(|e| map_sqlx_error("select_roles", e))
}

pub(crate) async fn select_role_permissions(
    tx: &mut Transaction<'static, Postgres>,
    organization_id: OrganizationId,
    role_id: RoleId,
) -> StoreResult<Vec<Permission>> {
    let found = sqlx::query(
        r#"
        SELECT rp.permission
        FROM role_permissions rp
        JOIN roles r ON r.id = rp.role_id
        WHERE rp.role_id = $1 AND r.organization_id = $2
        ORDER BY rp.permission
        "#,
    )
    .bind(*role_id.as_uuid())
    .bind(*organization_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("role_permissions", e))?;
    found
        .iter()
        .map(rows::permission)
        .collect::<Result<_, _>>()
        .map_err(|e| map_sqlx_error("role_permissions", e))
}

#[async_trait]
impl AccessTx for PgAccessTx {
    #[instrument(skip(self), fields(organization_id = %self.tenant.organization_id()), err)]
    async fn lock_memberships(&mut self) -> StoreResult<Vec<Membership>> {
        let sql = format!(
            "SELECT {} FROM memberships WHERE organization_id = $1 ORDER BY created_at, id FOR UPDATE",
            rows::MEMBERSHIP_COLUMNS
        );
        let found = sqlx::query(&sql)
            .bind(self.organization())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_memberships", e))?;
        found
            .iter()
            .map(rows::membership)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("lock_memberships", e))
    }

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (id, tenant_id, organization_id, user_id, role_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*membership.id.as_uuid())
        .bind(self.tenant())
        .bind(self.organization())
        .bind(*membership.user_id.as_uuid())
        .bind(membership.role_id.map(|r| *r.as_uuid()))
        .bind(membership.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_membership", e))?;
        Ok(())
    }

    async fn set_membership_role(&mut self, membership_id: MembershipId, role_id: RoleId) -> StoreResult<()> {
        sqlx::query("UPDATE memberships SET role_id = $1 WHERE id = $2 AND organization_id = $3")
            .bind(*role_id.as_uuid())
            .bind(*membership_id.as_uuid())
            .bind(self.organization())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_membership_role", e))?;
        Ok(())
    }

    async fn delete_membership(&mut self, membership_id: MembershipId) -> StoreResult<()> {
        sqlx::query("DELETE FROM memberships WHERE id = $1 AND organization_id = $2")
            .bind(*membership_id.as_uuid())
            .bind(self.organization())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_membership", e))?;
        Ok(())
    }

    async fn reassign_role(&mut self, from: RoleId, to: RoleId) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE memberships SET role_id = $1 WHERE role_id = $2 AND organization_id = $3")
            .bind(*to.as_uuid())
            .bind(*from.as_uuid())
            .bind(self.organization())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("reassign_role", e))?;
        Ok(result.rows_affected())
    }

    async fn find_role(&mut self, role_id: RoleId) -> StoreResult<Option<Role>> {
        let sql = format!(
            "SELECT {} FROM roles WHERE id = $1 AND organization_id = $2",
            rows::ROLE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(*role_id.as_uuid())
            .bind(self.organization())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;
        row.as_ref()
            .map(rows::role)
            .transpose()
            .map_err(|e| map_sqlx_error("find_role", e))
    }

    async fn find_role_by_slug(&mut self, slug: &RoleSlug) -> StoreResult<Option<Role>> {
        let sql = format!(
            "SELECT {} FROM roles WHERE slug = $1 AND organization_id = $2",
            rows::ROLE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(slug.as_str())
            .bind(self.organization())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_slug", e))?;
        row.as_ref()
            .map(rows::role)
            .transpose()
            .map_err(|e| map_sqlx_error("find_role_by_slug", e))
    }

    async fn insert_role(&mut self, role: &Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, tenant_id, organization_id, name, slug, is_default)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*role.id.as_uuid())
        .bind(self.tenant())
        .bind(self.organization())
        .bind(&role.name)
        .bind(role.slug.as_str())
        .bind(role.is_default)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(())
    }

    async fn update_role(&mut self, role: &Role) -> StoreResult<()> {
        sqlx::query("UPDATE roles SET name = $1, slug = $2 WHERE id = $3 AND organization_id = $4")
            .bind(&role.name)
            .bind(role.slug.as_str())
            .bind(*role.id.as_uuid())
            .bind(self.organization())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;
        Ok(())
    }

    async fn delete_role(&mut self, role_id: RoleId) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(*role_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        sqlx::query("DELETE FROM roles WHERE id = $1 AND organization_id = $2")
            .bind(*role_id.as_uuid())
            .bind(self.organization())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        Ok(())
    }

    async fn role_permissions(&mut self, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        let organization_id = self.tenant.organization_id();
        select_role_permissions(&mut self.tx, organization_id, role_id).await
    }

    async fn set_role_permissions(&mut self, role_id: RoleId, permissions: &[Permission]) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(*role_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_role_permissions", e))?;

        for permission in permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, permission, tenant_id) VALUES ($1, $2, $3)")
                .bind(*role_id.as_uuid())
                .bind(permission.as_str())
                .bind(self.tenant())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("set_role_permissions", e))?;
        }
        Ok(())
    }

    async fn ensure_permissions(&mut self, permissions: &[Permission]) -> StoreResult<()> {
        for permission in permissions {
            sqlx::query(
                "INSERT INTO permissions (name, resource, action) VALUES ($1, $2, $3) ON CONFLICT (name) DO NOTHING",
            )
            .bind(permission.as_str())
            .bind(permission.resource())
            .bind(permission.action())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("ensure_permissions", e))?;
        }
        Ok(())
    }

    async fn find_invitation(&mut self, invitation_id: InvitationId) -> StoreResult<Option<Invitation>> {
        let sql = format!(
            "SELECT {} FROM invitations WHERE id = $1 AND organization_id = $2",
            rows::INVITATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(*invitation_id.as_uuid())
            .bind(self.organization())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_invitation", e))?;
        row.as_ref()
            .map(rows::invitation)
            .transpose()
            .map_err(|e| map_sqlx_error("find_invitation", e))
    }

    async fn find_pending_invitation(&mut self, email: &str) -> StoreResult<Option<Invitation>> {
        let sql = format!(
            "SELECT {} FROM invitations WHERE organization_id = $1 AND email = $2 AND status = 'pending'",
            rows::INVITATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(self.organization())
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_pending_invitation", e))?;
        row.as_ref()
            .map(rows::invitation)
            .transpose()
            .map_err(|e| map_sqlx_error("find_pending_invitation", e))
    }

    async fn insert_invitation(&mut self, invitation: &Invitation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (id, tenant_id, organization_id, email, role_id, status, invited_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*invitation.id.as_uuid())
        .bind(self.tenant())
        .bind(self.organization())
        .bind(&invitation.email)
        .bind(*invitation.role_id.as_uuid())
        .bind(invitation.status.as_str())
        .bind(*invitation.invited_by.as_uuid())
        .bind(invitation.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invitation", e))?;
        Ok(())
    }

    async fn set_invitation_status(&mut self, invitation_id: InvitationId, status: InvitationStatus) -> StoreResult<()> {
        sqlx::query("UPDATE invitations SET status = $1 WHERE id = $2 AND organization_id = $3")
            .bind(status.as_str())
            .bind(*invitation_id.as_uuid())
            .bind(self.organization())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_invitation_status", e))?;
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}
