//! Postgres-backed access store.
//!
//! ## Tenant isolation
//!
//! Every tenant-scoped statement runs inside a transaction that first calls
//! `set_config('app.tenant_id', <tenant>, true)`. The setting is
//! transaction-local and feeds the RLS policies in `migrations/`; queries
//! additionally filter on `organization_id`.
//!
//! ## Error mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict(kind)` picked by constraint name |
//! | Any other database error | any | `Unavailable` |
//! | PoolClosed / PoolTimedOut / Io / Tls | n/a | `Unavailable` |

mod audit;
mod rows;
mod tx;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, instrument};

use keystone_auth::{
    AccessStore, Invitation, Membership, Organization, Permission, Role, StoreError, StoreResult, TenantContext, User,
};
use keystone_core::{ConflictKind, OrganizationId, RoleId, UserId};

pub use audit::PostgresAuditSink;
pub use tx::PgAccessTx;

const MIGRATION: &str = include_str!("../../migrations/0001_rbac.sql");

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

#[derive(Debug, Clone)]
pub struct PostgresAccessStore {
    pool: PgPool,
}

impl PostgresAccessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        info!("database schema applied");
        Ok(())
    }

    /// Short read-only transaction with the RLS setting applied.
    async fn scoped(&self, tenant: &TenantContext, operation: &str) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        apply_tenant(&mut tx, tenant, operation).await?;
        Ok(tx)
    }
}

pub(crate) async fn apply_tenant(
    tx: &mut Transaction<'static, Postgres>,
    tenant: &TenantContext,
    operation: &str,
) -> StoreResult<()> {
    sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
        .bind(tenant.tenant_id().as_uuid().to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

#[async_trait]
impl AccessStore for PostgresAccessStore {
    type Tx = PgAccessTx;

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.tenant_id()), err)]
    async fn begin(&self, tenant: &TenantContext) -> StoreResult<Self::Tx> {
        let tx = self.scoped(tenant, "begin").await?;
        Ok(PgAccessTx::new(tx, *tenant))
    }

    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", rows::USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.as_ref()
            .map(rows::user)
            .transpose()
            .map_err(|e| map_sqlx_error("find_user", e))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = lower($1)", rows::USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        row.as_ref()
            .map(rows::user)
            .transpose()
            .map_err(|e| map_sqlx_error("find_user_by_email", e))
    }

    async fn find_organization(&self, organization_id: OrganizationId) -> StoreResult<Option<Organization>> {
        let sql = format!("SELECT {} FROM organizations WHERE id = $1", rows::ORGANIZATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(*organization_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_organization", e))?;
        row.as_ref()
            .map(rows::organization)
            .transpose()
            .map_err(|e| map_sqlx_error("find_organization", e))
    }

    async fn create_organization(&self, organization: &Organization) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, slug, parent_id, deleted_at, purge_scheduled_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*organization.id.as_uuid())
        .bind(&organization.name)
        .bind(&organization.slug)
        .bind(organization.parent_id.map(|id| *id.as_uuid()))
        .bind(organization.deleted_at)
        .bind(organization.purge_scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_organization", e))?;
        Ok(())
    }

    async fn find_membership_by_user(
        &self,
        tenant: &TenantContext,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        let mut tx = self.scoped(tenant, "find_membership_by_user").await?;
        let sql = format!(
            "SELECT {} FROM memberships WHERE organization_id = $1 AND user_id = $2",
            rows::MEMBERSHIP_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(*tenant.organization_id().as_uuid())
            .bind(*user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("find_membership_by_user", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("find_membership_by_user", e))?;
        row.as_ref()
            .map(rows::membership)
            .transpose()
            .map_err(|e| map_sqlx_error("find_membership_by_user", e))
    }

    async fn role_permissions(&self, tenant: &TenantContext, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        let mut tx = self.scoped(tenant, "role_permissions").await?;
        let permissions = tx::select_role_permissions(&mut tx, tenant.organization_id(), role_id).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("role_permissions", e))?;
        Ok(permissions)
    }

    async fn list_memberships(&self, tenant: &TenantContext) -> StoreResult<Vec<Membership>> {
        let mut tx = self.scoped(tenant, "list_memberships").await?;
        let sql = format!(
            "SELECT {} FROM memberships WHERE organization_id = $1 ORDER BY created_at, id",
            rows::MEMBERSHIP_COLUMNS
        );
        let found = sqlx::query(&sql)
            .bind(*tenant.organization_id().as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("list_memberships", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("list_memberships", e))?;
        found
            .iter()
            .map(rows::membership)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("list_memberships", e))
    }

    async fn list_roles(&self, tenant: &TenantContext) -> StoreResult<Vec<Role>> {
        let mut tx = self.scoped(tenant, "list_roles").await?;
        let roles = tx::select_roles(&mut tx, tenant.organization_id()).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("list_roles", e))?;
        Ok(roles)
    }

    async fn list_invitations(&self, tenant: &TenantContext) -> StoreResult<Vec<Invitation>> {
        let mut tx = self.scoped(tenant, "list_invitations").await?;
        let sql = format!(
            "SELECT {} FROM invitations WHERE organization_id = $1 ORDER BY created_at, id",
            rows::INVITATION_COLUMNS
        );
        let found = sqlx::query(&sql)
            .bind(*tenant.organization_id().as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("list_invitations", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("list_invitations", e))?;
        found
            .iter()
            .map(rows::invitation)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("list_invitations", e))
    }
}

/// Which uniqueness rule a constraint name enforces.
pub(crate) fn conflict_for_constraint(constraint: Option<&str>) -> Option<ConflictKind> {
    match constraint? {
        "organizations_slug_key" | "roles_organization_slug_key" => Some(ConflictKind::Slug),
        "memberships_organization_user_key" => Some(ConflictKind::Membership),
        "invitations_pending_email_key" => Some(ConflictKind::Invitation),
        _ => None,
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let unique = db_err.code().is_some_and(|code| code.as_ref() == "23505");
            match conflict_for_constraint(db_err.constraint()) {
                Some(kind) if unique => StoreError::Conflict(kind),
                _ => StoreError::Unavailable(format!("database error in {operation}: {}", db_err.message())),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => StoreError::Unavailable(format!("connection pool timed out in {operation}")),
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_names_map_to_conflict_kinds() {
        assert_eq!(
            conflict_for_constraint(Some("roles_organization_slug_key")),
            Some(ConflictKind::Slug)
        );
        assert_eq!(
            conflict_for_constraint(Some("memberships_organization_user_key")),
            Some(ConflictKind::Membership)
        );
        assert_eq!(
            conflict_for_constraint(Some("invitations_pending_email_key")),
            Some(ConflictKind::Invitation)
        );
        assert_eq!(
            conflict_for_constraint(Some("organizations_slug_key")),
            Some(ConflictKind::Slug)
        );
        assert_eq!(conflict_for_constraint(Some("users_email_key")), None);
        assert_eq!(conflict_for_constraint(None), None);
    }

    #[test]
    fn connection_errors_are_unavailable() {
        assert!(matches!(
            map_sqlx_error("test", sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("test", sqlx::Error::RowNotFound),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn migration_enables_row_level_security_on_tenant_tables() {
        for table in ["roles", "role_permissions", "memberships", "invitations"] {
            assert!(
                MIGRATION.contains(&format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY")),
                "{table}"
            );
        }
        for constraint in [
            "roles_organization_slug_key",
            "memberships_organization_user_key",
            "invitations_pending_email_key",
        ] {
            assert!(MIGRATION.contains(constraint), "{constraint}");
        }
    }
}
