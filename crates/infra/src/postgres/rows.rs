//! Row decoding for the RBAC tables.

use sqlx::Row;
use sqlx::postgres::PgRow;

use keystone_auth::{BanState, Invitation, Membership, Organization, Permission, Role, RoleSlug, User};
use keystone_core::{InvitationId, MembershipId, OrganizationId, RoleId, UserId};

pub(crate) const USER_COLUMNS: &str =
    "id, email, display_name, system_role, banned, ban_reason, ban_expires_at, deleted_at";
pub(crate) const ORGANIZATION_COLUMNS: &str = "id, name, slug, parent_id, deleted_at, purge_scheduled_at";
pub(crate) const MEMBERSHIP_COLUMNS: &str = "id, organization_id, user_id, role_id, created_at";
pub(crate) const ROLE_COLUMNS: &str = "id, organization_id, name, slug, is_default";
pub(crate) const INVITATION_COLUMNS: &str = "id, organization_id, email, role_id, status, invited_by, created_at";

fn decode<T, E>(result: Result<T, E>) -> Result<T, sqlx::Error>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result.map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(crate) fn user(row: &PgRow) -> Result<User, sqlx::Error> {
    let system_role: String = row.try_get("system_role")?;
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        system_role: decode(system_role.parse())?,
        ban: BanState {
            banned: row.try_get("banned")?,
            reason: row.try_get("ban_reason")?,
            expires_at: row.try_get("ban_expires_at")?,
        },
        deleted_at: row.try_get("deleted_at")?,
    })
}

pub(crate) fn organization(row: &PgRow) -> Result<Organization, sqlx::Error> {
    let parent_id: Option<uuid::Uuid> = row.try_get("parent_id")?;
    Ok(Organization {
        id: OrganizationId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        parent_id: parent_id.map(OrganizationId::from_uuid),
        deleted_at: row.try_get("deleted_at")?,
        purge_scheduled_at: row.try_get("purge_scheduled_at")?,
    })
}

pub(crate) fn membership(row: &PgRow) -> Result<Membership, sqlx::Error> {
    let role_id: Option<uuid::Uuid> = row.try_get("role_id")?;
    Ok(Membership {
        id: MembershipId::from_uuid(row.try_get("id")?),
        organization_id: OrganizationId::from_uuid(row.try_get("organization_id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        role_id: role_id.map(RoleId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn role(row: &PgRow) -> Result<Role, sqlx::Error> {
    let slug: String = row.try_get("slug")?;
    Ok(Role {
        id: RoleId::from_uuid(row.try_get("id")?),
        organization_id: OrganizationId::from_uuid(row.try_get("organization_id")?),
        name: row.try_get("name")?,
        slug: decode(RoleSlug::parse(&slug))?,
        is_default: row.try_get("is_default")?,
    })
}

pub(crate) fn invitation(row: &PgRow) -> Result<Invitation, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Invitation {
        id: InvitationId::from_uuid(row.try_get("id")?),
        organization_id: OrganizationId::from_uuid(row.try_get("organization_id")?),
        email: row.try_get("email")?,
        role_id: RoleId::from_uuid(row.try_get("role_id")?),
        status: decode(status.parse())?,
        invited_by: UserId::from_uuid(row.try_get("invited_by")?),
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn permission(row: &PgRow) -> Result<Permission, sqlx::Error> {
    let name: String = row.try_get("permission")?;
    decode(Permission::parse(&name))
}
