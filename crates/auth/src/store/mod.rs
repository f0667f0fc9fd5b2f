//! Persistence boundary for the authorization kernel.
//!
//! Every tenant-scoped read or write takes a resolved [`TenantContext`]; an
//! adapter must never reach rows of another organization through it.
//! Multi-row mutations go through an [`AccessTx`]: dropping a transaction
//! without calling [`AccessTx::commit`] discards every write made through it.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use keystone_core::{ConflictKind, Error, InvitationId, MembershipId, OrganizationId, RoleId, UserId};

use crate::membership::{Invitation, InvitationStatus, Membership};
use crate::organization::Organization;
use crate::permissions::Permission;
use crate::principal::User;
use crate::roles::{Role, RoleSlug};
use crate::tenant::TenantContext;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection, pool or IO failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(ConflictKind),
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(msg) => Error::BackingStoreUnavailable(msg),
            StoreError::Conflict(kind) => Error::Conflict(kind),
        }
    }
}

/// Read access plus transaction factory.
#[async_trait]
pub trait AccessStore: Send + Sync + 'static {
    type Tx: AccessTx;

    /// Open a transaction scoped to `tenant`.
    async fn begin(&self, tenant: &TenantContext) -> StoreResult<Self::Tx>;

    // Global (non tenant-scoped) lookups.

    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_organization(&self, organization_id: OrganizationId) -> StoreResult<Option<Organization>>;

    /// Insert an organization. A taken slug is `Conflict(Slug)`.
    async fn create_organization(&self, organization: &Organization) -> StoreResult<()>;

    // Tenant-scoped reads.

    async fn find_membership_by_user(
        &self,
        tenant: &TenantContext,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>>;

    async fn role_permissions(&self, tenant: &TenantContext, role_id: RoleId) -> StoreResult<Vec<Permission>>;

    async fn list_memberships(&self, tenant: &TenantContext) -> StoreResult<Vec<Membership>>;

    async fn list_roles(&self, tenant: &TenantContext) -> StoreResult<Vec<Role>>;

    async fn list_invitations(&self, tenant: &TenantContext) -> StoreResult<Vec<Invitation>>;
}

/// A transaction scoped to one organization.
#[async_trait]
pub trait AccessTx: Send {
    /// Lock and return every membership of the organization.
    ///
    /// Locks are held until commit or drop, so owner counts computed from the
    /// result stay valid for the rest of the transaction.
    async fn lock_memberships(&mut self) -> StoreResult<Vec<Membership>>;

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()>;

    async fn set_membership_role(&mut self, membership_id: MembershipId, role_id: RoleId) -> StoreResult<()>;

    async fn delete_membership(&mut self, membership_id: MembershipId) -> StoreResult<()>;

    /// Move every holder of `from` to `to`. Returns the number of memberships moved.
    async fn reassign_role(&mut self, from: RoleId, to: RoleId) -> StoreResult<u64>;

    async fn find_role(&mut self, role_id: RoleId) -> StoreResult<Option<Role>>;

    async fn find_role_by_slug(&mut self, slug: &RoleSlug) -> StoreResult<Option<Role>>;

    async fn insert_role(&mut self, role: &Role) -> StoreResult<()>;

    async fn update_role(&mut self, role: &Role) -> StoreResult<()>;

    /// Delete a role and its permission grants.
    async fn delete_role(&mut self, role_id: RoleId) -> StoreResult<()>;

    async fn role_permissions(&mut self, role_id: RoleId) -> StoreResult<Vec<Permission>>;

    /// Replace the permission grants of a role.
    async fn set_role_permissions(&mut self, role_id: RoleId, permissions: &[Permission]) -> StoreResult<()>;

    /// Idempotently insert catalog entries.
    async fn ensure_permissions(&mut self, permissions: &[Permission]) -> StoreResult<()>;

    async fn find_invitation(&mut self, invitation_id: InvitationId) -> StoreResult<Option<Invitation>>;

    async fn find_pending_invitation(&mut self, email: &str) -> StoreResult<Option<Invitation>>;

    async fn insert_invitation(&mut self, invitation: &Invitation) -> StoreResult<()>;

    async fn set_invitation_status(&mut self, invitation_id: InvitationId, status: InvitationStatus) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;
}
