//! In-memory access store for tests/dev.
//!
//! Transactions take the single state lock for their whole lifetime and work
//! on a private copy that replaces the shared state on commit. Transactions
//! are therefore fully serialized, which is the in-memory counterpart of the
//! row locks the Postgres adapter takes on membership rows.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use keystone_core::{ConflictKind, InvitationId, MembershipId, OrganizationId, RoleId, UserId};

use super::{AccessStore, AccessTx, StoreError, StoreResult};
use crate::membership::{Invitation, InvitationStatus, Membership};
use crate::organization::Organization;
use crate::permissions::Permission;
use crate::principal::User;
use crate::roles::{Role, RoleSlug};
use crate::tenant::TenantContext;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    users: HashMap<UserId, User>,
    organizations: HashMap<OrganizationId, Organization>,
    memberships: HashMap<MembershipId, Membership>,
    roles: HashMap<RoleId, Role>,
    role_permissions: HashMap<RoleId, BTreeSet<Permission>>,
    permissions: BTreeSet<Permission>,
    invitations: HashMap<InvitationId, Invitation>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAccessStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every subsequent call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn put_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn put_organization(&self, organization: Organization) {
        self.state
            .lock()
            .await
            .organizations
            .insert(organization.id, organization);
    }

    /// Number of roles stored for an organization (test introspection).
    pub async fn role_count(&self, organization_id: OrganizationId) -> usize {
        self.state
            .lock()
            .await
            .roles
            .values()
            .filter(|r| r.organization_id == organization_id)
            .count()
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccessStore for InMemoryAccessStore {
    type Tx = InMemoryTx;

    async fn begin(&self, tenant: &TenantContext) -> StoreResult<Self::Tx> {
        self.check()?;
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx {
            guard,
            working,
            organization_id: tenant.organization_id(),
            unavailable: self.unavailable.clone(),
        })
    }

    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        self.check()?;
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.check()?;
        let email = crate::membership::normalize_email(email);
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_organization(&self, organization_id: OrganizationId) -> StoreResult<Option<Organization>> {
        self.check()?;
        Ok(self.state.lock().await.organizations.get(&organization_id).cloned())
    }

    async fn create_organization(&self, organization: &Organization) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.organizations.values().any(|o| o.slug == organization.slug) {
            return Err(StoreError::Conflict(ConflictKind::Slug));
        }
        state.organizations.insert(organization.id, organization.clone());
        Ok(())
    }

    async fn find_membership_by_user(
        &self,
        tenant: &TenantContext,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        self.check()?;
        let org = tenant.organization_id();
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .values()
            .find(|m| m.organization_id == org && m.user_id == user_id)
            .cloned())
    }

    async fn role_permissions(&self, tenant: &TenantContext, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        self.check()?;
        let state = self.state.lock().await;
        match state.roles.get(&role_id) {
            Some(role) if role.organization_id == tenant.organization_id() => Ok(state
                .role_permissions
                .get(&role_id)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()),
            _ => Ok(Vec::new()),
        }
    }

    async fn list_memberships(&self, tenant: &TenantContext) -> StoreResult<Vec<Membership>> {
        self.check()?;
        let org = tenant.organization_id();
        let mut out: Vec<_> = self
            .state
            .lock()
            .await
            .memberships
            .values()
            .filter(|m| m.organization_id == org)
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.created_at, m.id));
        Ok(out)
    }

    async fn list_roles(&self, tenant: &TenantContext) -> StoreResult<Vec<Role>> {
        self.check()?;
        let org = tenant.organization_id();
        let mut out: Vec<_> = self
            .state
            .lock()
            .await
            .roles
            .values()
            .filter(|r| r.organization_id == org)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(out)
    }

    async fn list_invitations(&self, tenant: &TenantContext) -> StoreResult<Vec<Invitation>> {
        self.check()?;
        let org = tenant.organization_id();
        let mut out: Vec<_> = self
            .state
            .lock()
            .await
            .invitations
            .values()
            .filter(|i| i.organization_id == org)
            .cloned()
            .collect();
        out.sort_by_key(|i| (i.created_at, i.id));
        Ok(out)
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    organization_id: OrganizationId,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryTx {
    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn owns_role(&self, role_id: RoleId) -> bool {
        self.working
            .roles
            .get(&role_id)
            .is_some_and(|r| r.organization_id == self.organization_id)
    }
}

#[async_trait]
impl AccessTx for InMemoryTx {
    async fn lock_memberships(&mut self) -> StoreResult<Vec<Membership>> {
        self.check()?;
        let org = self.organization_id;
        let mut out: Vec<_> = self
            .working
            .memberships
            .values()
            .filter(|m| m.organization_id == org)
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.created_at, m.id));
        Ok(out)
    }

    async fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        self.check()?;
        let duplicate = self
            .working
            .memberships
            .values()
            .any(|m| m.organization_id == membership.organization_id && m.user_id == membership.user_id);
        if duplicate {
            return Err(StoreError::Conflict(ConflictKind::Membership));
        }
        self.working.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    async fn set_membership_role(&mut self, membership_id: MembershipId, role_id: RoleId) -> StoreResult<()> {
        self.check()?;
        let org = self.organization_id;
        if let Some(m) = self
            .working
            .memberships
            .get_mut(&membership_id)
            .filter(|m| m.organization_id == org)
        {
            m.role_id = Some(role_id);
        }
        Ok(())
    }

    async fn delete_membership(&mut self, membership_id: MembershipId) -> StoreResult<()> {
        self.check()?;
        let org = self.organization_id;
        self.working
            .memberships
            .retain(|id, m| !(*id == membership_id && m.organization_id == org));
        Ok(())
    }

    async fn reassign_role(&mut self, from: RoleId, to: RoleId) -> StoreResult<u64> {
        self.check()?;
        let org = self.organization_id;
        let mut moved = 0;
        for m in self.working.memberships.values_mut() {
            if m.organization_id == org && m.role_id == Some(from) {
                m.role_id = Some(to);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn find_role(&mut self, role_id: RoleId) -> StoreResult<Option<Role>> {
        self.check()?;
        let org = self.organization_id;
        Ok(self
            .working
            .roles
            .get(&role_id)
            .filter(|r| r.organization_id == org)
            .cloned())
    }

    async fn find_role_by_slug(&mut self, slug: &RoleSlug) -> StoreResult<Option<Role>> {
        self.check()?;
        let org = self.organization_id;
        Ok(self
            .working
            .roles
            .values()
            .find(|r| r.organization_id == org && &r.slug == slug)
            .cloned())
    }

    async fn insert_role(&mut self, role: &Role) -> StoreResult<()> {
        self.check()?;
        let duplicate = self
            .working
            .roles
            .values()
            .any(|r| r.organization_id == role.organization_id && r.slug == role.slug);
        if duplicate {
            return Err(StoreError::Conflict(ConflictKind::Slug));
        }
        self.working.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&mut self, role: &Role) -> StoreResult<()> {
        self.check()?;
        let duplicate = self.working.roles.values().any(|r| {
            r.id != role.id && r.organization_id == role.organization_id && r.slug == role.slug
        });
        if duplicate {
            return Err(StoreError::Conflict(ConflictKind::Slug));
        }
        if self.owns_role(role.id) {
            self.working.roles.insert(role.id, role.clone());
        }
        Ok(())
    }

    async fn delete_role(&mut self, role_id: RoleId) -> StoreResult<()> {
        self.check()?;
        if self.owns_role(role_id) {
            self.working.roles.remove(&role_id);
            self.working.role_permissions.remove(&role_id);
            self.working.invitations.retain(|_, i| i.role_id != role_id);
        }
        Ok(())
    }

    async fn role_permissions(&mut self, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        self.check()?;
        if !self.owns_role(role_id) {
            return Ok(Vec::new());
        }
        Ok(self
            .working
            .role_permissions
            .get(&role_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_role_permissions(&mut self, role_id: RoleId, permissions: &[Permission]) -> StoreResult<()> {
        self.check()?;
        if self.owns_role(role_id) {
            self.working
                .role_permissions
                .insert(role_id, permissions.iter().cloned().collect());
        }
        Ok(())
    }

    async fn ensure_permissions(&mut self, permissions: &[Permission]) -> StoreResult<()> {
        self.check()?;
        self.working.permissions.extend(permissions.iter().cloned());
        Ok(())
    }

    async fn find_invitation(&mut self, invitation_id: InvitationId) -> StoreResult<Option<Invitation>> {
        self.check()?;
        let org = self.organization_id;
        Ok(self
            .working
            .invitations
            .get(&invitation_id)
            .filter(|i| i.organization_id == org)
            .cloned())
    }

    async fn find_pending_invitation(&mut self, email: &str) -> StoreResult<Option<Invitation>> {
        self.check()?;
        let org = self.organization_id;
        Ok(self
            .working
            .invitations
            .values()
            .find(|i| i.organization_id == org && i.email == email && i.is_pending())
            .cloned())
    }

    async fn insert_invitation(&mut self, invitation: &Invitation) -> StoreResult<()> {
        self.check()?;
        let duplicate = self.working.invitations.values().any(|i| {
            i.organization_id == invitation.organization_id && i.email == invitation.email && i.is_pending()
        });
        if duplicate && invitation.is_pending() {
            return Err(StoreError::Conflict(ConflictKind::Invitation));
        }
        self.working.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn set_invitation_status(&mut self, invitation_id: InvitationId, status: InvitationStatus) -> StoreResult<()> {
        self.check()?;
        let org = self.organization_id;
        if let Some(i) = self
            .working
            .invitations
            .get_mut(&invitation_id)
            .filter(|i| i.organization_id == org)
        {
            i.status = status;
        }
        Ok(())
    }

    async fn commit(mut self) -> StoreResult<()> {
        self.check()?;
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
