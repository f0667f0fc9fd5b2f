//! Invariant-preserving role and membership mutations.
//!
//! Every operation runs against a resolved [`TenantContext`]; ids from another
//! tenant are simply not found. Mutations that can change who holds the owner
//! role lock the organization's membership rows first and validate the owner
//! invariant against that locked snapshot.

mod invitations;
mod members;
mod organizations;
mod roles;

use std::sync::Arc;

use serde::Serialize;

use keystone_core::{EntityKind, Error, MembershipId, Result, RoleId, UserId};

use crate::audit::AuditRecorder;
use crate::membership::Membership;
use crate::permissions::{Permission, catalog};
use crate::roles::{DefaultRole, Role};
use crate::store::{AccessStore, AccessTx};

pub use organizations::NewOrganization;
pub use roles::{NewRole, RoleDeletion, RoleDetails, RoleUpdate, SeededRoles};

/// Point-in-time view of a membership, used for audit before/after values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipSnapshot {
    pub membership_id: MembershipId,
    pub user_id: UserId,
    pub role_id: Option<RoleId>,
}

impl From<&Membership> for MembershipSnapshot {
    fn from(m: &Membership) -> Self {
        Self {
            membership_id: m.id,
            user_id: m.user_id,
            role_id: m.role_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChange {
    pub before: MembershipSnapshot,
    pub after: MembershipSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipTransfer {
    /// Previous owner after demotion.
    pub from: MembershipSnapshot,
    /// New owner.
    pub to: MembershipSnapshot,
}

pub struct MembershipService<S> {
    store: Arc<S>,
    audit: AuditRecorder,
}

impl<S> Clone for MembershipService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<S: AccessStore> MembershipService<S> {
    pub fn new(store: Arc<S>, audit: AuditRecorder) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

/// Id of the organization's seeded owner role, if seeding has run.
async fn owner_role_id<T: AccessTx>(tx: &mut T) -> Result<Option<RoleId>> {
    default_role(tx, DefaultRole::Owner).await.map(|r| r.map(|r| r.id))
}

async fn default_role<T: AccessTx>(tx: &mut T, kind: DefaultRole) -> Result<Option<Role>> {
    let role = tx.find_role_by_slug(&kind.role_slug()).await?;
    Ok(role.filter(|r| r.is_default))
}

/// Owners left in `memberships` when `excluded` no longer holds the owner role.
fn owners_excluding(memberships: &[Membership], owner: Option<RoleId>, excluded: MembershipId) -> usize {
    match owner {
        Some(owner) => memberships
            .iter()
            .filter(|m| m.id != excluded && m.role_id == Some(owner))
            .count(),
        None => 0,
    }
}

fn find_locked(memberships: &[Membership], membership_id: MembershipId) -> Result<Membership> {
    memberships
        .iter()
        .find(|m| m.id == membership_id)
        .cloned()
        .ok_or(Error::NotFound(EntityKind::Membership))
}

/// Catalog lookup for a client-supplied permission string.
fn lookup_permission(raw: &str) -> Result<Permission> {
    Permission::parse(raw)
        .ok()
        .filter(catalog::contains)
        .ok_or(Error::NotFound(EntityKind::Permission))
}

fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > 128 {
        return Err(Error::validation("name must be 1-128 characters"));
    }
    Ok(name.to_string())
}
