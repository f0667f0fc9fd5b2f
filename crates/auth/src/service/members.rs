use tracing::{info, instrument};

use keystone_core::{ConstraintKind, EntityKind, Error, MembershipId, Result, RoleId, UserId};

use super::{
    MembershipService, MembershipSnapshot, OwnershipTransfer, RoleChange, default_role, find_locked,
    owner_role_id, owners_excluding,
};
use crate::audit::{Actor, AuditRecord};
use crate::membership::Membership;
use crate::roles::DefaultRole;
use crate::store::{AccessStore, AccessTx};
use crate::tenant::TenantContext;

impl<S: AccessStore> MembershipService<S> {
    /// Assign `role_id` to the membership.
    ///
    /// Rejects self-changes and any change that would leave the organization
    /// without an owner.
    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn change_member_role(
        &self,
        tenant: &TenantContext,
        actor: UserId,
        membership_id: MembershipId,
        role_id: RoleId,
    ) -> Result<RoleChange> {
        let mut tx = self.store.begin(tenant).await?;
        let memberships = tx.lock_memberships().await?;

        let target = find_locked(&memberships, membership_id)?;
        let role = tx
            .find_role(role_id)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;
        if target.user_id == actor {
            return Err(Error::Constraint(ConstraintKind::SelfRoleChange));
        }

        let owner = owner_role_id(&mut tx).await?;
        let loses_owner = owner.is_some() && target.role_id == owner && Some(role.id) != owner;
        if loses_owner && owners_excluding(&memberships, owner, target.id) == 0 {
            return Err(Error::Constraint(ConstraintKind::LastOwner));
        }

        tx.set_membership_role(target.id, role.id).await?;
        tx.commit().await?;

        let before = MembershipSnapshot::from(&target);
        let after = MembershipSnapshot {
            role_id: Some(role.id),
            ..before.clone()
        };
        info!(membership_id = %target.id, role = %role.slug, "member role changed");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "member.role_changed", "membership", target.id)
                .in_organization(tenant.organization_id())
                .before(&before)
                .after(&after),
        );
        Ok(RoleChange { before, after })
    }

    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn remove_member(
        &self,
        tenant: &TenantContext,
        actor: UserId,
        membership_id: MembershipId,
    ) -> Result<MembershipSnapshot> {
        let mut tx = self.store.begin(tenant).await?;
        let memberships = tx.lock_memberships().await?;

        let target = find_locked(&memberships, membership_id)?;
        if target.user_id == actor {
            return Err(Error::Constraint(ConstraintKind::SelfRemoval));
        }

        let owner = owner_role_id(&mut tx).await?;
        if owner.is_some() && target.role_id == owner && owners_excluding(&memberships, owner, target.id) == 0 {
            return Err(Error::Constraint(ConstraintKind::LastOwner));
        }

        tx.delete_membership(target.id).await?;
        tx.commit().await?;

        let before = MembershipSnapshot::from(&target);
        info!(membership_id = %target.id, user_id = %target.user_id, "member removed");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "member.removed", "membership", target.id)
                .in_organization(tenant.organization_id())
                .before(&before),
        );
        Ok(before)
    }

    /// Promote `to` to owner and demote `from` to `demote_to` (the default
    /// `admin` role when `None`), in one transaction. `from` must be the
    /// actor's own owner membership.
    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn transfer_ownership(
        &self,
        tenant: &TenantContext,
        actor: UserId,
        from: MembershipId,
        to: MembershipId,
        demote_to: Option<RoleId>,
    ) -> Result<OwnershipTransfer> {
        let mut tx = self.store.begin(tenant).await?;
        let memberships = tx.lock_memberships().await?;

        let source = find_locked(&memberships, from)?;
        let owner = owner_role_id(&mut tx).await?;
        // Only the owner holding `from` may hand it away.
        let Some(owner) = owner.filter(|id| source.role_id == Some(*id) && source.user_id == actor) else {
            return Err(Error::Constraint(ConstraintKind::SourceNotOwner));
        };
        if from == to {
            return Err(Error::Constraint(ConstraintKind::SelfAction));
        }
        let target = memberships
            .iter()
            .find(|m| m.id == to)
            .cloned()
            .ok_or(Error::Constraint(ConstraintKind::TransferTargetNotMember))?;

        let demote_role = match demote_to {
            Some(role_id) => tx.find_role(role_id).await?,
            None => default_role(&mut tx, DefaultRole::Admin).await?,
        }
        .ok_or(Error::NotFound(EntityKind::Role))?;

        tx.set_membership_role(target.id, owner).await?;
        tx.set_membership_role(source.id, demote_role.id).await?;
        tx.commit().await?;

        let before = OwnershipTransfer {
            from: MembershipSnapshot::from(&source),
            to: MembershipSnapshot::from(&target),
        };
        let after = OwnershipTransfer {
            from: MembershipSnapshot {
                role_id: Some(demote_role.id),
                ..before.from.clone()
            },
            to: MembershipSnapshot {
                role_id: Some(owner),
                ..before.to.clone()
            },
        };
        info!(from = %source.user_id, to = %target.user_id, demoted_to = %demote_role.slug, "ownership transferred");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "ownership.transferred", "membership", target.id)
                .in_organization(tenant.organization_id())
                .before(&before)
                .after(&after),
        );
        Ok(after)
    }

    /// Add an existing user to the organization with `role_id`.
    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn add_member(
        &self,
        tenant: &TenantContext,
        actor: Actor,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<Membership> {
        match self.store.find_user(user_id).await? {
            Some(user) if !user.is_deleted() => {}
            _ => return Err(Error::NotFound(EntityKind::User)),
        }

        let mut tx = self.store.begin(tenant).await?;
        let role = tx
            .find_role(role_id)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;

        let membership = Membership::new(tenant.organization_id(), user_id, Some(role.id));
        tx.insert_membership(&membership).await?;
        tx.commit().await?;

        info!(user_id = %user_id, role = %role.slug, "member added");
        self.audit.emit(
            AuditRecord::new(actor, "member.added", "membership", membership.id)
                .in_organization(tenant.organization_id())
                .after(&MembershipSnapshot::from(&membership)),
        );
        Ok(membership)
    }

    /// Make `user_id` an owner of a freshly provisioned organization.
    ///
    /// Safe to repeat: an existing membership without a role gets the owner
    /// role, one that already has a role is left alone.
    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn assign_creator_as_owner(&self, tenant: &TenantContext, user_id: UserId) -> Result<Membership> {
        let mut tx = self.store.begin(tenant).await?;
        let memberships = tx.lock_memberships().await?;
        let owner = owner_role_id(&mut tx)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;

        let membership = match memberships.into_iter().find(|m| m.user_id == user_id) {
            Some(existing) if existing.role_id.is_some() => return Ok(existing),
            Some(mut pending) => {
                tx.set_membership_role(pending.id, owner).await?;
                pending.role_id = Some(owner);
                pending
            }
            None => {
                let membership = Membership::new(tenant.organization_id(), user_id, Some(owner));
                tx.insert_membership(&membership).await?;
                membership
            }
        };
        tx.commit().await?;

        info!(user_id = %user_id, "creator assigned as owner");
        self.audit.emit(
            AuditRecord::new(Actor::System, "member.added", "membership", membership.id)
                .in_organization(tenant.organization_id())
                .after(&MembershipSnapshot::from(&membership)),
        );
        Ok(membership)
    }

    pub async fn list_members(&self, tenant: &TenantContext) -> Result<Vec<Membership>> {
        Ok(self.store.list_memberships(tenant).await?)
    }
}
