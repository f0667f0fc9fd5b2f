use chrono::Utc;
use tracing::{info, instrument};

use keystone_core::{ConflictKind, EntityKind, Error, InvitationId, Result, RoleId, UserId};

use super::{MembershipService, MembershipSnapshot};
use crate::audit::{Actor, AuditRecord};
use crate::membership::{Invitation, InvitationStatus, Membership, normalize_email};
use crate::principal::Principal;
use crate::store::{AccessStore, AccessTx};
use crate::tenant::TenantContext;

fn validate_email(raw: &str) -> Result<String> {
    let email = normalize_email(raw);
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if !valid || email.len() > 254 {
        return Err(Error::validation(format!("'{raw}' is not a valid email address")));
    }
    Ok(email)
}

impl<S: AccessStore> MembershipService<S> {
    #[instrument(skip(self, tenant, email), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn create_invitation(
        &self,
        tenant: &TenantContext,
        actor: UserId,
        email: &str,
        role_id: RoleId,
    ) -> Result<Invitation> {
        let email = validate_email(email)?;
        let invitee = self.store.find_user_by_email(&email).await?;

        let mut tx = self.store.begin(tenant).await?;
        let role = tx
            .find_role(role_id)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;

        if let Some(invitee) = invitee {
            let memberships = tx.lock_memberships().await?;
            if memberships.iter().any(|m| m.user_id == invitee.id) {
                return Err(Error::Conflict(ConflictKind::Membership));
            }
        }
        if tx.find_pending_invitation(&email).await?.is_some() {
            return Err(Error::Conflict(ConflictKind::Invitation));
        }

        let invitation = Invitation {
            id: InvitationId::new(),
            organization_id: tenant.organization_id(),
            email,
            role_id: role.id,
            status: InvitationStatus::Pending,
            invited_by: actor,
            created_at: Utc::now(),
        };
        tx.insert_invitation(&invitation).await?;
        tx.commit().await?;

        info!(invitation_id = %invitation.id, role = %role.slug, "invitation created");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "invitation.created", "invitation", invitation.id)
                .in_organization(tenant.organization_id())
                .after(&invitation),
        );
        Ok(invitation)
    }

    /// Consume a pending invitation addressed to `principal`, creating the
    /// membership in the same transaction.
    #[instrument(skip(self, tenant, principal), fields(organization_id = %tenant.organization_id(), user_id = %principal.user_id()), err)]
    pub async fn accept_invitation(
        &self,
        tenant: &TenantContext,
        principal: &Principal,
        invitation_id: InvitationId,
    ) -> Result<Membership> {
        let mut tx = self.store.begin(tenant).await?;
        let invitation = tx
            .find_invitation(invitation_id)
            .await?
            .filter(|i| i.is_pending() && i.email == normalize_email(principal.email()))
            .ok_or(Error::NotFound(EntityKind::Invitation))?;
        let role = tx
            .find_role(invitation.role_id)
            .await?
            .ok_or(Error::NotFound(EntityKind::Role))?;

        let membership = Membership::new(tenant.organization_id(), principal.user_id(), Some(role.id));
        tx.insert_membership(&membership).await?;
        tx.set_invitation_status(invitation.id, InvitationStatus::Accepted)
            .await?;
        tx.commit().await?;

        info!(invitation_id = %invitation.id, membership_id = %membership.id, "invitation accepted");
        self.audit.emit(
            AuditRecord::new(
                Actor::User(principal.user_id()),
                "invitation.accepted",
                "invitation",
                invitation.id,
            )
            .in_organization(tenant.organization_id())
            .before(&invitation)
            .after(&MembershipSnapshot::from(&membership)),
        );
        Ok(membership)
    }

    #[instrument(skip(self, tenant), fields(organization_id = %tenant.organization_id()), err)]
    pub async fn revoke_invitation(
        &self,
        tenant: &TenantContext,
        actor: UserId,
        invitation_id: InvitationId,
    ) -> Result<Invitation> {
        let mut tx = self.store.begin(tenant).await?;
        let invitation = tx
            .find_invitation(invitation_id)
            .await?
            .filter(Invitation::is_pending)
            .ok_or(Error::NotFound(EntityKind::Invitation))?;

        tx.set_invitation_status(invitation.id, InvitationStatus::Revoked)
            .await?;
        tx.commit().await?;

        let revoked = Invitation {
            status: InvitationStatus::Revoked,
            ..invitation.clone()
        };
        info!(invitation_id = %invitation.id, "invitation revoked");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "invitation.revoked", "invitation", invitation.id)
                .in_organization(tenant.organization_id())
                .before(&invitation)
                .after(&revoked),
        );
        Ok(revoked)
    }

    pub async fn list_invitations(&self, tenant: &TenantContext) -> Result<Vec<Invitation>> {
        Ok(self.store.list_invitations(tenant).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn invitation_round_trip_creates_membership() {
        let fx = Fixture::new().await;
        let svc = fx.service();
        let invitee = fx.add_user("New.Hire@Example.com").await;

        let invitation = svc
            .create_invitation(&fx.tenant, fx.owner, " new.hire@example.com ", fx.roles.member)
            .await
            .unwrap();
        assert_eq!(invitation.email, "new.hire@example.com");

        let membership = svc
            .accept_invitation(&fx.tenant, &fx.principal(invitee).await, invitation.id)
            .await
            .unwrap();
        assert_eq!(membership.role_id, Some(fx.roles.member));

        let stored = svc.list_invitations(&fx.tenant).await.unwrap();
        assert_eq!(stored[0].status, InvitationStatus::Accepted);

        // Consumed invitations cannot be reused.
        let err = svc
            .accept_invitation(&fx.tenant, &fx.principal(invitee).await, invitation.id)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound(EntityKind::Invitation));
    }

    #[tokio::test]
    async fn duplicate_pending_invitation_conflicts() {
        let fx = Fixture::new().await;
        let svc = fx.service();
        svc.create_invitation(&fx.tenant, fx.owner, "a@example.com", fx.roles.viewer)
            .await
            .unwrap();

        let err = svc
            .create_invitation(&fx.tenant, fx.owner, "A@EXAMPLE.COM", fx.roles.member)
            .await
            .unwrap_err();
        assert_eq!(err, Error::Conflict(ConflictKind::Invitation));
    }

    #[tokio::test]
    async fn inviting_an_existing_member_conflicts() {
        let fx = Fixture::new().await;
        let user = fx.add_user("member@example.com").await;
        fx.add_member(user, fx.roles.member).await;

        let err = fx
            .service()
            .create_invitation(&fx.tenant, fx.owner, "member@example.com", fx.roles.admin)
            .await
            .unwrap_err();
        assert_eq!(err, Error::Conflict(ConflictKind::Membership));
    }

    #[tokio::test]
    async fn invitation_for_someone_else_is_not_found() {
        let fx = Fixture::new().await;
        let svc = fx.service();
        let intruder = fx.add_user("intruder@example.com").await;
        let invitation = svc
            .create_invitation(&fx.tenant, fx.owner, "invitee@example.com", fx.roles.admin)
            .await
            .unwrap();

        let err = svc
            .accept_invitation(&fx.tenant, &fx.principal(intruder).await, invitation.id)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound(EntityKind::Invitation));
    }

    #[tokio::test]
    async fn revoked_invitation_cannot_be_accepted_or_revoked_again() {
        let fx = Fixture::new().await;
        let svc = fx.service();
        let invitee = fx.add_user("late@example.com").await;
        let invitation = svc
            .create_invitation(&fx.tenant, fx.owner, "late@example.com", fx.roles.viewer)
            .await
            .unwrap();

        let revoked = svc.revoke_invitation(&fx.tenant, fx.owner, invitation.id).await.unwrap();
        assert_eq!(revoked.status, InvitationStatus::Revoked);

        let err = svc
            .accept_invitation(&fx.tenant, &fx.principal(invitee).await, invitation.id)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound(EntityKind::Invitation));
        let err = svc
            .revoke_invitation(&fx.tenant, fx.owner, invitation.id)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound(EntityKind::Invitation));

        // A fresh invitation is allowed once the old one is no longer pending.
        svc.create_invitation(&fx.tenant, fx.owner, "late@example.com", fx.roles.viewer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_email_is_a_validation_error() {
        let fx = Fixture::new().await;
        for bad in ["", "no-at-sign", "@example.com", "a@localhost"] {
            let err = fx
                .service()
                .create_invitation(&fx.tenant, fx.owner, bad, fx.roles.viewer)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad:?}");
        }
    }
}
