//! Access requirements of every API operation.
//!
//! Handlers call [`authorize`] first; the guard evaluates the requirements
//! declared here before any service code runs.

use tracing::debug;

use keystone_auth::permissions::catalog;
use keystone_auth::{AccessGrant, AccessGuard, AccessRequirements, AccessStore, Protected, RequestContext, SystemRole};
use keystone_core::Result;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    ReadOwnPermissions,
    CreateOrganization,
    ListMembers,
    AddMember,
    ChangeMemberRole,
    RemoveMember,
    TransferOwnership,
    ListRoles,
    CreateRole,
    UpdateRole,
    DeleteRole,
    ListInvitations,
    CreateInvitation,
    RevokeInvitation,
    AcceptInvitation,
    AdminListMembers,
}

impl Protected for Operation {
    fn requirements(&self) -> AccessRequirements {
        let base = AccessRequirements::new();
        match self {
            // Invitees are not members yet; only the tenant context is needed.
            Operation::ReadOwnPermissions | Operation::AcceptInvitation => base,
            Operation::CreateOrganization => base.cross_tenant(),
            Operation::ListMembers => base.require_permission(catalog::MEMBERS_READ),
            Operation::AddMember | Operation::ChangeMemberRole => base.require_permission(catalog::MEMBERS_WRITE),
            Operation::RemoveMember => base.require_permission(catalog::MEMBERS_DELETE),
            Operation::TransferOwnership => {
                base.require_permissions([catalog::MEMBERS_WRITE, catalog::ORGANIZATION_WRITE])
            }
            Operation::ListRoles => base.require_permission(catalog::ROLES_READ),
            Operation::CreateRole | Operation::UpdateRole => base.require_permission(catalog::ROLES_WRITE),
            Operation::DeleteRole => base.require_permission(catalog::ROLES_DELETE),
            Operation::ListInvitations => base.require_permission(catalog::INVITATIONS_READ),
            Operation::CreateInvitation => base.require_permission(catalog::INVITATIONS_WRITE),
            Operation::RevokeInvitation => base.require_permission(catalog::INVITATIONS_DELETE),
            Operation::AdminListMembers => base.require_role(SystemRole::Superadmin).cross_tenant(),
        }
    }
}

pub async fn authorize<S: AccessStore>(
    guard: &AccessGuard<S>,
    request: &RequestContext,
    operation: Operation,
) -> Result<AccessGrant> {
    debug!(?operation, "authorizing");
    guard.authorize(request, &operation).await
}

#[cfg(test)]
mod tests {
    use keystone_auth::TenantRequirement;

    use super::*;

    #[test]
    fn admin_route_is_superadmin_only_and_cross_tenant() {
        let req = Operation::AdminListMembers.requirements();
        assert_eq!(req.required_roles(), &[SystemRole::Superadmin]);
        assert_eq!(req.tenant(), TenantRequirement::CrossTenant);
        assert!(req.required_permissions().is_empty());
    }

    #[test]
    fn mutations_require_write_or_delete_permissions() {
        assert_eq!(
            Operation::RemoveMember.requirements().required_permissions(),
            &[catalog::MEMBERS_DELETE]
        );
        assert_eq!(
            Operation::TransferOwnership.requirements().required_permissions(),
            &[catalog::MEMBERS_WRITE, catalog::ORGANIZATION_WRITE]
        );
        assert_eq!(
            Operation::DeleteRole.requirements().required_permissions(),
            &[catalog::ROLES_DELETE]
        );
    }

    #[test]
    fn accepting_an_invitation_needs_only_a_tenant() {
        let req = Operation::AcceptInvitation.requirements();
        assert!(req.required_permissions().is_empty());
        assert_eq!(req.tenant(), TenantRequirement::Required);
    }
}
