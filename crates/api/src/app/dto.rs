use serde::{Deserialize, Serialize};

use keystone_auth::PermissionSet;
use keystone_core::{MembershipId, OrganizationId, RoleId, TenantId, UserId};

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: UserId,
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub from_membership_id: MembershipId,
    pub to_membership_id: MembershipId,
    /// Role for the previous owner; `admin` when omitted.
    #[serde(default)]
    pub demote_to_role_id: Option<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub role_id: RoleId,
}

#[derive(Debug, Serialize)]
pub struct MyPermissionsResponse {
    pub user_id: UserId,
    pub system_role: &'static str,
    pub tenant_id: TenantId,
    pub organization_id: OrganizationId,
    pub permissions: PermissionSet,
}
