use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::{InvitationId, MembershipId, OrganizationId, RoleId, UserId};

/// Join between a user and an organization.
///
/// `role_id` is `None` only while default-role seeding has not completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role_id: Option<RoleId>,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(organization_id: OrganizationId, user_id: UserId, role_id: Option<RoleId>) -> Self {
        Self {
            id: MembershipId::new(),
            organization_id,
            user_id,
            role_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Revoked => "revoked",
        }
    }
}

impl core::str::FromStr for InvitationStatus {
    type Err = keystone_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "revoked" => Ok(InvitationStatus::Revoked),
            other => Err(keystone_core::Error::validation(format!(
                "unknown invitation status '{other}'"
            ))),
        }
    }
}

/// Pending offer to join an organization, keyed by (organization, email).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    pub organization_id: OrganizationId,
    /// Always normalized with [`normalize_email`].
    pub email: String,
    pub role_id: RoleId,
    pub status: InvitationStatus,
    pub invited_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
