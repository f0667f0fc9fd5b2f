use serde::{Deserialize, Serialize};

use keystone_core::{Error, OrganizationId, RoleId};

use crate::permissions::{Permission, catalog};

/// System-level role of a user (global, not tenant-scoped).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    #[default]
    User,
    Superadmin,
}

impl SystemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemRole::User => "user",
            SystemRole::Superadmin => "superadmin",
        }
    }
}

impl core::str::FromStr for SystemRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SystemRole::User),
            "superadmin" => Ok(SystemRole::Superadmin),
            other => Err(Error::validation(format!("unknown system role '{other}'"))),
        }
    }
}

/// Role slug, unique within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleSlug(String);

impl RoleSlug {
    pub const MAX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self, Error> {
        let valid_chars = raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        let starts_alnum = raw
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());

        if raw.is_empty() || raw.len() > Self::MAX_LEN || !valid_chars || !starts_alnum {
            return Err(Error::validation(format!(
                "role slug '{raw}' must be 1-{} chars of a-z, 0-9, '-' or '_'",
                Self::MAX_LEN
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the slug belongs to one of the seeded default roles.
    pub fn is_reserved(&self) -> bool {
        DefaultRole::from_slug(&self.0).is_some()
    }
}

impl core::fmt::Display for RoleSlug {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoleSlug {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoleSlug::parse(&value)
    }
}

impl From<RoleSlug> for String {
    fn from(value: RoleSlug) -> Self {
        value.0
    }
}

/// The four roles seeded identically into every organization.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl DefaultRole {
    pub const ALL: [DefaultRole; 4] = [
        DefaultRole::Owner,
        DefaultRole::Admin,
        DefaultRole::Member,
        DefaultRole::Viewer,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            DefaultRole::Owner => "owner",
            DefaultRole::Admin => "admin",
            DefaultRole::Member => "member",
            DefaultRole::Viewer => "viewer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DefaultRole::Owner => "Owner",
            DefaultRole::Admin => "Admin",
            DefaultRole::Member => "Member",
            DefaultRole::Viewer => "Viewer",
        }
    }

    pub fn role_slug(&self) -> RoleSlug {
        RoleSlug(self.slug().to_string())
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.slug() == slug)
    }

    /// Fixed permission set granted by this role.
    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            DefaultRole::Owner => catalog::ALL.to_vec(),
            DefaultRole::Admin => catalog::ALL
                .iter()
                .filter(|p| **p != catalog::ORGANIZATION_DELETE)
                .cloned()
                .collect(),
            DefaultRole::Member => vec![
                catalog::ORGANIZATION_READ,
                catalog::MEMBERS_READ,
                catalog::ROLES_READ,
                catalog::INVITATIONS_READ,
                catalog::FEATURE_FLAGS_READ,
                catalog::CONSENTS_READ,
                catalog::CONSENTS_WRITE,
            ],
            DefaultRole::Viewer => vec![
                catalog::ORGANIZATION_READ,
                catalog::MEMBERS_READ,
                catalog::ROLES_READ,
            ],
        }
    }
}

/// Organization-scoped role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub slug: RoleSlug,
    pub is_default: bool,
}

impl Role {
    /// A fresh default role row for `organization_id`.
    pub fn seeded(organization_id: OrganizationId, kind: DefaultRole) -> Self {
        Self {
            id: RoleId::new(),
            organization_id,
            name: kind.display_name().to_string(),
            slug: kind.role_slug(),
            is_default: true,
        }
    }

    /// Which default role this is, if any.
    pub fn default_kind(&self) -> Option<DefaultRole> {
        if self.is_default {
            DefaultRole::from_slug(self.slug.as_str())
        } else {
            None
        }
    }

    pub fn is_owner(&self) -> bool {
        self.default_kind() == Some(DefaultRole::Owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert!(RoleSlug::parse("billing-admin").is_ok());
        assert!(RoleSlug::parse("ops_2").is_ok());
        for bad in ["", "-lead", "Admin", "has space", "x".repeat(65).as_str()] {
            assert!(RoleSlug::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn default_slugs_are_reserved() {
        for role in DefaultRole::ALL {
            assert!(RoleSlug::parse(role.slug()).unwrap().is_reserved());
        }
        assert!(!RoleSlug::parse("auditor").unwrap().is_reserved());
    }

    #[test]
    fn default_permission_sets_are_nested() {
        let owner = DefaultRole::Owner.permissions();
        let admin = DefaultRole::Admin.permissions();
        let member = DefaultRole::Member.permissions();
        let viewer = DefaultRole::Viewer.permissions();

        assert!(admin.iter().all(|p| owner.contains(p)));
        assert!(member.iter().all(|p| admin.contains(p)));
        assert!(viewer.iter().all(|p| member.contains(p)));
        assert!(!admin.contains(&catalog::ORGANIZATION_DELETE));
        assert!(owner.contains(&catalog::ORGANIZATION_DELETE));
    }

    #[test]
    fn custom_role_with_owner_slug_is_not_owner() {
        let mut role = Role::seeded(OrganizationId::new(), DefaultRole::Owner);
        assert!(role.is_owner());
        role.is_default = false;
        assert!(!role.is_owner());
    }
}
