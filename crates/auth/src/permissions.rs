use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use keystone_core::Error;

/// Permission identifier of the form `resource:action` (e.g. `members:write`).
///
/// Permissions are global catalog entries; roles reference them. There is no
/// wildcard: a principal holds exactly the permissions its role grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Build a permission from a compile-time constant. No validation.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Parse and validate a `resource:action` string.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (resource, action) = raw
            .split_once(':')
            .ok_or_else(|| Error::validation(format!("permission '{raw}' must be 'resource:action'")))?;

        let valid_part = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        };

        if !valid_part(resource) || !valid_part(action) {
            return Err(Error::validation(format!(
                "permission '{raw}' must use lowercase letters, digits or '_'"
            )));
        }

        Ok(Self(Cow::Owned(raw.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resource(&self) -> &str {
        self.0.split_once(':').map(|(r, _)| r).unwrap_or(&self.0)
    }

    pub fn action(&self) -> &str {
        self.0.split_once(':').map(|(_, a)| a).unwrap_or("")
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Permission {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Permission::parse(&value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0.into_owned()
    }
}

/// The global permission catalog.
pub mod catalog {
    use super::Permission;

    pub const ORGANIZATION_READ: Permission = Permission::from_static("organization:read");
    pub const ORGANIZATION_WRITE: Permission = Permission::from_static("organization:write");
    pub const ORGANIZATION_DELETE: Permission = Permission::from_static("organization:delete");

    pub const MEMBERS_READ: Permission = Permission::from_static("members:read");
    pub const MEMBERS_WRITE: Permission = Permission::from_static("members:write");
    pub const MEMBERS_DELETE: Permission = Permission::from_static("members:delete");

    pub const ROLES_READ: Permission = Permission::from_static("roles:read");
    pub const ROLES_WRITE: Permission = Permission::from_static("roles:write");
    pub const ROLES_DELETE: Permission = Permission::from_static("roles:delete");

    pub const INVITATIONS_READ: Permission = Permission::from_static("invitations:read");
    pub const INVITATIONS_WRITE: Permission = Permission::from_static("invitations:write");
    pub const INVITATIONS_DELETE: Permission = Permission::from_static("invitations:delete");

    pub const AUDIT_LOGS_READ: Permission = Permission::from_static("audit_logs:read");

    pub const FEATURE_FLAGS_READ: Permission = Permission::from_static("feature_flags:read");
    pub const FEATURE_FLAGS_WRITE: Permission = Permission::from_static("feature_flags:write");

    pub const CONSENTS_READ: Permission = Permission::from_static("consents:read");
    pub const CONSENTS_WRITE: Permission = Permission::from_static("consents:write");

    pub const ALL: &[Permission] = &[
        ORGANIZATION_READ,
        ORGANIZATION_WRITE,
        ORGANIZATION_DELETE,
        MEMBERS_READ,
        MEMBERS_WRITE,
        MEMBERS_DELETE,
        ROLES_READ,
        ROLES_WRITE,
        ROLES_DELETE,
        INVITATIONS_READ,
        INVITATIONS_WRITE,
        INVITATIONS_DELETE,
        AUDIT_LOGS_READ,
        FEATURE_FLAGS_READ,
        FEATURE_FLAGS_WRITE,
        CONSENTS_READ,
        CONSENTS_WRITE,
    ];

    pub fn contains(permission: &Permission) -> bool {
        ALL.iter().any(|p| p == permission)
    }
}

/// Resolved set of permissions a principal holds in one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }

    /// Required permissions that are not in this set, in request order.
    pub fn missing<'a>(&self, required: &'a [Permission]) -> Vec<&'a Permission> {
        required.iter().filter(|p| !self.contains(p)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
