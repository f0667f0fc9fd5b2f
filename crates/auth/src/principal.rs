use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::{Error, UserId};

use crate::roles::SystemRole;

/// Ban state of a user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanState {
    pub banned: bool,
    pub reason: Option<String>,
    /// `None` means the ban does not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl BanState {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.banned && self.expires_at.is_none_or(|until| now < until)
    }
}

/// Global user identity. Users are not tenant-scoped; memberships link them
/// to organizations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub system_role: SystemRole,
    pub ban: BanState,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: crate::membership::normalize_email(&email.into()),
            display_name: display_name.into(),
            system_role: SystemRole::User,
            ban: BanState::default(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// An authenticated identity acting on a request.
///
/// Only users that are neither banned nor soft-deleted become principals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    user_id: UserId,
    email: String,
    system_role: SystemRole,
}

impl Principal {
    pub fn authenticate(user: &User, now: DateTime<Utc>) -> Result<Self, Error> {
        if user.is_deleted() || user.ban.is_active(now) {
            return Err(Error::Unauthenticated);
        }
        Ok(Self {
            user_id: user.id,
            email: user.email.clone(),
            system_role: user.system_role,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn system_role(&self) -> SystemRole {
        self.system_role
    }
}
