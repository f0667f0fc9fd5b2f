use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::{Error, OrganizationId};

/// Maximum number of levels in an organization hierarchy (tenant included).
pub const MAX_HIERARCHY_DEPTH: usize = 3;

/// A node in the organization hierarchy. Top-level organizations are tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Unique system-wide.
    pub slug: String,
    pub parent_id: Option<OrganizationId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub purge_scheduled_at: Option<DateTime<Utc>>,
}

impl Organization {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: OrganizationId::new(),
            name: name.into(),
            slug: slug.into(),
            parent_id: None,
            deleted_at: None,
            purge_scheduled_at: None,
        }
    }

    pub fn child_of(mut self, parent: OrganizationId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Normalize and check an organization slug: 1-64 chars of `a-z`, `0-9`
    /// and `-`, not starting or ending with `-`.
    pub fn validate_slug(raw: &str) -> Result<String, Error> {
        let slug = raw.trim().to_ascii_lowercase();
        let valid = !slug.is_empty()
            && slug.len() <= 64
            && !slug.starts_with('-')
            && !slug.ends_with('-')
            && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(Error::validation(format!("organization slug '{raw}' is invalid")));
        }
        Ok(slug)
    }
}
