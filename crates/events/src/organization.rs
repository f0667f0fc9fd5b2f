//! Organization lifecycle events emitted by tenant provisioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::{OrganizationId, UserId};

use crate::Event;

/// A new organization was provisioned.
///
/// Consumers seed the default roles for `organization_id` and make
/// `creator_id` its first owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCreated {
    pub organization_id: OrganizationId,
    pub creator_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl TenantCreated {
    pub fn new(organization_id: OrganizationId, creator_id: UserId) -> Self {
        Self {
            organization_id,
            creator_id,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrganizationEvent {
    TenantCreated(TenantCreated),
}

impl Event for OrganizationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrganizationEvent::TenantCreated(_) => "organization.tenant_created",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrganizationEvent::TenantCreated(e) => e.occurred_at,
        }
    }
}

impl From<TenantCreated> for OrganizationEvent {
    fn from(value: TenantCreated) -> Self {
        OrganizationEvent::TenantCreated(value)
    }
}
