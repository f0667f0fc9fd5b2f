use std::sync::Arc;

use tracing::error;

use keystone_auth::{AccessGuard, AccessStore, AuditRecorder, MembershipService, Organization};
use keystone_core::{Error, TenantId, UserId};
use keystone_events::{EventBus, EventEnvelope, InMemoryEventBus, OrganizationEvent, TenantCreated};

pub type OrganizationBus = InMemoryEventBus<EventEnvelope<OrganizationEvent>>;

/// Kernel services shared by all handlers.
pub struct AppServices<S> {
    pub guard: AccessGuard<S>,
    pub members: MembershipService<S>,
    pub events: Arc<OrganizationBus>,
    store: Arc<S>,
}

impl<S: AccessStore> AppServices<S> {
    pub fn new(store: Arc<S>, audit: AuditRecorder) -> Self {
        Self {
            guard: AccessGuard::new(store.clone()),
            members: MembershipService::new(store.clone(), audit),
            events: Arc::new(OrganizationBus::new()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Announce a new organization so its default roles and owner get provisioned.
    pub fn publish_created(&self, tenant_id: TenantId, organization: &Organization, creator: UserId) -> Result<(), Error> {
        let event = OrganizationEvent::from(TenantCreated::new(organization.id, creator));
        self.events
            .publish(EventEnvelope::wrap(tenant_id, event))
            .map_err(|e| {
                error!(organization_id = %organization.id, error = ?e, "failed to publish TenantCreated");
                Error::unavailable("event bus unavailable")
            })
    }
}
