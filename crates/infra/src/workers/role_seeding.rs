//! Seeds default roles when a tenant is created.

use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use keystone_auth::{AccessStore, MembershipService, SeededRoles, TenantContextResolver};
use keystone_core::ErrorClass;
use keystone_events::{EventBus, EventEnvelope, OrganizationEvent, Subscription, TenantCreated};

use super::WorkerHandle;

/// Bounded exponential backoff for provisioning that hit a store outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Consumes `TenantCreated` and prepares the new organization:
/// seeds the four default roles, then makes the creator an owner.
///
/// Both steps are idempotent, so redelivered events are harmless and a
/// store outage is retried per [`RetryPolicy`].
pub struct RoleSeedingWorker<S> {
    tenants: TenantContextResolver<S>,
    service: MembershipService<S>,
    retry: RetryPolicy,
}

impl<S: AccessStore> RoleSeedingWorker<S> {
    pub fn new(tenants: TenantContextResolver<S>, service: MembershipService<S>) -> Self {
        Self {
            tenants,
            service,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Subscribe to `bus` and process events on a tokio task.
    pub fn spawn<B>(self, bus: &B) -> WorkerHandle
    where
        B: EventBus<EventEnvelope<OrganizationEvent>>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sub = bus.subscribe();
        let join = tokio::spawn(self.run(sub, shutdown_rx));
        WorkerHandle::new(shutdown_tx, join)
    }

    async fn run(self, mut sub: Subscription<EventEnvelope<OrganizationEvent>>, mut shutdown: watch::Receiver<bool>) {
        info!(worker = "role_seeding", "worker started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                msg = sub.recv() => {
                    let Some(envelope) = msg else { break };
                    let event_id = envelope.event_id();
                    let tenant_id = envelope.tenant_id();
                    debug!(worker = "role_seeding", %event_id, event_type = envelope.event_type(), "event received");
                    if let Err(err) = self.handle(envelope.into_payload()).await {
                        warn!(worker = "role_seeding", %event_id, %tenant_id, error = ?err, "role seeding failed");
                    }
                }
            }
        }
        info!(worker = "role_seeding", "worker stopped");
    }

    async fn handle(&self, event: OrganizationEvent) -> anyhow::Result<()> {
        match event {
            OrganizationEvent::TenantCreated(created) => self.on_tenant_created(created).await,
        }
    }

    async fn on_tenant_created(&self, event: TenantCreated) -> anyhow::Result<()> {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 1;
        let roles = loop {
            match self.prepare(&event).await {
                Ok(roles) => break roles,
                Err(err) if err.class() == ErrorClass::Unavailable && attempt < self.retry.max_attempts => {
                    warn!(
                        organization_id = %event.organization_id,
                        attempt,
                        ?delay,
                        error = %err,
                        "organization provisioning failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.class() == ErrorClass::Unavailable {
                        error!(organization_id = %event.organization_id, attempt, "organization provisioning gave up");
                    }
                    return Err(err).with_context(|| format!("preparing organization {}", event.organization_id));
                }
            }
        };

        info!(
            organization_id = %event.organization_id,
            creator_id = %event.creator_id,
            owner_role = %roles.owner,
            attempt,
            "organization prepared"
        );
        Ok(())
    }

    async fn prepare(&self, event: &TenantCreated) -> keystone_core::Result<SeededRoles> {
        let tenant = self.tenants.resolve_organization(event.organization_id).await?;
        let roles = self.service.seed_default_roles(&tenant).await?;
        self.service.assign_creator_as_owner(&tenant, event.creator_id).await?;
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use keystone_auth::{AuditRecorder, DefaultRole, InMemoryAccessStore, MemoryAuditSink, Organization, TenantContext, User};
    use keystone_events::InMemoryEventBus;

    use super::*;

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn tenant_created_seeds_roles_and_owner_once() {
        let store = Arc::new(InMemoryAccessStore::new());
        let org = Organization::new("Acme", "acme");
        store.put_organization(org.clone()).await;
        let creator = User::new("founder@example.com", "Founder");
        store.put_user(creator.clone()).await;

        let (recorder, _audit) = AuditRecorder::spawn(Arc::new(MemoryAuditSink::new()), 16);
        let service = MembershipService::new(store.clone(), recorder);
        let worker = RoleSeedingWorker::new(TenantContextResolver::new(store.clone()), service.clone());

        let bus = InMemoryEventBus::<EventEnvelope<OrganizationEvent>>::new();
        let handle = worker.spawn(&bus);

        let event: OrganizationEvent = TenantCreated::new(org.id, creator.id).into();
        bus.publish(EventEnvelope::wrap(org.id.into(), event.clone())).unwrap();
        // Redelivery must not duplicate anything.
        bus.publish(EventEnvelope::wrap(org.id.into(), event)).unwrap();

        let tenant = TenantContext::top_level(org.id);
        wait_for(|| {
            let store = store.clone();
            async move {
                store
                    .find_membership_by_user(&tenant, creator.id)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|m| m.role_id.is_some())
            }
        })
        .await;
        handle.shutdown().await;

        assert_eq!(store.role_count(org.id).await, DefaultRole::ALL.len());
        let roles = service.list_roles(&tenant).await.unwrap();
        let owner = roles.iter().find(|r| r.role.is_owner()).unwrap();
        let membership = store.find_membership_by_user(&tenant, creator.id).await.unwrap().unwrap();
        assert_eq!(membership.role_id, Some(owner.role.id));
        assert_eq!(store.list_memberships(&tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_outage_during_provisioning_is_retried_until_the_owner_exists() {
        let store = Arc::new(InMemoryAccessStore::new());
        let org = Organization::new("Acme", "acme");
        store.put_organization(org.clone()).await;
        let creator = User::new("founder@example.com", "Founder");
        store.put_user(creator.clone()).await;

        let (recorder, _audit) = AuditRecorder::spawn(Arc::new(MemoryAuditSink::new()), 16);
        let service = MembershipService::new(store.clone(), recorder);
        let worker = RoleSeedingWorker::new(TenantContextResolver::new(store.clone()), service).with_retry(RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        });

        let bus = InMemoryEventBus::<EventEnvelope<OrganizationEvent>>::new();
        let handle = worker.spawn(&bus);

        store.set_unavailable(true);
        let event: OrganizationEvent = TenantCreated::new(org.id, creator.id).into();
        bus.publish(EventEnvelope::wrap(org.id.into(), event)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_unavailable(false);

        let tenant = TenantContext::top_level(org.id);
        wait_for(|| {
            let store = store.clone();
            async move {
                store
                    .find_membership_by_user(&tenant, creator.id)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|m| m.role_id.is_some())
            }
        })
        .await;
        handle.shutdown().await;

        assert_eq!(store.role_count(org.id).await, DefaultRole::ALL.len());
        assert_eq!(store.list_memberships(&tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_organization_is_logged_and_skipped() {
        let store = Arc::new(InMemoryAccessStore::new());
        let (recorder, _audit) = AuditRecorder::spawn(Arc::new(MemoryAuditSink::new()), 16);
        let service = MembershipService::new(store.clone(), recorder);
        let worker = RoleSeedingWorker::new(TenantContextResolver::new(store.clone()), service);

        let bus = InMemoryEventBus::<EventEnvelope<OrganizationEvent>>::new();
        let handle = worker.spawn(&bus);

        let missing = Organization::new("Ghost", "ghost");
        let event: OrganizationEvent = TenantCreated::new(missing.id, keystone_core::UserId::new()).into();
        bus.publish(EventEnvelope::wrap(missing.id.into(), event)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.shutdown().await;
        assert_eq!(store.role_count(missing.id).await, 0);
    }
}
