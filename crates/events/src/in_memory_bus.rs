//! Process-local fan-out bus used by the API binary and tests.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("subscriber registry lock poisoned")]
    Poisoned,
}

/// Broadcasts every published message to all live subscriptions.
///
/// Delivery is at-least-once from the consumer's point of view; nothing is
/// persisted, so messages published while no one is subscribed are lost.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<UnboundedSender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Live subscriptions as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        // A failed send means the subscription was dropped.
        senders.retain(|sender| sender.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (sender, receiver) = mpsc::unbounded_channel();
        match self.senders.lock() {
            Ok(mut senders) => senders.push(sender),
            Err(poisoned) => poisoned.into_inner().push(sender),
        }
        Subscription::new(receiver)
    }
}

#[cfg(test)]
mod tests {
    use keystone_core::{OrganizationId, TenantId, UserId};

    use super::*;
    use crate::{EventEnvelope, OrganizationEvent, TenantCreated};

    type Bus = InMemoryEventBus<EventEnvelope<OrganizationEvent>>;

    fn created() -> EventEnvelope<OrganizationEvent> {
        let org = OrganizationId::new();
        let event = OrganizationEvent::from(TenantCreated::new(org, UserId::new()));
        EventEnvelope::wrap(TenantId::from(org), event)
    }

    #[tokio::test]
    async fn each_subscription_sees_every_event() {
        let bus = Bus::new();
        let mut seeding = bus.subscribe();
        let mut audit = bus.subscribe();

        let envelope = created();
        bus.publish(envelope.clone()).unwrap();

        assert_eq!(seeding.recv().await, Some(envelope.clone()));
        assert_eq!(audit.recv().await, Some(envelope));
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_forgotten() {
        let bus = Bus::new();
        let gone = bus.subscribe();
        let mut live = bus.subscribe();
        drop(gone);

        let envelope = created();
        bus.publish(envelope.clone()).unwrap();

        assert_eq!(live.recv().await.map(|e| e.event_id()), Some(envelope.event_id()));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = Bus::new();
        assert!(bus.publish(created()).is_ok());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
