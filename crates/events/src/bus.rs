//! Publish/subscribe seam between tenant provisioning and its consumers.
//!
//! Consumers run as tokio tasks and must be idempotent: a `TenantCreated`
//! may arrive more than once, and ordering across publishers is not defined.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

/// Receiving end handed to one consumer. It sees every message published
/// after it was created.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Next message, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }
}

/// Publishing is synchronous; errors go back to the publisher, which decides
/// whether the originating request fails.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        B::publish(self, message)
    }

    fn subscribe(&self) -> Subscription<M> {
        B::subscribe(self)
    }
}
