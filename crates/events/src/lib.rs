//! `keystone-events`: signals travelling between tenant provisioning and the
//! authorization kernel.
//!
//! The only cross-boundary signal today is [`TenantCreated`], consumed by the
//! role seeding worker.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod organization;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use organization::{OrganizationEvent, TenantCreated};
