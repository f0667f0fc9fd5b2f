use chrono::{DateTime, Utc};

/// A fact published on the bus. Consumers must tolerate redelivery.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name used for routing and logs, e.g. `organization.tenant_created`.
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;
}
