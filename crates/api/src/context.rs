use std::sync::Arc;

use uuid::Uuid;

use keystone_auth::RequestContext;

/// Per-request authentication state, shared with handlers as an extension.
pub type RequestScope = Arc<RequestContext>;

/// Identifier attached to every request, returned in the `x-correlation-id`
/// header and in error bodies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
