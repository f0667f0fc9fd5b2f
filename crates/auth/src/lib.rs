//! `keystone-auth`: the tenant-scoped RBAC authorization kernel.
//!
//! Storage and transport are reached only through the [`store::AccessStore`]
//! and [`audit::AuditSink`] traits; the HTTP layer lives in `keystone-api`.

pub mod audit;
pub mod claims;
pub mod guard;
pub mod membership;
pub mod organization;
pub mod permissions;
pub mod principal;
pub mod resolver;
pub mod roles;
pub mod service;
pub mod store;
pub mod tenant;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{Actor, AuditError, AuditRecord, AuditRecorder, AuditSink, MemoryAuditSink, TracingAuditSink, redact};
pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use guard::{AccessGrant, AccessGuard, AccessRequirements, Protected, TenantRequirement};
pub use membership::{Invitation, InvitationStatus, Membership};
pub use organization::Organization;
pub use permissions::{Permission, PermissionSet};
pub use principal::{BanState, Principal, User};
pub use resolver::PermissionResolver;
pub use roles::{DefaultRole, Role, RoleSlug, SystemRole};
pub use service::{
    MembershipService, MembershipSnapshot, NewOrganization, NewRole, OwnershipTransfer, RoleChange, RoleDeletion, RoleDetails, RoleUpdate,
    SeededRoles,
};
pub use store::memory::InMemoryAccessStore;
pub use store::{AccessStore, AccessTx, StoreError, StoreResult};
pub use tenant::{RequestContext, TenantContext, TenantContextResolver};
