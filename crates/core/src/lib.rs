//! `keystone-core`: identifiers and the kernel error taxonomy.
//!
//! This crate is shared by every other crate in the workspace and carries no
//! IO or framework dependencies.

pub mod error;
pub mod id;

pub use error::{ConflictKind, ConstraintKind, EntityKind, Error, ErrorClass, Result};
pub use id::{InvitationId, MembershipId, OrganizationId, RoleId, TenantId, UserId};
