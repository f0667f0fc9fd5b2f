//! Kernel error model.
//!
//! One taxonomy for every failure the authorization kernel can report. Each
//! variant carries a stable machine-readable code (see [`Error::code`]) so
//! callers branch on semantics rather than on message text.

use thiserror::Error;

/// Result type used across the kernel.
pub type Result<T> = core::result::Result<T, Error>;

/// Entity referenced by a [`Error::NotFound`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Membership,
    Role,
    Tenant,
    User,
    Invitation,
    Permission,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Membership => "membership",
            EntityKind::Role => "role",
            EntityKind::Tenant => "tenant",
            EntityKind::User => "user",
            EntityKind::Invitation => "invitation",
            EntityKind::Permission => "permission",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniqueness invariant reported by a [`Error::Conflict`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Role slug already used within the organization.
    Slug,
    /// A pending invitation already exists for (organization, email).
    Invitation,
    /// The user is already a member of the organization.
    Membership,
}

impl core::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConflictKind::Slug => f.write_str("role slug already exists in this organization"),
            ConflictKind::Invitation => f.write_str("a pending invitation already exists for this email"),
            ConflictKind::Membership => f.write_str("user is already a member of this organization"),
        }
    }
}

/// Domain invariant reported by a [`Error::Constraint`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// The organization would be left without an owner.
    LastOwner,
    /// Default roles cannot be deleted, re-slugged or re-permissioned.
    DefaultRole,
    /// An operation whose source and target are the same member.
    SelfAction,
    SelfRemoval,
    SelfRoleChange,
    TransferTargetNotMember,
    /// Ownership can only be transferred away from a current owner.
    SourceNotOwner,
    /// Organization ancestry is deeper than allowed or cyclic.
    HierarchyDepth,
}

impl ConstraintKind {
    pub fn code(&self) -> &'static str {
        match self {
            ConstraintKind::LastOwner => "last_owner",
            ConstraintKind::DefaultRole => "default_role",
            ConstraintKind::SelfAction => "self_action",
            ConstraintKind::SelfRemoval => "self_removal",
            ConstraintKind::SelfRoleChange => "self_role_change",
            ConstraintKind::TransferTargetNotMember => "transfer_target_not_member",
            ConstraintKind::SourceNotOwner => "source_not_owner",
            ConstraintKind::HierarchyDepth => "hierarchy_depth_exceeded",
        }
    }
}

impl core::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ConstraintKind::LastOwner => "organization must retain at least one owner",
            ConstraintKind::DefaultRole => "default roles cannot be deleted or redefined",
            ConstraintKind::SelfAction => "source and target member must differ",
            ConstraintKind::SelfRemoval => "members cannot remove themselves",
            ConstraintKind::SelfRoleChange => "members cannot change their own role",
            ConstraintKind::TransferTargetNotMember => "transfer target is not a member of this organization",
            ConstraintKind::SourceNotOwner => "ownership can only be transferred by an owner membership",
            ConstraintKind::HierarchyDepth => "organization hierarchy is too deep or cyclic",
        };
        f.write_str(msg)
    }
}

/// Coarse classification used by transport layers to pick a status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    BadRequest,
    Unavailable,
}

/// Kernel error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// No valid principal on the request.
    #[error("authentication required")]
    Unauthenticated,

    /// Principal's system role is not in the allowed set.
    #[error("system role not permitted for this operation")]
    ForbiddenRole,

    /// Principal lacks one or more required permissions in the active tenant.
    #[error("missing permission(s): {}", .0.join(", "))]
    ForbiddenPermission(Vec<String>),

    #[error("tenant context missing")]
    TenantContextMissing,

    /// The entity does not exist or is outside the caller's visible scope.
    #[error("{0} not found")]
    NotFound(EntityKind),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    #[error("constraint violated: {0}")]
    Constraint(ConstraintKind),

    /// Malformed input (bad slug, bad identifier, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Persistence layer unreachable. Never a permission or validation failure.
    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackingStoreUnavailable(msg.into())
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated => "unauthenticated",
            Error::ForbiddenRole => "forbidden_role",
            Error::ForbiddenPermission(_) => "forbidden_permission",
            Error::TenantContextMissing => "tenant_context_missing",
            Error::NotFound(entity) => match entity {
                EntityKind::Membership => "membership_not_found",
                EntityKind::Role => "role_not_found",
                EntityKind::Tenant => "tenant_not_found",
                EntityKind::User => "user_not_found",
                EntityKind::Invitation => "invitation_not_found",
                EntityKind::Permission => "permission_not_found",
            },
            Error::Conflict(kind) => match kind {
                ConflictKind::Slug => "slug_conflict",
                ConflictKind::Invitation => "invitation_conflict",
                ConflictKind::Membership => "membership_conflict",
            },
            Error::Constraint(kind) => kind.code(),
            Error::Validation(_) => "validation_failed",
            Error::BackingStoreUnavailable(_) => "backing_store_unavailable",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Unauthenticated => ErrorClass::Unauthenticated,
            Error::ForbiddenRole | Error::ForbiddenPermission(_) | Error::TenantContextMissing => {
                ErrorClass::Forbidden
            }
            Error::NotFound(_) => ErrorClass::NotFound,
            Error::Conflict(_) => ErrorClass::Conflict,
            Error::Constraint(_) | Error::Validation(_) => ErrorClass::BadRequest,
            Error::BackingStoreUnavailable(_) => ErrorClass::Unavailable,
        }
    }

    pub fn is_constraint(&self, kind: ConstraintKind) -> bool {
        matches!(self, Error::Constraint(k) if *k == kind)
    }
}
