use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{
        Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use serde_json::{Value, json};

use keystone_auth::{AccessStore, Actor, Membership, MembershipSnapshot, OwnershipTransfer, RoleChange};
use keystone_core::MembershipId;

use crate::app::dto::{AddMemberRequest, ChangeRoleRequest, TransferOwnershipRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::{self, Operation};
use crate::context::RequestScope;

/// GET /members
pub async fn list<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Json<Value>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::ListMembers).await?;
    let members = services.members.list_members(grant.tenant()?).await?;
    Ok(Json(json!({ "members": members })))
}

/// POST /members
pub async fn add<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<AddMemberRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Membership>), ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::AddMember).await?;
    let Json(body) = body?;
    let membership = services
        .members
        .add_member(
            grant.tenant()?,
            Actor::User(grant.principal().user_id()),
            body.user_id,
            body.role_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

/// PUT /members/:id/role
pub async fn change_role<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    path: Result<Path<MembershipId>, PathRejection>,
    body: Result<Json<ChangeRoleRequest>, JsonRejection>,
) -> Result<Json<RoleChange>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::ChangeMemberRole).await?;
    let Path(membership_id) = path?;
    let Json(body) = body?;
    let change = services
        .members
        .change_member_role(grant.tenant()?, grant.principal().user_id(), membership_id, body.role_id)
        .await?;
    Ok(Json(change))
}

/// DELETE /members/:id
pub async fn remove<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    path: Result<Path<MembershipId>, PathRejection>,
) -> Result<Json<MembershipSnapshot>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::RemoveMember).await?;
    let Path(membership_id) = path?;
    let removed = services
        .members
        .remove_member(grant.tenant()?, grant.principal().user_id(), membership_id)
        .await?;
    Ok(Json(removed))
}

/// POST /ownership/transfer
pub async fn transfer_ownership<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<TransferOwnershipRequest>, JsonRejection>,
) -> Result<Json<OwnershipTransfer>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::TransferOwnership).await?;
    let Json(body) = body?;
    let transfer = services
        .members
        .transfer_ownership(
            grant.tenant()?,
            grant.principal().user_id(),
            body.from_membership_id,
            body.to_membership_id,
            body.demote_to_role_id,
        )
        .await?;
    Ok(Json(transfer))
}
