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

use keystone_auth::{AccessStore, Invitation, Membership};
use keystone_core::InvitationId;

use crate::app::dto::CreateInvitationRequest;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::{self, Operation};
use crate::context::RequestScope;

/// GET /invitations
pub async fn list<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Json<Value>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::ListInvitations).await?;
    let invitations = services.members.list_invitations(grant.tenant()?).await?;
    Ok(Json(json!({ "invitations": invitations })))
}

/// POST /invitations
pub async fn create<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<CreateInvitationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Invitation>), ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::CreateInvitation).await?;
    let Json(body) = body?;
    let invitation = services
        .members
        .create_invitation(grant.tenant()?, grant.principal().user_id(), &body.email, body.role_id)
        .await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

/// DELETE /invitations/:id
pub async fn revoke<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    path: Result<Path<InvitationId>, PathRejection>,
) -> Result<Json<Invitation>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::RevokeInvitation).await?;
    let Path(invitation_id) = path?;
    let invitation = services
        .members
        .revoke_invitation(grant.tenant()?, grant.principal().user_id(), invitation_id)
        .await?;
    Ok(Json(invitation))
}

/// POST /invitations/:id/accept - the invitee joins the active organization.
pub async fn accept<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    path: Result<Path<InvitationId>, PathRejection>,
) -> Result<(StatusCode, Json<Membership>), ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::AcceptInvitation).await?;
    let Path(invitation_id) = path?;
    let membership = services
        .members
        .accept_invitation(grant.tenant()?, grant.principal(), invitation_id)
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}
