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

use keystone_auth::{AccessStore, NewRole, RoleDeletion, RoleDetails, RoleUpdate};
use keystone_core::RoleId;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::{self, Operation};
use crate::context::RequestScope;

/// GET /roles - roles of the active organization with their permissions.
pub async fn list<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Json<Value>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::ListRoles).await?;
    let roles = services.members.list_roles(grant.tenant()?).await?;
    Ok(Json(json!({ "roles": roles })))
}

/// POST /roles
pub async fn create<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<NewRole>, JsonRejection>,
) -> Result<(StatusCode, Json<RoleDetails>), ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::CreateRole).await?;
    let Json(new) = body?;
    let role = services
        .members
        .create_role(grant.tenant()?, grant.principal().user_id(), new)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// PATCH /roles/:id
pub async fn update<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    path: Result<Path<RoleId>, PathRejection>,
    body: Result<Json<RoleUpdate>, JsonRejection>,
) -> Result<Json<RoleDetails>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::UpdateRole).await?;
    let Path(role_id) = path?;
    let Json(update) = body?;
    let role = services
        .members
        .update_role(grant.tenant()?, grant.principal().user_id(), role_id, update)
        .await?;
    Ok(Json(role))
}

/// DELETE /roles/:id - holders of the role fall back to `viewer`.
pub async fn delete<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    path: Result<Path<RoleId>, PathRejection>,
) -> Result<Json<RoleDeletion>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::DeleteRole).await?;
    let Path(role_id) = path?;
    let deletion = services
        .members
        .delete_role(grant.tenant()?, grant.principal().user_id(), role_id)
        .await?;
    Ok(Json(deletion))
}
