use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode};

use keystone_auth::AccessStore;

use crate::app::dto::MyPermissionsResponse;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::{self, Operation};
use crate::context::RequestScope;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /me/permissions - the caller's effective permissions in the active organization.
pub async fn my_permissions<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Json<MyPermissionsResponse>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::ReadOwnPermissions).await?;
    let tenant = grant.tenant()?;
    Ok(Json(MyPermissionsResponse {
        user_id: grant.principal().user_id(),
        system_role: grant.principal().system_role().as_str(),
        tenant_id: tenant.tenant_id(),
        organization_id: tenant.organization_id(),
        permissions: grant.permissions().clone(),
    }))
}
