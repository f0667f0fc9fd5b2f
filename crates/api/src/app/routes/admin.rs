//! Platform administration endpoints (superadmin only, cross-tenant).

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, rejection::PathRejection},
    routing::get,
};
use serde_json::{Value, json};
use tracing::info;

use keystone_auth::AccessStore;
use keystone_core::OrganizationId;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::{self, Operation};
use crate::context::RequestScope;

pub fn router<S: AccessStore>() -> Router {
    Router::new().route("/organizations/:id/members", get(organization_members::<S>))
}

/// GET /admin/organizations/:id/members
pub async fn organization_members<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    path: Result<Path<OrganizationId>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::AdminListMembers).await?;
    let Path(organization_id) = path?;

    let tenant = services.guard.tenants().resolve_organization(organization_id).await?;
    let members = services.members.list_members(&tenant).await?;
    info!(
        admin_id = %grant.principal().user_id(),
        %organization_id,
        tenant_id = %tenant.tenant_id(),
        "cross-tenant member listing"
    );
    Ok(Json(json!({
        "organization_id": organization_id,
        "tenant_id": tenant.tenant_id(),
        "members": members,
    })))
}
