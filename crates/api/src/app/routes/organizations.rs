use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
};

use keystone_auth::permissions::catalog;
use keystone_auth::{AccessStore, NewOrganization, Organization};
use keystone_core::Error;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::{self, Operation};
use crate::context::RequestScope;

/// POST /organizations
///
/// Any authenticated user may create a tenant. A child organization needs
/// `organization:write` in its parent. Default roles and the creator's owner
/// membership are provisioned asynchronously from `TenantCreated`.
pub async fn create<S: AccessStore>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<NewOrganization>, JsonRejection>,
) -> Result<(StatusCode, Json<Organization>), ApiError> {
    let grant = authz::authorize(&services.guard, &scope, Operation::CreateOrganization).await?;
    let Json(new) = body?;
    let creator = grant.principal().user_id();

    if let Some(parent_id) = new.parent_id {
        let parent = services.guard.tenants().resolve_organization(parent_id).await?;
        let allowed = services
            .guard
            .permission_resolver()
            .has_permission(creator, &parent, &catalog::ORGANIZATION_WRITE)
            .await?;
        if !allowed {
            return Err(Error::ForbiddenPermission(vec![catalog::ORGANIZATION_WRITE.to_string()]).into());
        }
    }

    let organization = services.members.create_organization(creator, new).await?;
    let tenant = services.guard.tenants().resolve_organization(organization.id).await?;
    services.publish_created(tenant.tenant_id(), &organization, creator)?;
    Ok((StatusCode::CREATED, Json(organization)))
}
