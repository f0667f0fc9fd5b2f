use serde::Deserialize;
use tracing::{info, instrument};

use keystone_core::{ConstraintKind, Error, OrganizationId, Result, UserId};

use super::{MembershipService, validate_name};
use crate::audit::{Actor, AuditRecord};
use crate::organization::{MAX_HIERARCHY_DEPTH, Organization};
use crate::store::AccessStore;
use crate::tenant::TenantContextResolver;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub parent_id: Option<OrganizationId>,
}

impl<S: AccessStore> MembershipService<S> {
    /// Insert a new organization. Roles and the creator's owner membership are
    /// provisioned afterwards from the `TenantCreated` event.
    #[instrument(skip(self, new), fields(slug = %new.slug), err)]
    pub async fn create_organization(&self, actor: UserId, new: NewOrganization) -> Result<Organization> {
        let name = validate_name(&new.name)?;
        let slug = Organization::validate_slug(&new.slug)?;

        let mut organization = Organization::new(name, slug);
        if let Some(parent_id) = new.parent_id {
            let depth = TenantContextResolver::new(self.store.clone()).depth(parent_id).await?;
            if depth >= MAX_HIERARCHY_DEPTH {
                return Err(Error::Constraint(ConstraintKind::HierarchyDepth));
            }
            organization = organization.child_of(parent_id);
        }

        self.store.create_organization(&organization).await?;
        info!(organization_id = %organization.id, "organization created");
        self.audit.emit(
            AuditRecord::new(Actor::User(actor), "organization.created", "organization", organization.id)
                .in_organization(organization.id)
                .after(&organization),
        );
        Ok(organization)
    }
}
