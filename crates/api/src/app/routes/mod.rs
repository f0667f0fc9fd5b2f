use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use keystone_auth::AccessStore;

pub mod admin;
pub mod invitations;
pub mod members;
pub mod organizations;
pub mod roles;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router<S: AccessStore>() -> Router {
    Router::new()
        .route("/me/permissions", get(system::my_permissions::<S>))
        .route("/organizations", post(organizations::create::<S>))
        .route("/members", get(members::list::<S>).post(members::add::<S>))
        .route("/members/:id/role", put(members::change_role::<S>))
        .route("/members/:id", delete(members::remove::<S>))
        .route("/ownership/transfer", post(members::transfer_ownership::<S>))
        .route("/roles", get(roles::list::<S>).post(roles::create::<S>))
        .route("/roles/:id", patch(roles::update::<S>).delete(roles::delete::<S>))
        .route(
            "/invitations",
            get(invitations::list::<S>).post(invitations::create::<S>),
        )
        .route("/invitations/:id", delete(invitations::revoke::<S>))
        .route("/invitations/:id/accept", post(invitations::accept::<S>))
        .nest("/admin", admin::router::<S>())
}
