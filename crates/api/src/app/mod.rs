//! Axum router and service wiring.
//!
//! - `services.rs`: the kernel services shared by every handler
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request and response bodies
//! - `errors.rs`: error taxonomy to HTTP mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use keystone_auth::AccessStore;

use crate::middleware::{self, AuthState, TokenVerifier};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router.
pub fn build_app<S: AccessStore>(services: Arc<AppServices<S>>, tokens: TokenVerifier) -> Router {
    let auth_state = AuthState {
        tokens,
        store: services.store().clone(),
    };

    let protected = routes::router::<S>()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware::<S>,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(axum::middleware::from_fn(middleware::correlation_middleware))
}
