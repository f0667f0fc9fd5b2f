//! JSON error responses.
//!
//! Every error body is `{ "error": <code>, "message": <text>, "correlation_id": <uuid> }`;
//! `forbidden_permission` additionally lists `missing_permissions`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, info};

use keystone_core::{Error, ErrorClass};

const SERVER_ERROR_MESSAGE: &str = "service temporarily unavailable";

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Handler error; renders the kernel taxonomy as an HTTP response.
#[derive(Debug)]
pub struct ApiError(Error);

impl ApiError {
    pub fn error(&self) -> &Error {
        &self.0
    }
}

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        Self(value)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self(Error::validation(value.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        Self(Error::validation(value.body_text()))
    }
}

pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorClass::Forbidden => StatusCode::FORBIDDEN,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
        ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(err.class());
        let code = err.code();

        let message = if status.is_server_error() {
            error!(code, detail = %err, "request failed");
            SERVER_ERROR_MESSAGE.to_string()
        } else {
            info!(code, status = status.as_u16(), "request rejected");
            err.to_string()
        };
        let missing_permissions = match err {
            Error::ForbiddenPermission(missing) => missing,
            _ => Vec::new(),
        };

        json_error(
            status,
            ErrorBody {
                error: code,
                message,
                missing_permissions,
                correlation_id: None,
            },
        )
    }
}

/// Render `body`. The body is also stashed in the response extensions so the
/// correlation middleware can stamp the request's id into it.
pub fn json_error(status: StatusCode, body: ErrorBody) -> Response {
    let mut response = (status, Json(body.clone())).into_response();
    response.extensions_mut().insert(body);
    response
}

#[cfg(test)]
mod tests {
    use keystone_core::{ConflictKind, ConstraintKind, EntityKind};

    use super::*;

    fn status_of(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn kernel_errors_map_to_status_codes() {
        assert_eq!(status_of(Error::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(Error::ForbiddenRole), StatusCode::FORBIDDEN);
        assert_eq!(status_of(Error::ForbiddenPermission(vec!["roles:write".into()])), StatusCode::FORBIDDEN);
        assert_eq!(status_of(Error::TenantContextMissing), StatusCode::FORBIDDEN);
        assert_eq!(status_of(Error::NotFound(EntityKind::Role)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::Conflict(ConflictKind::Slug)), StatusCode::CONFLICT);
        assert_eq!(status_of(Error::Constraint(ConstraintKind::LastOwner)), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(Error::validation("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(Error::unavailable("db down")), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn server_errors_hide_detail() {
        let response = ApiError::from(Error::unavailable("password=hunter2 host=db")).into_response();
        let body = response.extensions().get::<ErrorBody>().unwrap();
        assert_eq!(body.error, "backing_store_unavailable");
        assert_eq!(body.message, SERVER_ERROR_MESSAGE);
    }

    #[test]
    fn forbidden_permission_lists_missing() {
        let response = ApiError::from(Error::ForbiddenPermission(vec!["members:write".into()])).into_response();
        let body = response.extensions().get::<ErrorBody>().unwrap();
        assert_eq!(body.error, "forbidden_permission");
        assert_eq!(body.missing_permissions, vec!["members:write".to_string()]);
    }
}
