//! Request middleware: correlation ids and bearer-token authentication.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tracing::{Instrument, debug, info_span};

use keystone_auth::{AccessStore, Principal, RequestContext, SessionClaims, validate_claims};
use keystone_core::Error;

use crate::app::errors::{ApiError, ErrorBody};
use crate::context::{CorrelationId, RequestScope};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Verifies HS256 session tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn hs256(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is carried in `expires_at` and checked by `validate_claims`.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, Error> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            Error::Unauthenticated
        })?;
        validate_claims(&data.claims, now).map_err(|e| {
            debug!(error = %e, "token claims rejected");
            Error::Unauthenticated
        })?;
        Ok(data.claims)
    }
}

pub struct AuthState<S> {
    pub tokens: TokenVerifier,
    pub store: Arc<S>,
}

impl<S> Clone for AuthState<S> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            store: self.store.clone(),
        }
    }
}

/// Attach a [`RequestScope`] to the request.
///
/// No `Authorization` header yields an anonymous scope, which the guard turns
/// into `unauthenticated` on protected routes. Invalid tokens and users who
/// may not sign in are rejected here.
pub async fn auth_middleware<S: AccessStore>(
    State(state): State<AuthState<S>>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&state, req.headers()).await {
        Ok(ctx) => {
            req.extensions_mut().insert::<RequestScope>(Arc::new(ctx));
            next.run(req).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn authenticate<S: AccessStore>(state: &AuthState<S>, headers: &HeaderMap) -> Result<RequestContext, Error> {
    let Some(token) = extract_bearer(headers)? else {
        return Ok(RequestContext::anonymous());
    };

    let now = Utc::now();
    let claims = state.tokens.verify(token, now)?;
    let user = state
        .store
        .find_user(claims.sub)
        .await?
        .ok_or(Error::Unauthenticated)?;
    let principal = Principal::authenticate(&user, now)?;
    Ok(RequestContext::authenticated(principal, claims.active_organization_id))
}

fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, Error> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Some)
        .ok_or(Error::Unauthenticated)
}

/// Tag the request with a fresh [`CorrelationId`]: a tracing span field, the
/// `x-correlation-id` response header and the `correlation_id` of error bodies.
pub async fn correlation_middleware(mut req: Request, next: Next) -> Response {
    let id = CorrelationId::new();
    req.extensions_mut().insert(id);
    let span = info_span!(
        "http_request",
        correlation_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;

    if let Some(mut body) = response.extensions_mut().remove::<ErrorBody>() {
        body.correlation_id = Some(id.to_string());
        response = (response.status(), Json(body)).into_response();
    }
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    use keystone_core::{OrganizationId, UserId};

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn mint(secret: &[u8], issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> String {
        let claims = SessionClaims {
            sub: UserId::new(),
            active_organization_id: Some(OrganizationId::new()),
            issued_at,
            expires_at,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(&HeaderMap::new()), Ok(None));
        assert_eq!(extract_bearer(&headers("Bearer abc")), Ok(Some("abc")));
        assert_eq!(extract_bearer(&headers("Basic abc")), Err(Error::Unauthenticated));
        assert_eq!(extract_bearer(&headers("Bearer   ")), Err(Error::Unauthenticated));
    }

    #[test]
    fn verifier_accepts_valid_token() {
        let now = Utc::now();
        let token = mint(b"secret", now - Duration::minutes(1), now + Duration::minutes(10));
        let claims = TokenVerifier::hs256(b"secret").verify(&token, now).unwrap();
        assert!(claims.active_organization_id.is_some());
    }

    #[test]
    fn verifier_rejects_wrong_key_and_expired_tokens() {
        let now = Utc::now();
        let verifier = TokenVerifier::hs256(b"secret");

        let forged = mint(b"other", now - Duration::minutes(1), now + Duration::minutes(10));
        assert_eq!(verifier.verify(&forged, now), Err(Error::Unauthenticated));

        let expired = mint(b"secret", now - Duration::hours(2), now - Duration::hours(1));
        assert_eq!(verifier.verify(&expired, now), Err(Error::Unauthenticated));

        assert_eq!(verifier.verify("not-a-jwt", now), Err(Error::Unauthenticated));
    }
}
