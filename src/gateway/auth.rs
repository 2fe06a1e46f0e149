//! The auth gate: classifies every request and enforces the matching proof.
//!
//! Identity headers are always overwritten, never merged with client-supplied
//! values. All verification failures collapse to one 401 body; the specific
//! kind is logged internally only.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{routes, routes::RouteClass, GatewayState};
use crate::jwt;

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_ROLE: &str = "x-user-role";
pub const HEADER_USER_PHONE: &str = "x-user-phone";

/// Derived from a verified owner JWT, attached to the request context for
/// its lifetime, never persisted.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub user_id: String,
    pub phone: String,
    pub role: String,
}

pub async fn gate(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    // A client must never be able to smuggle identity, whatever the class.
    for header in [HEADER_USER_ID, HEADER_USER_ROLE, HEADER_USER_PHONE] {
        request.headers_mut().remove(header);
    }

    let class = routes::classify(request.uri().path());

    match class {
        RouteClass::Public | RouteClass::SessionToken => next.run(request).await,
        RouteClass::OwnerAuth => {
            let Some(token) = bearer_token(&request) else {
                debug!(path = request.uri().path(), "missing bearer token");
                return unauthorized();
            };

            let claims = match jwt::verify_hs256(
                &token,
                state.jwt_secret.as_slice(),
                &state.jwt_issuer,
                Utc::now().timestamp(),
            ) {
                Ok(claims) => claims,
                Err(err) => {
                    // the kind stays internal; the response stays uniform
                    warn!(path = request.uri().path(), error = %err, "owner token rejected");
                    return unauthorized();
                }
            };

            let identity = AuthenticatedIdentity {
                user_id: claims.sub,
                phone: claims.phone,
                role: claims.role,
            };
            if inject_identity(&mut request, &identity).is_err() {
                warn!("verified claims produced invalid header values");
                return unauthorized();
            }
            request.extensions_mut().insert(identity);

            next.run(request).await
        }
    }
}

fn bearer_token(request: &Request) -> Option<String> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn inject_identity(
    request: &mut Request,
    identity: &AuthenticatedIdentity,
) -> Result<(), axum::http::header::InvalidHeaderValue> {
    let headers = request.headers_mut();
    headers.insert(HEADER_USER_ID, HeaderValue::from_str(&identity.user_id)?);
    headers.insert(HEADER_USER_ROLE, HeaderValue::from_str(&identity.role)?);
    headers.insert(HEADER_USER_PHONE, HeaderValue::from_str(&identity.phone)?);
    Ok(())
}

/// The one 401 every credential failure maps to.
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}
