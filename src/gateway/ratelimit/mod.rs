//! Layered fixed-window rate limiting.
//!
//! Every request pays the global budget (per user id, else per caller IP).
//! Scan initiation additionally pays a stricter per-device-fingerprint
//! budget, and the OTP endpoints pay per-phone budgets so brute-forcing one
//! phone's OTP is bounded no matter how many IPs an attacker rotates
//! through. A request must pass all limiters that apply to its route; the
//! first failure produces the 429.
//!
//! Fixed windows admit a burst of up to 2x budget at a window boundary.

mod cache;
mod store;

pub use cache::FingerprintCache;
pub use store::{CounterStore, MemoryCounterStore, PgCounterStore, WindowCount};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::auth::AuthenticatedIdentity;
use super::GatewayState;

/// Fingerprints are opaque client-supplied strings; cap them so they cannot
/// be used to bloat the counter store.
pub const MAX_FINGERPRINT_LEN: usize = 128;

/// E.164 numbers top out at 15 digits; anything past this is not a phone,
/// and like fingerprints it would otherwise become an attacker-chosen store
/// key.
pub const MAX_PHONE_LEN: usize = 32;

/// Keyed bodies are small JSON documents; anything bigger is not a
/// legitimate scan or OTP request.
const KEYED_BODY_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RateSettings {
    pub global_limit: u64,
    pub global_window: Duration,
    pub fingerprint_limit: u64,
    pub fingerprint_window: Duration,
    pub otp_send_limit: u64,
    pub otp_verify_limit: u64,
    pub otp_window: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            global_limit: 100,
            global_window: Duration::from_secs(60),
            fingerprint_limit: 5,
            fingerprint_window: Duration::from_secs(10 * 60),
            otp_send_limit: 5,
            otp_verify_limit: 10,
            otp_window: Duration::from_secs(60),
        }
    }
}

/// Which budget tripped; informative to the caller, unlike auth failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Fingerprint,
    OtpSend,
    OtpVerify,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Fingerprint => "fingerprint",
            Self::OtpSend => "otp-send",
            Self::OtpVerify => "otp-verify",
        }
    }
}

pub async fn limit(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // Global budget first: cheapest key, applies to everything.
    let global_key = global_key(&request, &state.ip_header);
    match state
        .store
        .incr(&global_key, state.limits.global_window)
        .await
    {
        Ok(observed) if observed.count > state.limits.global_limit => {
            debug!(key = %global_key, count = observed.count, "global budget exceeded");
            return too_many_requests(Scope::Global, observed.retry_after);
        }
        Ok(_) => {}
        Err(err) => {
            // fail open: losing the store must not take down authenticated
            // traffic
            warn!(error = %err, "global counter store unavailable");
        }
    }

    let Some(rule) = body_rule(request.method(), &path) else {
        return next.run(request).await;
    };

    // The stricter limiters key on a body field; buffer, inspect, rebuild.
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, KEYED_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return invalid_body(),
    };

    let outcome = match rule {
        BodyRule::Fingerprint => {
            check_fingerprint(&state, &bytes).await
        }
        BodyRule::OtpSend => {
            check_phone(
                &state,
                &bytes,
                Scope::OtpSend,
                state.limits.otp_send_limit,
            )
            .await
        }
        BodyRule::OtpVerify => {
            check_phone(
                &state,
                &bytes,
                Scope::OtpVerify,
                state.limits.otp_verify_limit,
            )
            .await
        }
    };

    if let Err(response) = outcome {
        return response;
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyRule {
    Fingerprint,
    OtpSend,
    OtpVerify,
}

fn body_rule(method: &Method, path: &str) -> Option<BodyRule> {
    if method != Method::POST {
        return None;
    }
    match path {
        "/api/scan/session" => Some(BodyRule::Fingerprint),
        "/api/auth/otp/send" => Some(BodyRule::OtpSend),
        "/api/auth/otp/verify" => Some(BodyRule::OtpVerify),
        _ => None,
    }
}

/// Authenticated identity when the auth gate verified one, caller IP
/// otherwise.
fn global_key(request: &Request, ip_header: &str) -> String {
    if let Some(identity) = request.extensions().get::<AuthenticatedIdentity>() {
        return format!("global:user:{}", identity.user_id);
    }

    let header_ip = request
        .headers()
        .get(ip_header)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(ip) = header_ip {
        return format!("global:ip:{ip}");
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("global:ip:{}", addr.ip()),
        None => "global:ip:unknown".to_string(),
    }
}

async fn check_fingerprint(state: &GatewayState, body: &[u8]) -> Result<(), Response> {
    let Some(fingerprint) = json_field(body, "fingerprint") else {
        return Err(invalid_body());
    };
    if fingerprint.len() > MAX_FINGERPRINT_LEN {
        return Err(invalid_body());
    }

    let key = format!("fp:{fingerprint}");
    let limit = state.limits.fingerprint_limit;

    // fast path: a device already over budget skips the store round-trip
    if let Some(retry_after) = state.cache.over_limit(&key, limit) {
        debug!(key = %key, "fingerprint rejected from local cache");
        return Err(too_many_requests(Scope::Fingerprint, retry_after));
    }

    match state.store.incr(&key, state.limits.fingerprint_window).await {
        Ok(observed) => {
            state.cache.record(&key, observed.count, observed.retry_after);
            if observed.count > limit {
                debug!(key = %key, count = observed.count, "fingerprint budget exceeded");
                return Err(too_many_requests(Scope::Fingerprint, observed.retry_after));
            }
            Ok(())
        }
        Err(err) => {
            // fail closed: scan initiation is the abuse surface
            warn!(error = %err, "fingerprint counter store unavailable");
            Err(too_many_requests(
                Scope::Fingerprint,
                state.limits.fingerprint_window,
            ))
        }
    }
}

async fn check_phone(
    state: &GatewayState,
    body: &[u8],
    scope: Scope,
    limit: u64,
) -> Result<(), Response> {
    let Some(phone) = json_field(body, "phone") else {
        return Err(invalid_body());
    };
    if phone.len() > MAX_PHONE_LEN {
        return Err(invalid_body());
    }

    let key = format!("{}:{phone}", scope.as_str());
    match state.store.incr(&key, state.limits.otp_window).await {
        Ok(observed) if observed.count > limit => {
            debug!(key = %key, count = observed.count, "otp budget exceeded");
            Err(too_many_requests(scope, observed.retry_after))
        }
        Ok(_) => Ok(()),
        Err(err) => {
            warn!(error = %err, "otp counter store unavailable");
            Err(too_many_requests(scope, state.limits.otp_window))
        }
    }
}

fn json_field(body: &[u8], field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn too_many_requests(scope: Scope, retry_after: Duration) -> Response {
    let seconds = retry_after.as_secs().max(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "scope": scope.as_str(),
            "retryAfterSeconds": seconds,
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(seconds));
    response
}

fn invalid_body() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid request body" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_budgets() {
        let settings = RateSettings::default();
        assert_eq!(settings.global_limit, 100);
        assert_eq!(settings.global_window, Duration::from_secs(60));
        assert_eq!(settings.fingerprint_limit, 5);
        assert_eq!(settings.fingerprint_window, Duration::from_secs(600));
        assert_eq!(settings.otp_send_limit, 5);
        assert_eq!(settings.otp_verify_limit, 10);
    }

    #[test]
    fn body_rules_cover_only_the_keyed_routes() {
        assert_eq!(
            body_rule(&Method::POST, "/api/scan/session"),
            Some(BodyRule::Fingerprint)
        );
        assert_eq!(
            body_rule(&Method::POST, "/api/auth/otp/send"),
            Some(BodyRule::OtpSend)
        );
        assert_eq!(
            body_rule(&Method::POST, "/api/auth/otp/verify"),
            Some(BodyRule::OtpVerify)
        );
        assert_eq!(body_rule(&Method::GET, "/api/scan/session"), None);
        assert_eq!(body_rule(&Method::POST, "/api/vehicles"), None);
    }

    #[test]
    fn json_field_extracts_trimmed_strings() {
        let body = br#"{"phone": " +919876543210 ", "fingerprint": "fp-1"}"#;
        assert_eq!(
            json_field(body, "phone"),
            Some("+919876543210".to_string())
        );
        assert_eq!(json_field(body, "fingerprint"), Some("fp-1".to_string()));
        assert_eq!(json_field(body, "missing"), None);
        assert_eq!(json_field(br#"{"phone": 42}"#, "phone"), None);
        assert_eq!(json_field(b"not json", "phone"), None);
    }

    #[test]
    fn global_key_prefers_identity_over_ip() {
        let mut request = Request::builder()
            .uri("/api/vehicles")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            global_key(&request, "x-forwarded-for"),
            "global:ip:203.0.113.9"
        );

        request.extensions_mut().insert(AuthenticatedIdentity {
            user_id: "u1".to_string(),
            phone: "+91".to_string(),
            role: "OWNER".to_string(),
        });
        assert_eq!(global_key(&request, "x-forwarded-for"), "global:user:u1");
    }

    #[test]
    fn global_key_falls_back_to_peer_address() {
        let mut request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        assert_eq!(global_key(&request, "x-forwarded-for"), "global:ip:127.0.0.1");
    }

    #[test]
    fn retry_after_header_is_always_at_least_one_second() {
        let response = too_many_requests(Scope::Global, Duration::from_millis(10));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "1");
    }
}
