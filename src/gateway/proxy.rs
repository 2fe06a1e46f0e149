//! Forwarding to the backend services.
//!
//! Each configured prefix maps to one upstream base URL. The prefix is
//! preserved verbatim, the method, headers (including the gateway-injected
//! identity headers) and body travel unchanged, and the upstream's
//! status/headers/body come back verbatim. Upstream failures surface as a
//! generic 502; upstream error bodies are never forwarded on failure paths.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

use super::routes::prefix_matches;
use super::GatewayState;

/// Forwarded bodies are capped; the services behind the gateway accept
/// nothing larger.
const FORWARD_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Headers that describe the connection, not the request; never forwarded
/// in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

#[derive(Debug, Clone)]
pub struct Upstream {
    /// Short service name, used in health reporting.
    pub name: String,
    /// Path prefix owned by this service, e.g. `/api/auth`.
    pub prefix: String,
    /// Base URL without a trailing slash.
    base: String,
}

impl Upstream {
    #[must_use]
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, base_url: &Url) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            base: base_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }

    #[must_use]
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamSet {
    upstreams: Vec<Upstream>,
}

impl UpstreamSet {
    #[must_use]
    pub fn new(upstreams: Vec<Upstream>) -> Self {
        Self { upstreams }
    }

    /// Longest matching prefix wins, so `/api/calls/session` can route
    /// differently from `/api/calls` if both are configured.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<&Upstream> {
        self.upstreams
            .iter()
            .filter(|upstream| prefix_matches(&upstream.prefix, path))
            .max_by_key(|upstream| upstream.prefix.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Upstream> {
        self.upstreams.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}

/// Router fallback: everything that is not the synthesized `/api/health`
/// lands here after the auth gate and the rate limiter.
pub async fn forward(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    let Some(upstream) = state.upstreams.match_path(&path) else {
        debug!(path, "no upstream configured");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Not found" })),
        )
            .into_response();
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());
    let target = upstream.url_for(&path_and_query);

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, FORWARD_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    // Dropping this future on client disconnect aborts the upstream call.
    let sent = state
        .client
        .request(parts.method, &target)
        .headers(headers)
        .body(bytes.to_vec())
        .timeout(state.upstream_timeout)
        .send()
        .await;

    let upstream_response = match sent {
        Ok(response) => response,
        Err(err) => {
            error!(service = %upstream.name, error = %err, "upstream unreachable");
            return bad_gateway();
        }
    };

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let body = match upstream_response.bytes().await {
        Ok(body) => body,
        Err(err) => {
            error!(service = %upstream.name, error = %err, "upstream body read failed");
            return bad_gateway();
        }
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": "Upstream unreachable" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn set() -> Result<UpstreamSet> {
        Ok(UpstreamSet::new(vec![
            Upstream::new("auth", "/api/auth", &Url::parse("http://127.0.0.1:7101/")?),
            Upstream::new("calls", "/api/calls", &Url::parse("http://127.0.0.1:7105")?),
            Upstream::new(
                "calls-session",
                "/api/calls/session",
                &Url::parse("http://127.0.0.1:7106")?,
            ),
        ]))
    }

    #[test]
    fn match_is_segment_anchored() -> Result<()> {
        let set = set()?;
        assert_eq!(
            set.match_path("/api/auth/otp/send").map(|u| u.name.as_str()),
            Some("auth")
        );
        assert!(set.match_path("/api/authority").is_none());
        Ok(())
    }

    #[test]
    fn longest_prefix_wins() -> Result<()> {
        let set = set()?;
        assert_eq!(
            set.match_path("/api/calls/session/initiate")
                .map(|u| u.name.as_str()),
            Some("calls-session")
        );
        assert_eq!(
            set.match_path("/api/calls/history").map(|u| u.name.as_str()),
            Some("calls")
        );
        Ok(())
    }

    #[test]
    fn url_for_preserves_prefix_and_query() -> Result<()> {
        let set = set()?;
        let upstream = set.match_path("/api/auth/otp/send").expect("auth upstream");
        assert_eq!(
            upstream.url_for("/api/auth/otp/send?retry=1"),
            "http://127.0.0.1:7101/api/auth/otp/send?retry=1"
        );
        assert_eq!(upstream.health_url(), "http://127.0.0.1:7101/health");
        Ok(())
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("x-user-id", "u1".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers["x-user-id"], "u1");
    }
}
