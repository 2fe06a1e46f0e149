//! Aggregated gateway health.
//!
//! `/api/health` is synthesized, not proxied: every upstream's `/health`
//! is probed in parallel with a bounded per-probe timeout, so one slow
//! service can never stall the report beyond its own timeout.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::gateway::{GatewayState, GIT_COMMIT_HASH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    /// `/health` answered 200.
    Healthy,
    /// `/health` answered, but not 200.
    Unhealthy,
    /// No answer within the probe timeout.
    Unreachable,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Health {
    name: String,
    version: String,
    commit: String,
    /// `ok` only when every upstream is healthy, `degraded` otherwise.
    status: String,
    services: BTreeMap<String, ServiceHealth>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses (
        (status = 200, description = "All upstream services are healthy", body = Health),
        (status = 503, description = "At least one upstream service is degraded", body = Health)
    ),
    tag = "health",
)]
pub async fn health(method: Method, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let mut probes = JoinSet::new();

    for upstream in state.upstreams.iter() {
        let name = upstream.name.clone();
        let url = upstream.health_url();
        let client = state.client.clone();
        let timeout = state.health_timeout;

        probes.spawn(async move {
            let result = tokio::time::timeout(timeout, client.get(&url).send()).await;
            let status = match result {
                Ok(Ok(response)) if response.status() == StatusCode::OK => ServiceHealth::Healthy,
                Ok(Ok(response)) => {
                    debug!(service = %name, status = %response.status(), "unhealthy upstream");
                    ServiceHealth::Unhealthy
                }
                Ok(Err(err)) => {
                    error!(service = %name, error = %err, "health probe failed");
                    ServiceHealth::Unreachable
                }
                Err(_) => {
                    error!(service = %name, "health probe timed out");
                    ServiceHealth::Unreachable
                }
            };
            (name, status)
        });
    }

    let mut services = BTreeMap::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((name, status)) => {
                services.insert(name, status);
            }
            Err(err) => {
                error!(error = %err, "health probe task panicked");
            }
        }
    }

    let all_healthy = services.len() == state.upstreams.len()
        && services.values().all(|s| *s == ServiceHealth::Healthy);

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: GIT_COMMIT_HASH.to_string(),
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        services,
    };

    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) =
        format!("{}:{}:{short_hash}", health.name, health.version).parse::<HeaderValue>()
    {
        headers.insert("X-App", value);
    }

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        axum::body::Body::empty().into_response()
    };

    (status, headers, body)
}
