//! The gateway: one network boundary, two trust domains.
//!
//! Every inbound request is classified, gated, rate limited and forwarded.
//! Anonymous scanner traffic is authenticated transactionally by the
//! downstream services through scan-session tokens; owner traffic is
//! authenticated here, once, and identity travels onward as injected
//! headers. Downstream services trust those headers because their ports are
//! reachable only through this boundary; that network-topology invariant is
//! part of the design, not an accident.

pub mod auth;
pub mod handlers;
pub mod proxy;
pub mod ratelimit;
pub mod routes;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::get,
    Router,
};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, warn, Span};
use ulid::Ulid;
use utoipa::OpenApi;

use crate::cli::globals::GlobalArgs;
use proxy::UpstreamSet;
use ratelimit::{CounterStore, FingerprintCache, MemoryCounterStore, PgCounterStore, RateSettings};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Live fingerprints the local cache will mirror before the shared store
/// becomes the only authority.
const FINGERPRINT_CACHE_CAPACITY: usize = 10_000;

#[allow(unused_imports)]
use handlers::health::{__path_health, Health, ServiceHealth};

#[derive(OpenApi)]
#[openapi(
    paths(health),
    components(
        schemas(
            Health,
            ServiceHealth,
            crate::session::GeoPoint,
            crate::session::IssueRequest,
            crate::session::IssueResponse
        )
    ),
    tags(
        (name = "platelink", description = "Anonymous vehicle-contact gateway"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Everything the route table, auth gate, rate limiter and proxy share.
pub struct GatewayState {
    pub jwt_secret: Vec<u8>,
    pub jwt_issuer: String,
    pub limits: RateSettings,
    pub store: Arc<dyn CounterStore>,
    pub cache: FingerprintCache,
    pub client: reqwest::Client,
    pub upstreams: UpstreamSet,
    pub ip_header: String,
    pub upstream_timeout: Duration,
    pub health_timeout: Duration,
}

/// Startup configuration, resolved by the CLI. Secrets live in
/// [`GlobalArgs`], not here.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub counter_dsn: Option<String>,
    pub jwt_issuer: String,
    pub upstreams: UpstreamSet,
    pub limits: RateSettings,
    pub ip_header: String,
    pub upstream_timeout: Duration,
    pub health_timeout: Duration,
}

/// Build the request pipeline: auth gate outermost, then the rate limiter,
/// then the synthesized health route and the proxy fallback.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            "/api/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .fallback(proxy::forward)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ratelimit::limit,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth::gate))
        .with_state(state)
}

/// Start the gateway.
///
/// # Errors
/// Returns an error if the counter store or listener cannot be set up or
/// the server fails.
pub async fn new(port: u16, settings: GatewaySettings, globals: &GlobalArgs) -> Result<()> {
    let store: Arc<dyn CounterStore> = match &settings.counter_dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to counter store")?;
            let store = PgCounterStore::new(pool);
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            warn!("no counter store configured; rate limits are per-instance only");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("Failed to build upstream client")?;

    let state = Arc::new(GatewayState {
        jwt_secret: globals.jwt_secret.expose_secret().as_bytes().to_vec(),
        jwt_issuer: settings.jwt_issuer,
        limits: settings.limits,
        store,
        cache: FingerprintCache::new(FINGERPRINT_CACHE_CAPACITY),
        client,
        upstreams: settings.upstreams,
        ip_header: settings.ip_header,
        upstream_timeout: settings.upstream_timeout,
        health_timeout: settings.health_timeout,
    });

    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-session-token"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any);

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
