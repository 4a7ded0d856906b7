//! HTTP boundary for the cache
//!
//! `GET /<url>` serves the cached copy or fetches it once, `GET /latest/<url>`
//! always refreshes from the origin first. `<url>` is either a literal
//! absolute URL or `b64:<base64url(url)>`. `/health` reports service state.

use crate::cache::{Cache, CacheError, CacheResponse};
use crate::httpdate;
use crate::serve::serve_content;
use crate::types::HealthResponse;
use axum::{
    extract::State,
    http::{header, Extensions, HeaderMap, HeaderValue, Method, StatusCode, Uri, Version},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::{predicate::DefaultPredicate, CompressionLayer, Predicate};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const LATEST_PREFIX: &str = "/latest/";
const BASE64_PREFIX: &str = "b64:";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// base64url, with or without padding
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Cache,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let compress = DefaultPredicate::new().and(
        |status: StatusCode, _: Version, _: &HeaderMap, _: &Extensions| {
            status != StatusCode::PARTIAL_CONTENT
        },
    );

    Router::new()
        .route("/health", get(health))
        .fallback(handle_cache)
        .layer(CompressionLayer::new().compress_when(compress))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server, returning once a shutdown signal arrived
pub async fn start_server(state: SharedState, addr: SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs,
        storage: state.cache.storage().name(),
    })
}

/// Split the raw request target into the URL part and the refresh flag
///
/// Works on the undecoded path and query so the embedded URL keeps its
/// query string and any repeated slashes.
pub fn split_target(target: &str) -> (&str, bool) {
    match target.strip_prefix(LATEST_PREFIX) {
        Some(rest) => (rest, true),
        None => (target.strip_prefix('/').unwrap_or(target), false),
    }
}

/// Resolve the `b64:` form; literal URLs pass through unchanged
pub fn decode_target(raw: &str) -> Result<String, CacheError> {
    let Some(encoded) = raw.strip_prefix(BASE64_PREFIX) else {
        return Ok(raw.to_string());
    };

    let decoded = URL_SAFE_LENIENT
        .decode(encoded)
        .map_err(|_| CacheError::InvalidRequest("decoding base64 URL".to_string()))?;

    String::from_utf8(decoded)
        .map_err(|_| CacheError::InvalidRequest("decoding base64 URL".to_string()))
}

async fn handle_cache(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let (raw, force_refresh) = split_target(target);

    let url = match decode_target(raw) {
        Ok(url) => url,
        Err(e) => return e.into_response(),
    };

    match state.cache.serve(&url, force_refresh).await {
        Ok(entry) => respond(&method, &headers, entry).await,
        Err(e) => e.into_response(),
    }
}

async fn respond(method: &Method, headers: &HeaderMap, entry: CacheResponse) -> Response {
    let CacheResponse {
        meta,
        content,
        status,
    } = entry;

    let mut response = serve_content(method, headers, meta.last_modified, content).await;

    let content_type = if meta.content_type.is_empty() {
        DEFAULT_CONTENT_TYPE
    } else {
        meta.content_type.as_str()
    };

    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    if let Ok(value) = HeaderValue::from_str(&httpdate::format(&meta.last_cached)) {
        response_headers.insert("x-last-cached", value);
    }
    response_headers.insert("x-cache", HeaderValue::from_static(status.as_str()));

    response
}
