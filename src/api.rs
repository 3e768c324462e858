//! HTTP surface for the directory service
//!
//! This module defines the routes game servers and clients talk to:
//!
//! - `POST /report.php`   - a game server announcing its port
//! - `GET  /servers.txt`  - the active list, newline-joined plain text
//! - `GET  /official.txt` - the static official list
//! - `GET  /health`       - process health as JSON
//! - `GET  /version`      - build version as JSON
//!
//! All validation happens here; the registry itself only ever sees
//! well-formed `host:port` addresses.

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Form, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::server::AppState;

/// Largest accepted report request body.
const MAX_REPORT_BODY_BYTES: usize = 1024;

/// Game servers may not announce ports below this (reserved range).
const GAME_PORT_MIN: u16 = 1024;

// ============================================================================
// API Response Types
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: i64,
    pub uptime_secs: u64,
    pub active_servers: usize,
    pub tracked_servers: usize,
    pub official_servers: usize,
}

/// Version response.
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Form body of a registration report.
#[derive(Debug, Deserialize)]
pub struct ReportForm {
    pub port: Option<String>,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/report.php",
            post(report).layer(DefaultBodyLimit::max(MAX_REPORT_BODY_BYTES)),
        )
        .route("/servers.txt", get(servers))
        .route("/official.txt", get(official))
        .route("/health", get(health))
        .route("/version", get(version))
        .layer(middleware::from_fn_with_state(state.clone(), guard))
        .with_state(state)
}

// ============================================================================
// Middleware
// ============================================================================

/// Rate-limit every request by source IP and stamp security headers on every
/// response, including rejections.
async fn guard(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = if state.limiter.check(peer.ip()) {
        next.run(request).await
    } else {
        tracing::debug!(ip = %peer.ip(), "rate limit exceeded");
        (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded\n").into_response()
    };

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    response
}

// ============================================================================
// Report Handler
// ============================================================================

/// Accept a registration report from a game server.
///
/// The caller must present the configured identifier and a port in the
/// allowed range. Blacklisted sources receive the same 200 acknowledgement as
/// everyone else without their report being stored.
async fn report(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<ReportForm>,
) -> Response {
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if agent != state.config.allowed_agent {
        return (StatusCode::FORBIDDEN, "forbidden\n").into_response();
    }

    let Some(port) = form.port else {
        return (StatusCode::BAD_REQUEST, "missing port parameter\n").into_response();
    };

    let port = match port.parse::<u16>() {
        Ok(port) if port >= GAME_PORT_MIN => port,
        _ => return (StatusCode::BAD_REQUEST, "invalid port\n").into_response(),
    };

    let ip = peer.ip();
    if state.blacklist.contains(&ip) {
        // Acknowledge without storing; the response must not reveal
        // blacklist membership.
        return StatusCode::OK.into_response();
    }

    tracing::info!(%ip, port, "received report");
    state.registry.report(SocketAddr::new(ip, port).to_string()).await;

    StatusCode::OK.into_response()
}

// ============================================================================
// List Handlers
// ============================================================================

/// The active server list: non-stale registrations merged with the official
/// list, one address per line.
async fn servers(State(state): State<AppState>) -> Response {
    let active = state.registry.snapshot().await;
    plain_text(active.join("\n"))
}

/// The static official list, without consulting the registry.
async fn official(State(state): State<AppState>) -> Response {
    plain_text(state.config.official_servers.join("\n"))
}

fn plain_text(body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.registry.stats().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_servers: stats.active,
        tracked_servers: stats.tracked,
        official_servers: stats.official,
    })
}

/// Version endpoint.
async fn version() -> impl IntoResponse {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
