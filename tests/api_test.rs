//! Integration tests for the HTTP surface
//!
//! Requests are driven through the full router (guard middleware included)
//! with an injected peer address, without binding a socket.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use std::net::SocketAddr;
use tower::ServiceExt;

use lusd::config::DirectoryConfig;
use lusd::server::DirectoryServer;

fn test_router(config: DirectoryConfig) -> Router {
    DirectoryServer::new(config).unwrap().build_router()
}

fn get(uri: &str, peer: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    inject_peer(&mut request, peer);
    request
}

fn report(agent: Option<&str>, body: &str, peer: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/report.php")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(agent) = agent {
        builder = builder.header(header::USER_AGENT, agent);
    }
    let mut request = builder.body(Body::from(body.to_string())).unwrap();
    inject_peer(&mut request, peer);
    request
}

fn inject_peer(request: &mut Request<Body>, peer: &str) {
    let peer: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

const AGENT: &str = "LU-Server/0.1";

// ============================================================================
// Report Endpoint
// ============================================================================

#[tokio::test]
async fn test_report_then_active_list() {
    let router = test_router(DirectoryConfig::default());

    let response = router
        .clone()
        .oneshot(report(Some(AGENT), "port=2301", "1.2.3.4:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(get("/servers.txt", "8.8.8.8:40000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(body_string(response).await, "1.2.3.4:2301");
}

#[tokio::test]
async fn test_report_rejects_wrong_agent() {
    let router = test_router(DirectoryConfig::default());

    let response = router
        .oneshot(report(Some("Mozilla/5.0"), "port=2301", "1.2.3.4:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_report_rejects_missing_agent() {
    let router = test_router(DirectoryConfig::default());

    let response = router
        .oneshot(report(None, "port=2301", "1.2.3.4:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_report_rejects_missing_port() {
    let router = test_router(DirectoryConfig::default());

    let response = router
        .oneshot(report(Some(AGENT), "", "1.2.3.4:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_report_rejects_out_of_range_port() {
    let router = test_router(DirectoryConfig::default());

    for body in ["port=80", "port=0", "port=70000", "port=abc"] {
        let response = router
            .clone()
            .oneshot(report(Some(AGENT), body, "1.2.3.4:55555"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }
}

#[tokio::test]
async fn test_report_wrong_method() {
    let router = test_router(DirectoryConfig::default());

    let response = router
        .oneshot(get("/report.php", "1.2.3.4:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_blacklisted_source_acknowledged_without_registration() {
    let config = DirectoryConfig::builder()
        .blacklist(vec!["9.9.9.9".to_string()])
        .build()
        .unwrap();
    let router = test_router(config);

    // The blocked client sees exactly what an accepted client sees.
    let response = router
        .clone()
        .oneshot(report(Some(AGENT), "port=2301", "9.9.9.9:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(get("/servers.txt", "8.8.8.8:40000"))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "");
}

// ============================================================================
// List Endpoints
// ============================================================================

#[tokio::test]
async fn test_active_list_sorted_and_deduplicated() {
    let config = DirectoryConfig::builder()
        .official_servers(vec!["10.0.0.1:9000".to_string()])
        .build()
        .unwrap();
    let router = test_router(config);

    for (body, peer) in [
        ("port=3001", "5.6.7.8:50000"),
        ("port=3000", "5.6.7.8:50001"),
        ("port=9000", "10.0.0.1:50002"),
    ] {
        let response = router
            .clone()
            .oneshot(report(Some(AGENT), body, peer))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .oneshot(get("/servers.txt", "8.8.8.8:40000"))
        .await
        .unwrap();
    assert_eq!(
        body_string(response).await,
        "10.0.0.1:9000\n5.6.7.8:3000\n5.6.7.8:3001"
    );
}

#[tokio::test]
async fn test_official_list_ignores_reports() {
    let config = DirectoryConfig::builder()
        .official_servers(vec!["10.0.0.1:9000".to_string()])
        .build()
        .unwrap();
    let router = test_router(config);

    let response = router
        .clone()
        .oneshot(report(Some(AGENT), "port=2301", "1.2.3.4:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(get("/official.txt", "8.8.8.8:40000"))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "10.0.0.1:9000");
}

// ============================================================================
// Health and Version
// ============================================================================

#[tokio::test]
async fn test_health_reports_active_count() {
    let config = DirectoryConfig::builder()
        .official_servers(vec!["10.0.0.1:9000".to_string()])
        .build()
        .unwrap();
    let router = test_router(config);

    let response = router
        .clone()
        .oneshot(report(Some(AGENT), "port=2301", "1.2.3.4:55555"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.oneshot(get("/health", "8.8.8.8:40000")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["active_servers"], 2);
    assert_eq!(health["tracked_servers"], 1);
    assert_eq!(health["official_servers"], 1);
}

#[tokio::test]
async fn test_version_endpoint() {
    let router = test_router(DirectoryConfig::default());

    let response = router.oneshot(get("/version", "8.8.8.8:40000")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let version: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));
}

// ============================================================================
// Guard Middleware
// ============================================================================

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let router = test_router(DirectoryConfig::default());

    let response = router
        .oneshot(get("/servers.txt", "8.8.8.8:40000"))
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        response.headers().get("x-xss-protection").unwrap(),
        "1; mode=block"
    );
}

#[tokio::test]
async fn test_rate_limit_enforced_per_source() {
    let config = DirectoryConfig::builder()
        .rate_limit_per_minute(2)
        .build()
        .unwrap();
    let router = test_router(config);

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(get("/servers.txt", "1.2.3.4:40000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .clone()
        .oneshot(get("/servers.txt", "1.2.3.4:40000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different source is unaffected.
    let response = router
        .oneshot(get("/servers.txt", "5.6.7.8:40000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
