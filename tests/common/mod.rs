//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use featherproxy::cache::Cache;
use featherproxy::model::{Route, SourceServer, TargetServer};
use featherproxy::store::Store;

/// 32 zero bytes, base64. Every test uses the same key so parallel tests
/// never fight over the environment.
pub const TEST_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

pub fn ensure_auth_key() {
    std::env::set_var("AUTH_ENCRYPTION_KEY", TEST_KEY);
}

/// A sqlite-backed store in its own temp directory. The directory must stay
/// alive as long as the store.
pub async fn sqlite_store(cache: Option<Arc<dyn Cache>>) -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let store = Store::connect(&dsn, cache, Duration::from_secs(300))
        .await
        .expect("connect sqlite store");
    store.migrate().await.expect("migrate");
    (store, dir)
}

/// Starts a backend that echoes request details back as JSON.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind echo backend");
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(any(echo));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(request: Request<Body>) -> Json<serde_json::Value> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "query": request.uri().query(),
        "authorization": header("authorization"),
        "x_forwarded_for": header("x-forwarded-for"),
        "x_forwarded_proto": header("x-forwarded-proto"),
    }))
}

/// Waits until something is accepting connections on `addr`.
pub async fn wait_for_port(addr: SocketAddr) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("nothing listening on {addr}");
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("reqwest client")
}

/// Inserts a source server, target server, and one route; returns all three.
pub async fn seed_route(
    store: &Store,
    listen_port: u16,
    backend: SocketAddr,
    base_path: &str,
    method: &str,
    source_path: &str,
    target_path: &str,
) -> (SourceServer, TargetServer, Route) {
    let now = Utc::now();
    let source = SourceServer {
        id: Uuid::new_v4(),
        name: "test-source".into(),
        protocol: "http".into(),
        host: "127.0.0.1".into(),
        port: listen_port,
        created_at: now,
        updated_at: now,
    };
    store.create_source_server(&source).await.expect("create source");

    let target = TargetServer {
        id: Uuid::new_v4(),
        name: "test-target".into(),
        protocol: "http".into(),
        host: backend.ip().to_string(),
        port: backend.port(),
        base_path: base_path.into(),
        created_at: now,
        updated_at: now,
    };
    store.create_target_server(&target).await.expect("create target");

    let route = Route {
        id: Uuid::new_v4(),
        source_id: source.id,
        target_id: target.id,
        method: method.into(),
        source_path: source_path.into(),
        target_path: target_path.into(),
        created_at: now,
        updated_at: now,
    };
    store.create_route(&route).await.expect("create route");

    (source, target, route)
}
