//! Management API.
//!
//! # Responsibilities
//! - CRUD on source servers (plus TLS options and ACL sub-resources),
//!   target servers, routes (plus source/target auth bindings), and
//!   authentication credentials
//! - Read-only stats aggregates
//! - The reload trigger for the listener fleet
//!
//! # Design Decisions
//! - Credential reads always return a masked token; plaintext never leaves
//!   the proxy path
//! - Source server mutations post a reload request so the fleet picks up
//!   topology changes without a restart

pub mod authentications;
pub mod routes;
pub mod servers;
pub mod stats;

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::crypto::TokenError;
use crate::lifecycle::ReloadHandle;
use crate::store::{Store, StoreError};

/// Shared state for all management handlers.
#[derive(Clone)]
pub struct AdminState {
    pub store: Store,
    pub reload: ReloadHandle,
}

/// Error envelope for management responses.
pub enum ApiError {
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Store(err) => match &err {
                StoreError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
                StoreError::ProtocolMismatch | StoreError::TokenRequired => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                StoreError::Token(TokenError::KeyMissing) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "encryption not configured".to_string(),
                ),
                _ => {
                    tracing::error!(error = %err, "management request failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                }
            },
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

async fn trigger_reload(
    axum::extract::State(state): axum::extract::State<AdminState>,
) -> Json<serde_json::Value> {
    state.reload.request();
    Json(serde_json::json!({ "ok": "reload triggered" }))
}

/// The management router. Mounted behind trace and timeout layers.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/api/reload", post(trigger_reload))
        .route(
            "/api/source-servers",
            get(servers::list_source_servers).post(servers::create_source_server),
        )
        .route(
            "/api/source-servers/{id}",
            get(servers::get_source_server)
                .put(servers::update_source_server)
                .delete(servers::delete_source_server),
        )
        .route(
            "/api/source-servers/{id}/options",
            get(servers::get_server_options).put(servers::set_server_options),
        )
        .route(
            "/api/source-servers/{id}/acl",
            get(servers::get_acl_options).put(servers::set_acl_options),
        )
        .route(
            "/api/target-servers",
            get(servers::list_target_servers).post(servers::create_target_server),
        )
        .route(
            "/api/target-servers/{id}",
            get(servers::get_target_server)
                .put(servers::update_target_server)
                .delete(servers::delete_target_server),
        )
        .route(
            "/api/routes",
            get(routes::list_routes).post(routes::create_route),
        )
        .route(
            "/api/routes/{id}",
            get(routes::get_route)
                .put(routes::update_route)
                .delete(routes::delete_route),
        )
        .route(
            "/api/routes/{id}/source-auth",
            get(routes::get_route_source_auth).put(routes::put_route_source_auth),
        )
        .route(
            "/api/routes/{id}/target-auth",
            get(routes::get_route_target_auth).put(routes::put_route_target_auth),
        )
        .route(
            "/api/authentications",
            get(authentications::list_authentications).post(authentications::create_authentication),
        )
        .route(
            "/api/authentications/{id}",
            get(authentications::get_authentication)
                .put(authentications::update_authentication)
                .delete(authentications::delete_authentication),
        )
        .route(
            "/api/stats",
            get(stats::list_stats).delete(stats::clear_stats),
        )
        .route("/api/stats/summary", get(stats::stats_summary))
        .route("/api/stats/by-route", get(stats::stats_by_route))
        .route("/api/stats/by-caller", get(stats::stats_by_caller))
        .route(
            "/api/stats/by-source-server",
            get(stats::stats_by_source_server),
        )
        .route(
            "/api/stats/by-target-server",
            get(stats::stats_by_target_server),
        )
        .route("/api/stats/tps", get(stats::stats_tps))
        .route("/api/stats/clear", post(stats::clear_stats_post))
        .layer(TimeoutLayer::new(Duration::from_secs(15)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the management API until `shutdown` fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
