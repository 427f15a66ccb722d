//! Source and target server handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{AdminState, ApiError};
use crate::model::{acl_mode, AclOptions, ServerOptions, SourceServer, TargetServer};

#[derive(Deserialize)]
pub struct ServerBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub base_path: String,
}

impl ServerBody {
    fn validate(&self) -> Result<(), ApiError> {
        if self.protocol.is_empty() || self.host.is_empty() || self.port == 0 {
            return Err(ApiError::BadRequest(
                "protocol, host, and port (positive) required".into(),
            ));
        }
        Ok(())
    }
}

pub async fn list_source_servers(
    State(state): State<AdminState>,
) -> Result<Json<Vec<SourceServer>>, ApiError> {
    Ok(Json(state.store.list_source_servers().await?))
}

pub async fn create_source_server(
    State(state): State<AdminState>,
    Json(body): Json<ServerBody>,
) -> Result<(StatusCode, Json<SourceServer>), ApiError> {
    body.validate()?;
    let now = Utc::now();
    let server = SourceServer {
        id: Uuid::new_v4(),
        name: body.name,
        protocol: body.protocol,
        host: body.host,
        port: body.port,
        created_at: now,
        updated_at: now,
    };
    state.store.create_source_server(&server).await?;
    state.reload.request();
    Ok((StatusCode::CREATED, Json(server)))
}

pub async fn get_source_server(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SourceServer>, ApiError> {
    Ok(Json(state.store.get_source_server(id).await?))
}

pub async fn update_source_server(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ServerBody>,
) -> Result<Json<SourceServer>, ApiError> {
    body.validate()?;
    let mut server = state.store.get_source_server(id).await?;
    server.name = body.name;
    server.protocol = body.protocol;
    server.host = body.host;
    server.port = body.port;
    state.store.update_source_server(&server).await?;
    state.reload.request();
    Ok(Json(server))
}

pub async fn delete_source_server(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_source_server(id).await?;
    state.reload.request();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ServerOptionsBody {
    #[serde(default)]
    pub tls_cert_path: String,
    #[serde(default)]
    pub tls_key_path: String,
}

pub async fn get_server_options(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServerOptions>, ApiError> {
    Ok(Json(state.store.get_server_options(id).await?))
}

pub async fn set_server_options(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ServerOptionsBody>,
) -> Result<Json<ServerOptions>, ApiError> {
    // The source server must exist; options are 1:1 with it.
    state.store.get_source_server(id).await?;
    let now = Utc::now();
    let opts = ServerOptions {
        source_id: id,
        tls_cert_path: body.tls_cert_path,
        tls_key_path: body.tls_key_path,
        created_at: now,
        updated_at: now,
    };
    state.store.set_server_options(&opts).await?;
    Ok(Json(opts))
}

#[derive(Deserialize)]
pub struct AclOptionsBody {
    pub mode: String,
    #[serde(default)]
    pub client_ip_header: String,
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
}

pub async fn get_acl_options(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AclOptions>, ApiError> {
    Ok(Json(state.store.get_acl_options(id).await?))
}

pub async fn set_acl_options(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AclOptionsBody>,
) -> Result<Json<AclOptions>, ApiError> {
    if !matches!(
        body.mode.as_str(),
        acl_mode::OFF | acl_mode::ALLOW_ONLY | acl_mode::DENY_ONLY
    ) {
        return Err(ApiError::BadRequest(
            "mode must be off, allow_only, or deny_only".into(),
        ));
    }
    state.store.get_source_server(id).await?;
    let now = Utc::now();
    let opts = AclOptions {
        source_id: id,
        mode: body.mode,
        client_ip_header: body.client_ip_header,
        allow_list: body.allow_list,
        deny_list: body.deny_list,
        created_at: now,
        updated_at: now,
    };
    state.store.set_acl_options(&opts).await?;
    Ok(Json(opts))
}

pub async fn list_target_servers(
    State(state): State<AdminState>,
) -> Result<Json<Vec<TargetServer>>, ApiError> {
    Ok(Json(state.store.list_target_servers().await?))
}

pub async fn create_target_server(
    State(state): State<AdminState>,
    Json(body): Json<ServerBody>,
) -> Result<(StatusCode, Json<TargetServer>), ApiError> {
    body.validate()?;
    let now = Utc::now();
    let server = TargetServer {
        id: Uuid::new_v4(),
        name: body.name,
        protocol: body.protocol,
        host: body.host,
        port: body.port,
        base_path: body.base_path,
        created_at: now,
        updated_at: now,
    };
    state.store.create_target_server(&server).await?;
    Ok((StatusCode::CREATED, Json(server)))
}

pub async fn get_target_server(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TargetServer>, ApiError> {
    Ok(Json(state.store.get_target_server(id).await?))
}

pub async fn update_target_server(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ServerBody>,
) -> Result<Json<TargetServer>, ApiError> {
    body.validate()?;
    let mut server = state.store.get_target_server(id).await?;
    server.name = body.name;
    server.protocol = body.protocol;
    server.host = body.host;
    server.port = body.port;
    server.base_path = body.base_path;
    state.store.update_target_server(&server).await?;
    Ok(Json(server))
}

pub async fn delete_target_server(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_target_server(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
