//! Route and route-auth handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AdminState, ApiError};
use crate::model::{Route, RouteSourceAuth};

#[derive(Deserialize)]
pub struct RouteBody {
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub target_path: String,
}

impl RouteBody {
    fn validate(&self) -> Result<(), ApiError> {
        if self.method.is_empty() || self.source_path.is_empty() || self.target_path.is_empty() {
            return Err(ApiError::BadRequest(
                "method, source_path, and target_path required".into(),
            ));
        }
        Ok(())
    }
}

pub async fn list_routes(State(state): State<AdminState>) -> Result<Json<Vec<Route>>, ApiError> {
    Ok(Json(state.store.list_routes().await?))
}

pub async fn create_route(
    State(state): State<AdminState>,
    Json(body): Json<RouteBody>,
) -> Result<(StatusCode, Json<Route>), ApiError> {
    body.validate()?;
    let now = Utc::now();
    let route = Route {
        id: Uuid::new_v4(),
        source_id: body.source_id,
        target_id: body.target_id,
        method: body.method,
        source_path: body.source_path,
        target_path: body.target_path,
        created_at: now,
        updated_at: now,
    };
    state.store.create_route(&route).await?;
    Ok((StatusCode::CREATED, Json(route)))
}

pub async fn get_route(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Route>, ApiError> {
    Ok(Json(state.store.get_route(id).await?))
}

pub async fn update_route(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RouteBody>,
) -> Result<Json<Route>, ApiError> {
    body.validate()?;
    let mut route = state.store.get_route(id).await?;
    route.source_id = body.source_id;
    route.target_id = body.target_id;
    route.method = body.method;
    route.source_path = body.source_path;
    route.target_path = body.target_path;
    state.store.update_route(&route).await?;
    Ok(Json(route))
}

pub async fn delete_route(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_route(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SourceAuthBody {
    #[serde(default)]
    pub auth_ids: Vec<Uuid>,
}

pub async fn get_route_source_auth(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RouteSourceAuth>>, ApiError> {
    Ok(Json(state.store.list_source_auths_for_route(id).await?))
}

pub async fn put_route_source_auth(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SourceAuthBody>,
) -> Result<Json<Vec<RouteSourceAuth>>, ApiError> {
    state.store.get_route(id).await?;
    state
        .store
        .set_source_auths_for_route(id, &body.auth_ids)
        .await?;
    Ok(Json(state.store.list_source_auths_for_route(id).await?))
}

#[derive(Serialize, Deserialize)]
pub struct TargetAuthBody {
    #[serde(default)]
    pub auth_id: Option<Uuid>,
}

pub async fn get_route_target_auth(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TargetAuthBody>, ApiError> {
    let auth_id = state.store.get_target_auth_for_route(id).await?;
    Ok(Json(TargetAuthBody { auth_id }))
}

pub async fn put_route_target_auth(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TargetAuthBody>,
) -> Result<Json<TargetAuthBody>, ApiError> {
    state.store.get_route(id).await?;
    state
        .store
        .set_target_auth_for_route(id, body.auth_id)
        .await?;
    Ok(Json(body))
}
