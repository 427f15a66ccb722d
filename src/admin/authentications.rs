//! Authentication credential handlers.
//!
//! Tokens arrive in clear on create/update and leave only masked.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{AdminState, ApiError};
use crate::model::Authentication;

#[derive(Deserialize)]
pub struct AuthenticationBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub token: String,
}

pub async fn list_authentications(
    State(state): State<AdminState>,
) -> Result<Json<Vec<Authentication>>, ApiError> {
    Ok(Json(state.store.list_authentications().await?))
}

pub async fn create_authentication(
    State(state): State<AdminState>,
    Json(body): Json<AuthenticationBody>,
) -> Result<(StatusCode, Json<Authentication>), ApiError> {
    if body.token_type.is_empty() {
        return Err(ApiError::BadRequest("token_type required".into()));
    }
    let now = Utc::now();
    let auth = Authentication {
        id: Uuid::new_v4(),
        name: body.name,
        token_type: body.token_type,
        token: body.token,
        token_masked: String::new(),
        created_at: now,
        updated_at: now,
    };
    state.store.create_authentication(&auth).await?;
    // Echo the record, never the plaintext.
    let created = state.store.get_authentication(auth.id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_authentication(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Authentication>, ApiError> {
    Ok(Json(state.store.get_authentication(id).await?))
}

pub async fn update_authentication(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AuthenticationBody>,
) -> Result<Json<Authentication>, ApiError> {
    let mut auth = state.store.get_authentication(id).await?;
    auth.name = body.name;
    if !body.token_type.is_empty() {
        auth.token_type = body.token_type;
    }
    // An empty token keeps the stored credential.
    auth.token = body.token;
    state.store.update_authentication(&auth).await?;
    Ok(Json(state.store.get_authentication(id).await?))
}

pub async fn delete_authentication(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_authentication(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
