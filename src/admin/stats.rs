//! Read-only stats endpoints.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{AdminState, ApiError};
use crate::config::parse_duration;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Deserialize, Default)]
pub struct StatsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub since: Option<String>,
    /// Go-style durations, e.g. `1h`.
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
}

fn parse_since(raw: &Option<String>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw {
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| ApiError::BadRequest("invalid since (use RFC3339)".into())),
        None => Ok(None),
    }
}

pub async fn list_stats(
    State(state): State<AdminState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query
        .limit
        .filter(|n| *n > 0 && *n <= MAX_LIST_LIMIT)
        .unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = query.offset.filter(|n| *n >= 0).unwrap_or(0);
    let since = parse_since(&query.since)?;
    let (stats, total) = state.store.list_proxy_stats(limit, offset, since).await?;
    Ok(Json(json!({ "stats": stats, "total": total })))
}

pub async fn stats_summary(
    State(state): State<AdminState>,
) -> Result<Json<crate::model::StatsSummary>, ApiError> {
    Ok(Json(state.store.stats_summary().await?))
}

pub async fn stats_by_route(
    State(state): State<AdminState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = parse_since(&query.since)?;
    let limit = query.limit.filter(|n| *n > 0).unwrap_or(0);
    let items = state.store.stats_by_route(since, limit).await?;
    Ok(Json(json!({ "items": items })))
}

pub async fn stats_by_caller(
    State(state): State<AdminState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = parse_since(&query.since)?;
    let limit = query.limit.filter(|n| *n > 0).unwrap_or(0);
    let items = state.store.stats_by_caller(since, limit).await?;
    Ok(Json(json!({ "items": items })))
}

pub async fn stats_by_source_server(
    State(state): State<AdminState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = parse_since(&query.since)?;
    let items: Vec<serde_json::Value> = state
        .store
        .stats_by_source_server(since)
        .await?
        .into_iter()
        .map(|row| json!({ "source_id": row.server_id, "count": row.count }))
        .collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn stats_by_target_server(
    State(state): State<AdminState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = parse_since(&query.since)?;
    let items: Vec<serde_json::Value> = state
        .store
        .stats_by_target_server(since)
        .await?
        .into_iter()
        .map(|row| json!({ "target_id": row.server_id, "count": row.count }))
        .collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn stats_tps(
    State(state): State<AdminState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let window = query
        .window
        .as_deref()
        .and_then(|raw| parse_duration(raw).ok())
        .filter(|d| *d > std::time::Duration::ZERO)
        .unwrap_or(std::time::Duration::from_secs(3600));
    let bucket = query
        .bucket
        .as_deref()
        .and_then(|raw| parse_duration(raw).ok())
        .filter(|d| *d > std::time::Duration::ZERO)
        .unwrap_or(std::time::Duration::from_secs(60));
    let since = Utc::now()
        - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1));
    let buckets = state.store.stats_tps(since, bucket).await?;
    Ok(Json(json!({ "buckets": buckets })))
}

pub async fn clear_stats(
    State(state): State<AdminState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.clear_all_proxy_stats().await?;
    Ok(Json(json!({ "ok": "true" })))
}

pub async fn clear_stats_post(
    state: State<AdminState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    clear_stats(state).await
}
