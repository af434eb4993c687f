use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{api_error, ApiError};
use crate::analytics::ClickAggregator;
use crate::links::LinkService;
use crate::models::{CreateLinkRequest, LinkListResponse, LinkResponse, UpdateLinkRequest};

pub struct AppState {
    pub links: Arc<LinkService>,
    pub clicks: Arc<ClickAggregator>,
    /// Public base for `shortURL`
    pub base_url: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default, rename = "ownerId", alias = "owner_id")]
    pub owner_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    crate::links::service::DEFAULT_LIST_LIMIT
}

/// Create a new short link
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<LinkResponse>), ApiError> {
    let link = state.links.create(payload).await.map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(LinkResponse::from_link(link, &state.base_url)),
    ))
}

/// Get a link by its code
pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<LinkResponse>, ApiError> {
    let link = state.links.get(&code).await.map_err(api_error)?;
    Ok(Json(LinkResponse::from_link(link, &state.base_url)))
}

/// List links, newest first, optionally for one owner
pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<LinkListResponse>, ApiError> {
    let owner_id = query.owner_id.as_deref().filter(|o| !o.is_empty());
    let (links, next_cursor) = state
        .links
        .list(owner_id, query.cursor.as_deref(), query.limit)
        .await
        .map_err(api_error)?;

    Ok(Json(LinkListResponse {
        links: links
            .into_iter()
            .map(|link| LinkResponse::from_link(link, &state.base_url))
            .collect(),
        next_cursor,
    }))
}

/// Toggle `active` and/or change `expiresAt`
pub async fn update_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(payload): Json<UpdateLinkRequest>,
) -> Result<Json<LinkResponse>, ApiError> {
    let link = state.links.update(&code, payload).await.map_err(api_error)?;
    Ok(Json(LinkResponse::from_link(link, &state.base_url)))
}

/// Deactivate a link. Repeating the call is not an error.
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.links.deactivate(&code).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(rename = "droppedClickEvents")]
    pub dropped_click_events: u64,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        dropped_click_events: state.clicks.dropped_events(),
    })
}
