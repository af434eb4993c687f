//! Click stats handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{api_error, ApiError};
use super::handlers::AppState;
use crate::analytics::{Granularity, LinkStats};
use crate::links::LinkError;
use crate::models::LinkSummary;

#[derive(Debug, Deserialize)]
pub struct StatsQueryParams {
    /// `hour` (default) or `day`
    #[serde(default)]
    pub granularity: Granularity,
}

/// Click counts for one link, bucketed by hour or day
pub async fn get_link_stats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<StatsQueryParams>,
) -> Result<Json<LinkStats>, ApiError> {
    // Deactivated and expired links keep their history
    state.links.get(&code).await.map_err(api_error)?;

    let stats = state
        .clicks
        .stats(&code, params.granularity)
        .await
        .map_err(|e| api_error(LinkError::Storage(e)))?;

    Ok(Json(stats))
}

/// Totals across all links, pending clicks included
pub async fn get_summary(State(state): State<Arc<AppState>>) -> Result<Json<LinkSummary>, ApiError> {
    let summary = state
        .clicks
        .summary(chrono::Utc::now().timestamp())
        .await
        .map_err(|e| api_error(LinkError::Storage(e)))?;

    Ok(Json(summary))
}
