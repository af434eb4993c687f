use axum::{routing::get, Router};
use std::sync::Arc;

use super::analytics::{get_link_stats, get_summary};
use super::handlers::{
    create_link, delete_link, get_link, health_check, list_links, update_link, AppState,
};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/links", get(list_links).post(create_link))
        .route("/links/summary", get(get_summary))
        .route(
            "/links/{code}",
            get(get_link).patch(update_link).delete(delete_link),
        )
        .route("/links/{code}/stats", get(get_link_stats))
        .with_state(state)
}
