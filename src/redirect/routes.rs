use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::config::RedirectMode;

use super::handlers::{redirect_url, RedirectState};
use super::middleware::record_request_start;
use super::resolver::Resolver;

pub fn create_redirect_router(resolver: Arc<Resolver>, redirect_status: RedirectMode) -> Router {
    let state = Arc::new(RedirectState {
        resolver,
        redirect_status,
    });

    Router::new()
        .route("/{code}", get(redirect_url))
        .layer(middleware::from_fn(record_request_start))
        .with_state(state)
}
