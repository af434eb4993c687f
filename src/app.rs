//! Wiring: storage, click aggregator, link service and the HTTP router

use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analytics::ClickAggregator;
use crate::api::{self, handlers::AppState};
use crate::config::Config;
use crate::cursor::init_cursor_hmac_key;
use crate::links::LinkService;
use crate::redirect::{self, Resolver};
use crate::storage::{CachedStorage, SqliteStorage, Storage};

/// A running service instance
pub struct App {
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub links: Arc<LinkService>,
    pub clicks: Arc<ClickAggregator>,
    pub resolver: Arc<Resolver>,
}

/// Open the configured SQLite database, create the schema and wrap it in the
/// read cache unless disabled.
pub async fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    info!("Using SQLite storage: {}", config.database.url);
    let sqlite: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );
    sqlite.init().await?;

    if config.cache.max_entries == 0 {
        return Ok(sqlite);
    }

    info!(
        "Link cache enabled: {} entries, {}s TTL",
        config.cache.max_entries, config.cache.ttl_secs
    );
    Ok(Arc::new(CachedStorage::new(
        sqlite,
        config.cache.max_entries,
        config.cache.ttl_secs,
    )))
}

impl App {
    pub async fn from_config(config: Config) -> Result<Self> {
        let storage = open_storage(&config).await?;
        Self::with_storage(config, storage).await
    }

    /// Build on an initialized store. Replays logged clicks first when
    /// configured, so counters are complete before the first request.
    pub async fn with_storage(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        init_cursor_hmac_key(config.pagination.cursor_hmac_secret.as_deref());

        if config.clicks.replay_on_startup {
            let report = storage.replay_click_events(false).await?;
            if report.events_replayed > 0 {
                info!(
                    events = report.events_replayed,
                    watermark = report.watermark,
                    "Replayed unflushed click events"
                );
            }
        }

        let clicks = Arc::new(ClickAggregator::start(Arc::clone(&storage), &config.clicks).await?);
        let links = Arc::new(LinkService::from_config(Arc::clone(&storage), &config.codes));
        let resolver = Arc::new(Resolver::new(Arc::clone(&storage), Arc::clone(&clicks)));

        Ok(Self {
            config: Arc::new(config),
            storage,
            links,
            clicks,
            resolver,
        })
    }

    /// Management API and redirect routes on one router
    pub fn router(&self) -> Router {
        let api_state = Arc::new(AppState {
            links: Arc::clone(&self.links),
            clicks: Arc::clone(&self.clicks),
            base_url: self.config.base_url.clone(),
        });

        api::create_api_router(api_state)
            .merge(redirect::create_redirect_router(
                Arc::clone(&self.resolver),
                self.config.redirect_status,
            ))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Flush pending clicks and stop the aggregator
    pub async fn shutdown(&self) {
        self.clicks.shutdown().await;
    }
}
