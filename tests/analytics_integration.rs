//! Click analytics integration tests
//!
//! Counts served by the stats endpoint must match successful resolutions,
//! including across a crash between logging and flushing.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hopper::app::open_storage;
use hopper::config::Config;
use hopper::models::CreateLinkRequest;
use hopper::storage::Storage;
use hopper::App;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn request(url: &str) -> CreateLinkRequest {
    CreateLinkRequest {
        destination_url: url.to_string(),
        alias: None,
        expires_at: None,
        owner_id: None,
    }
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn resolve_times(router: &Router, code: &str, times: usize) {
    for _ in 0..times {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/{code}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }
}

#[tokio::test]
async fn test_stats_match_resolutions() {
    let app = App::from_config(Config::for_tests()).await.unwrap();
    let router = app.router();
    let link = app.links.create(request("https://example.com")).await.unwrap();

    resolve_times(&router, &link.short_code, 3).await;
    app.clicks.sync_log().await.unwrap();

    // Pending clicks are visible before any flush
    let (status, stats) = get_json(&router, &format!("/links/{}/stats", link.short_code)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["code"], link.short_code.as_str());
    assert_eq!(stats["totalClicks"], 3);

    app.clicks.flush().await.unwrap();
    let (_, stats) = get_json(&router, &format!("/links/{}/stats", link.short_code)).await;
    assert_eq!(stats["totalClicks"], 3);
    let buckets = stats["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0]["clicks"], 3);
    assert_eq!(buckets[0]["start"].as_i64().unwrap() % 3600, 0);

    let (_, daily) = get_json(
        &router,
        &format!("/links/{}/stats?granularity=day", link.short_code),
    )
    .await;
    assert_eq!(daily["totalClicks"], 3);
    assert_eq!(daily["buckets"][0]["start"].as_i64().unwrap() % 86_400, 0);

    let (status, _) = get_json(
        &router,
        &format!("/links/{}/stats?granularity=week", link.short_code),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_crash_before_flush_recovers_by_replay() {
    let config = Config::for_tests();
    let storage: Arc<dyn Storage> = open_storage(&config).await.unwrap();

    let first = App::with_storage(config.clone(), Arc::clone(&storage))
        .await
        .unwrap();
    let link = first.links.create(request("https://example.com")).await.unwrap();
    resolve_times(&first.router(), &link.short_code, 3).await;

    // Logged, never flushed, then the process dies
    first.clicks.sync_log().await.unwrap();
    first.clicks.abort().await;
    assert!(storage.click_buckets(&link.short_code).await.unwrap().is_empty());

    let second = App::with_storage(config.clone(), Arc::clone(&storage))
        .await
        .unwrap();
    let (_, stats) = get_json(&second.router(), &format!("/links/{}/stats", link.short_code)).await;
    assert_eq!(stats["totalClicks"], 3);

    // A further restart does not count the same events twice
    second.shutdown().await;
    let third = App::with_storage(config, Arc::clone(&storage)).await.unwrap();
    let (_, stats) = get_json(&third.router(), &format!("/links/{}/stats", link.short_code)).await;
    assert_eq!(stats["totalClicks"], 3);
}

#[tokio::test]
async fn test_uninterrupted_run_matches_recovered_run() {
    let config = Config::for_tests();
    let storage = open_storage(&config).await.unwrap();
    let app = App::with_storage(config, Arc::clone(&storage)).await.unwrap();
    let link = app.links.create(request("https://example.com")).await.unwrap();

    resolve_times(&app.router(), &link.short_code, 3).await;
    app.shutdown().await;

    let report = storage.replay_click_events(false).await.unwrap();
    assert_eq!(report.events_replayed, 0);

    let buckets = storage.click_buckets(&link.short_code).await.unwrap();
    assert_eq!(buckets.iter().map(|b| b.clicks).sum::<i64>(), 3);

    // Full rebuild from the log gives the same answer
    storage.replay_click_events(true).await.unwrap();
    let rebuilt = storage.click_buckets(&link.short_code).await.unwrap();
    assert_eq!(rebuilt, buckets);
}

#[tokio::test]
async fn test_prune_only_removes_folded_events() {
    let config = Config::for_tests();
    let storage = open_storage(&config).await.unwrap();
    let app = App::with_storage(config, Arc::clone(&storage)).await.unwrap();
    let link = app.links.create(request("https://example.com")).await.unwrap();
    let router = app.router();

    resolve_times(&router, &link.short_code, 2).await;
    app.clicks.flush().await.unwrap();
    resolve_times(&router, &link.short_code, 1).await;
    app.clicks.sync_log().await.unwrap();

    // Everything is older than "now + 1 minute"; only folded events may go
    let cutoff = chrono::Utc::now().timestamp_millis() + 60_000;
    let deleted = storage.prune_click_events(cutoff).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(storage.click_events(&link.short_code, 10).await.unwrap().len(), 1);

    app.clicks.flush().await.unwrap();
    let stats = app
        .clicks
        .stats(&link.short_code, Default::default())
        .await
        .unwrap();
    assert_eq!(stats.total_clicks, 3);
}

#[tokio::test]
async fn test_summary_includes_pending_clicks() {
    let app = App::from_config(Config::for_tests()).await.unwrap();
    let router = app.router();

    let live = app.links.create(request("https://example.com/a")).await.unwrap();
    let dead = app.links.create(request("https://example.com/b")).await.unwrap();
    app.links.deactivate(&dead.short_code).await.unwrap();

    resolve_times(&router, &live.short_code, 4).await;
    app.clicks.sync_log().await.unwrap();

    let (status, summary) = get_json(&router, "/links/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["totalLinks"], 2);
    assert_eq!(summary["activeLinks"], 1);
    assert_eq!(summary["totalClicks"], 4);
}
