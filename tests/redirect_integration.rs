//! Redirect integration tests
//!
//! `GET /{code}` through the full router: status codes for every link state
//! and click counting on successful resolutions only.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use hopper::config::{Config, RedirectMode};
use hopper::storage::{CachedStorage, SqliteStorage, Storage};
use std::sync::Arc;
use hopper::App;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn create_test_app(config: Config) -> (App, Router) {
    let app = App::from_config(config).await.unwrap();
    let router = app.router();
    (app, router)
}

async fn create_link(router: &Router, body: Value) -> String {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/links")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let created: Value = serde_json::from_slice(&bytes).unwrap();
    created["code"].as_str().unwrap().to_string()
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> StatusCode {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    };
    router
        .clone()
        .oneshot(request.unwrap())
        .await
        .unwrap()
        .status()
}

async fn total_clicks(app: &App, code: &str) -> i64 {
    app.clicks.flush().await.unwrap();
    app.clicks
        .stats(code, Default::default())
        .await
        .unwrap()
        .total_clicks
}

#[tokio::test]
async fn test_redirect_active_link() {
    let (app, router) = create_test_app(Config::for_tests()).await;
    let code = create_link(
        &router,
        json!({"destinationURL": "https://example.com/very/long/path?q=1"}),
    )
    .await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/{code}"))
                .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0")
                .header(header::REFERER, "https://news.example/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://example.com/very/long/path?q=1"
    );
    assert!(response.headers().contains_key("x-hopper-timing-total-ms"));
    assert_eq!(total_clicks(&app, &code).await, 1);

    let events = app.storage.click_events(&code, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].referrer.as_deref(), Some("https://news.example/"));
    assert_eq!(events[0].user_agent_class, "desktop");
}

#[tokio::test]
async fn test_redirect_status_is_configurable() {
    let mut config = Config::for_tests();
    config.redirect_status = RedirectMode::PermanentRedirect;
    let (_app, router) = create_test_app(config).await;
    let code = create_link(&router, json!({"destinationURL": "https://example.com"})).await;

    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::PERMANENT_REDIRECT
    );
}

#[tokio::test]
async fn test_unknown_code_is_not_found() {
    let (_app, router) = create_test_app(Config::for_tests()).await;
    assert_eq!(
        send(&router, "GET", "/nope42", None).await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_deactivated_link_is_locked_and_not_counted() {
    let (app, router) = create_test_app(Config::for_tests()).await;
    let code = create_link(&router, json!({"destinationURL": "https://example.com"})).await;

    assert_eq!(
        send(&router, "DELETE", &format!("/links/{code}"), None).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::LOCKED
    );
    assert_eq!(total_clicks(&app, &code).await, 0);

    // Reactivate and resolve again
    assert_eq!(
        send(
            &router,
            "PATCH",
            &format!("/links/{code}"),
            Some(json!({"active": true}))
        )
        .await,
        StatusCode::OK
    );
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::FOUND
    );
    assert_eq!(total_clicks(&app, &code).await, 1);
}

#[tokio::test]
async fn test_expired_link_is_gone_even_when_inactive() {
    let (app, router) = create_test_app(Config::for_tests()).await;
    let code = create_link(&router, json!({"destinationURL": "https://example.com"})).await;

    assert_eq!(
        send(
            &router,
            "PATCH",
            &format!("/links/{code}"),
            Some(json!({"expiresAt": 1}))
        )
        .await,
        StatusCode::OK
    );
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::GONE
    );

    send(&router, "DELETE", &format!("/links/{code}"), None).await;
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::GONE
    );
    assert_eq!(total_clicks(&app, &code).await, 0);
}

#[tokio::test]
async fn test_concurrent_redirects_are_all_counted() {
    let (app, router) = create_test_app(Config::for_tests()).await;
    let code = create_link(&router, json!({"destinationURL": "https://example.com"})).await;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let router = router.clone();
        let uri = format!("/{code}");
        handles.push(tokio::spawn(async move {
            router
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap()
                .status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::FOUND);
    }

    assert_eq!(total_clicks(&app, &code).await, 50);
}

#[tokio::test]
async fn test_clicks_after_shutdown_are_dropped_not_failed() {
    let (app, router) = create_test_app(Config::for_tests()).await;
    let code = create_link(&router, json!({"destinationURL": "https://example.com"})).await;

    app.shutdown().await;

    // The redirect itself still succeeds
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::FOUND
    );
    assert_eq!(app.clicks.dropped_events(), 1);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health["status"], "OK");
    assert_eq!(health["droppedClickEvents"], 1);
}

fn cached_config() -> Config {
    let mut config = Config::for_tests();
    config.cache.max_entries = 10_000;
    config.cache.ttl_secs = 30;
    config
}

#[tokio::test]
async fn test_cached_redirects_follow_api_lifecycle_changes() {
    let (_app, router) = create_test_app(cached_config()).await;
    let code = create_link(&router, json!({"destinationURL": "https://example.com"})).await;

    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::FOUND
    );
    assert_eq!(
        send(&router, "DELETE", &format!("/links/{code}"), None).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::LOCKED
    );
}

#[tokio::test]
async fn test_cached_redirects_follow_changes_made_by_another_process() {
    let config = cached_config();
    let sqlite = SqliteStorage::new(&config.database.url, config.database.max_connections)
        .await
        .unwrap();
    sqlite.init().await.unwrap();
    let sqlite: Arc<dyn Storage> = Arc::new(sqlite);
    let cached: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        Arc::clone(&sqlite),
        config.cache.max_entries,
        config.cache.ttl_secs,
    ));
    let app = App::with_storage(config, cached).await.unwrap();
    let router = app.router();
    let code = create_link(&router, json!({"destinationURL": "https://example.com"})).await;

    // Warm the cache
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::FOUND
    );

    // hopper-admin writes to the database directly
    assert!(sqlite.deactivate(&code).await.unwrap());
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::LOCKED
    );

    sqlite.reactivate(&code).await.unwrap();
    sqlite.update_expiry(&code, Some(1)).await.unwrap();
    assert_eq!(
        send(&router, "GET", &format!("/{code}"), None).await,
        StatusCode::GONE
    );

    // Management reads agree with the redirect
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/links/{code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let link: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(link["expiresAt"], 1);
    assert_eq!(link["active"], true);

    assert_eq!(total_clicks(&app, &code).await, 1);
}
