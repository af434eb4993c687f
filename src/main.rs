use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hopper::config::Config;
use hopper::App;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hopper=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let app = App::from_config(config).await?;
    let router = app.router();

    let addr = format!("{}:{}", app.config.server.host, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Hopper listening on http://{}", addr);
    info!("   - Short links resolve at {}/{{code}}", app.config.base_url);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, flushing pending clicks...");
    app.shutdown().await;
    info!("Bye");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
