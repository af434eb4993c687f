use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hopper::analytics::{Granularity, LinkStats};
use hopper::config::Config;
use hopper::storage::{SqliteStorage, Storage};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hopper-admin")]
#[command(about = "Hopper maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold logged click events into the counters
    Replay {
        /// Rebuild all counters from the whole event log
        #[arg(long)]
        full: bool,
    },
    /// Delete folded click events older than N days
    Prune {
        #[arg(long)]
        days: u32,
    },
    /// Stop a link from resolving
    Deactivate { code: String },
    /// Make a deactivated link resolve again
    Reactivate { code: String },
    /// List links, newest first
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show hourly click counts for a link
    Stats {
        code: String,
        /// Roll counts up per day
        #[arg(long)]
        daily: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Straight to SQLite; the read cache only lives inside the server
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("failed to open {}", config.database.url))?,
    );
    storage.init().await?;

    match cli.command {
        Commands::Replay { full } => {
            let report = storage.replay_click_events(full).await?;
            println!(
                "✓ Replayed {} click events ({}), watermark is now {}",
                report.events_replayed,
                if full { "full rebuild" } else { "incremental" },
                report.watermark
            );
        }
        Commands::Prune { days } => {
            if days == 0 {
                bail!("--days must be at least 1");
            }
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
            let deleted = storage
                .prune_click_events(cutoff.timestamp_millis())
                .await?;
            println!(
                "✓ Pruned {} folded click events older than {} days",
                deleted, days
            );
        }
        Commands::Deactivate { code } => {
            if storage.deactivate(&code).await? {
                println!("✓ Deactivated '{}'", code);
            } else {
                println!("⚠ No link with code '{}'", code);
            }
        }
        Commands::Reactivate { code } => {
            if storage.reactivate(&code).await? {
                println!("✓ Reactivated '{}'", code);
            } else {
                println!("⚠ No link with code '{}'", code);
            }
        }
        Commands::List { owner, limit } => {
            let links = storage
                .list(owner.as_deref(), None, limit.clamp(1, 500))
                .await?;
            if links.is_empty() {
                println!("No links found.");
            } else {
                println!("{:<12} {:<8} {:<12} {}", "Code", "Active", "Owner", "Destination");
                println!("{}", "-".repeat(80));
                for link in links {
                    println!(
                        "{:<12} {:<8} {:<12} {}",
                        link.short_code,
                        link.is_active,
                        link.owner_id.as_deref().unwrap_or("-"),
                        link.destination_url
                    );
                }
            }
        }
        Commands::Stats { code, daily } => {
            if storage.get(&code).await?.is_none() {
                bail!("no link with code '{}'", code);
            }
            let granularity = if daily {
                Granularity::Day
            } else {
                Granularity::Hour
            };
            let stats =
                LinkStats::from_hour_buckets(&code, storage.click_buckets(&code).await?, granularity);

            println!("{}: {} clicks (flushed)", stats.code, stats.total_clicks);
            for bucket in stats.buckets {
                let start = chrono::DateTime::from_timestamp(bucket.start, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| bucket.start.to_string());
                println!("  {:<18} {}", start, bucket.clicks);
            }
        }
    }

    Ok(())
}
