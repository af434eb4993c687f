use anyhow::{bail, Context};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::links::CodeGenerator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    /// Public base URL used to build `shortURL` values
    pub base_url: String,
    pub codes: CodeConfig,
    pub cache: CacheConfig,
    pub clicks: ClickConfig,
    pub pagination: PaginationConfig,
    pub redirect_status: RedirectMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Length of generated codes (minimum 4)
    pub length: usize,
    /// Draws allowed per creation before giving up with `ExhaustedKeyspace`
    pub max_attempts: u32,
    /// Drop `0 O 1 l I` from the alphabet
    pub exclude_ambiguous: bool,
    pub max_alias_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Zero disables the read cache
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickConfig {
    /// Bound of the resolver → aggregator queue
    pub queue_capacity: usize,
    /// How often received events are appended to the event log
    pub log_interval_ms: u64,
    /// How often pending counter increments are flushed
    pub flush_interval_secs: u64,
    /// Pending increments that force an early flush
    pub flush_batch_size: usize,
    /// Fold unflushed events into the counters before serving
    pub replay_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// If None, a random key is used and cursors do not survive restarts
    pub cursor_hmac_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RedirectMode {
    MovedPermanently,
    #[default]
    Found,
    TemporaryRedirect,
    PermanentRedirect,
}

impl RedirectMode {
    pub fn status_code(self) -> StatusCode {
        match self {
            RedirectMode::MovedPermanently => StatusCode::MOVED_PERMANENTLY,
            RedirectMode::Found => StatusCode::FOUND,
            RedirectMode::TemporaryRedirect => StatusCode::TEMPORARY_REDIRECT,
            RedirectMode::PermanentRedirect => StatusCode::PERMANENT_REDIRECT,
        }
    }
}

impl FromStr for RedirectMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "301" => Ok(RedirectMode::MovedPermanently),
            "302" => Ok(RedirectMode::Found),
            "307" => Ok(RedirectMode::TemporaryRedirect),
            "308" => Ok(RedirectMode::PermanentRedirect),
            other => bail!("unsupported REDIRECT_STATUS '{other}', expected 301, 302, 307 or 308"),
        }
    }
}

impl CodeConfig {
    /// Reject settings that would make every generated-code creation fail
    pub fn validate(&self) -> anyhow::Result<()> {
        CodeGenerator::validate_length(self.length).context("invalid CODE_LENGTH")?;
        if self.max_attempts == 0 {
            bail!("CODE_MAX_ATTEMPTS must be at least 1");
        }
        Ok(())
    }
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            length: 6,
            max_attempts: 5,
            exclude_ambiguous: false,
            max_alias_length: 32,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 30,
        }
    }
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            log_interval_ms: 100,
            flush_interval_secs: 5,
            flush_batch_size: 1_000,
            replay_on_startup: true,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or("DATABASE_URL", "sqlite://./hopper.db?mode=rwc");
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 5u32)?;

        let host = env_or("HOST", "127.0.0.1");
        let port = env_parse("PORT", 8080u16)?;
        let base_url = env_or("BASE_URL", &format!("http://localhost:{port}"));

        let code_defaults = CodeConfig::default();
        let codes = CodeConfig {
            length: env_parse("CODE_LENGTH", code_defaults.length)?,
            max_attempts: env_parse("CODE_MAX_ATTEMPTS", code_defaults.max_attempts)?,
            exclude_ambiguous: env_flag("CODE_EXCLUDE_AMBIGUOUS", code_defaults.exclude_ambiguous),
            max_alias_length: env_parse("ALIAS_MAX_LENGTH", code_defaults.max_alias_length)?,
        };

        codes.validate()?;

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: env_parse("CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            ttl_secs: env_parse("CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
        };

        let click_defaults = ClickConfig::default();
        let clicks = ClickConfig {
            queue_capacity: env_parse("CLICK_QUEUE_CAPACITY", click_defaults.queue_capacity)?,
            log_interval_ms: env_parse("CLICK_LOG_INTERVAL_MS", click_defaults.log_interval_ms)?,
            flush_interval_secs: env_parse(
                "CLICK_FLUSH_INTERVAL_SECS",
                click_defaults.flush_interval_secs,
            )?,
            flush_batch_size: env_parse("CLICK_FLUSH_BATCH_SIZE", click_defaults.flush_batch_size)?,
            replay_on_startup: env_flag("REPLAY_ON_STARTUP", click_defaults.replay_on_startup),
        };

        if clicks.queue_capacity == 0 {
            bail!("CLICK_QUEUE_CAPACITY must be at least 1");
        }

        let redirect_status = match std::env::var("REDIRECT_STATUS") {
            Ok(raw) => raw.parse::<RedirectMode>()?,
            Err(_) => RedirectMode::default(),
        };

        let cursor_hmac_secret = std::env::var("CURSOR_HMAC_SECRET").ok();
        if cursor_hmac_secret.is_none() {
            tracing::warn!(
                "CURSOR_HMAC_SECRET is not set; pagination cursors will not survive restarts"
            );
        }

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            base_url,
            codes,
            cache,
            clicks,
            pagination: PaginationConfig { cursor_hmac_secret },
            redirect_status,
        })
    }

    /// Configuration suitable for tests: in-memory SQLite, cache disabled
    pub fn for_tests() -> Self {
        Config {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            base_url: "http://localhost:8080".to_string(),
            codes: CodeConfig::default(),
            cache: CacheConfig {
                max_entries: 0,
                ttl_secs: 30,
            },
            clicks: ClickConfig {
                log_interval_ms: 10,
                flush_interval_secs: 3600,
                ..ClickConfig::default()
            },
            pagination: PaginationConfig {
                cursor_hmac_secret: Some("test-cursor-secret".to_string()),
            },
            redirect_status: RedirectMode::default(),
        }
    }
}
