//! Data models for click analytics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket width of durable counters (one hour)
pub const BUCKET_SECS: i64 = 3600;

const DAY_SECS: i64 = 86_400;

/// Coarse classification of the client that followed a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserAgentClass {
    Bot,
    Mobile,
    Desktop,
    #[default]
    Unknown,
}

impl UserAgentClass {
    pub fn as_str(self) -> &'static str {
        match self {
            UserAgentClass::Bot => "bot",
            UserAgentClass::Mobile => "mobile",
            UserAgentClass::Desktop => "desktop",
            UserAgentClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UserAgentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserAgentClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bot" => UserAgentClass::Bot,
            "mobile" => UserAgentClass::Mobile,
            "desktop" => UserAgentClass::Desktop,
            _ => UserAgentClass::Unknown,
        })
    }
}

/// Where a click came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub referrer: Option<String>,
    /// ISO 3166-1 alpha-2 country code
    pub country: Option<String>,
    pub user_agent_class: UserAgentClass,
}

/// A single successful resolution, as emitted by the resolver
///
/// Events are append-only. The log sequence id is assigned when the
/// aggregator appends the event to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub link_code: String,
    /// Unix milliseconds
    pub occurred_at: i64,
    pub source: SourceMetadata,
}

impl ClickEvent {
    pub fn new(link_code: impl Into<String>, source: SourceMetadata) -> Self {
        Self {
            link_code: link_code.into(),
            occurred_at: chrono::Utc::now().timestamp_millis(),
            source,
        }
    }

    /// Start of the hour bucket this event counts towards (Unix seconds)
    pub fn bucket_start(&self) -> i64 {
        bucket_start_for_millis(self.occurred_at)
    }
}

pub fn bucket_start_for_millis(millis: i64) -> i64 {
    millis.div_euclid(BUCKET_SECS * 1000) * BUCKET_SECS
}

/// A logged click event read back from storage
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredClickEvent {
    pub id: i64,
    pub short_code: String,
    pub occurred_at: i64,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub user_agent_class: String,
}

/// Counter increment for one link and one hour bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketCount<'a> {
    pub short_code: &'a str,
    pub bucket_start: i64,
    pub clicks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StatsBucket {
    /// Bucket start (Unix seconds)
    pub start: i64,
    pub clicks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Hour,
    Day,
}

/// Click statistics for a single link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub code: String,
    #[serde(rename = "totalClicks")]
    pub total_clicks: i64,
    pub buckets: Vec<StatsBucket>,
}

impl LinkStats {
    /// Build stats from hour buckets, merging duplicates and rolling up to
    /// the requested granularity. Output is sorted by bucket start.
    pub fn from_hour_buckets(
        code: impl Into<String>,
        buckets: impl IntoIterator<Item = StatsBucket>,
        granularity: Granularity,
    ) -> Self {
        let mut merged = std::collections::BTreeMap::new();
        for bucket in buckets {
            let start = match granularity {
                Granularity::Hour => bucket.start,
                Granularity::Day => bucket.start.div_euclid(DAY_SECS) * DAY_SECS,
            };
            *merged.entry(start).or_insert(0i64) += bucket.clicks;
        }

        let buckets: Vec<StatsBucket> = merged
            .into_iter()
            .filter(|(_, clicks)| *clicks > 0)
            .map(|(start, clicks)| StatsBucket { start, clicks })
            .collect();
        let total_clicks = buckets.iter().map(|b| b.clicks).sum();

        Self {
            code: code.into(),
            total_clicks,
            buckets,
        }
    }
}

/// What a flush did with its pending increments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Increments were applied and the watermark advanced
    Applied { watermark: i64 },
    /// The watermark had moved (a replay ran concurrently), so the range was
    /// refolded from the event log instead
    Refolded { watermark: i64 },
}

impl FlushOutcome {
    pub fn watermark(self) -> i64 {
        match self {
            FlushOutcome::Applied { watermark } | FlushOutcome::Refolded { watermark } => watermark,
        }
    }
}

/// Result of folding logged events into the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub events_replayed: i64,
    pub watermark: i64,
}
