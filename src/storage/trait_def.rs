use crate::analytics::models::{
    BucketCount, ClickEvent, FlushOutcome, ReplayReport, StatsBucket, StoredClickEvent,
};
use crate::models::{Link, LinkSummary};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Keyset position for paginated listing (newest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListAfter {
    pub created_at: i64,
    pub id: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Atomically insert a link if the code is free; `Conflict` otherwise
    async fn create_with_code(
        &self,
        short_code: &str,
        destination_url: &str,
        owner_id: Option<&str>,
        expires_at: Option<i64>,
    ) -> StorageResult<Link>;

    /// Get a link by short code
    async fn get(&self, short_code: &str) -> Result<Option<Link>>;

    /// Get a link from the source of truth, never from a cache.
    /// Used where `is_active` and `expires_at` must be current.
    async fn get_current(&self, short_code: &str) -> Result<Option<Link>> {
        self.get(short_code).await
    }

    async fn exists(&self, short_code: &str) -> Result<bool>;

    /// Deactivate a link (soft delete). Returns false if the code is unknown.
    async fn deactivate(&self, short_code: &str) -> Result<bool>;

    /// Reactivate a link. Returns false if the code is unknown.
    async fn reactivate(&self, short_code: &str) -> Result<bool>;

    /// Set or clear the expiry. Returns false if the code is unknown.
    async fn update_expiry(&self, short_code: &str, expires_at: Option<i64>) -> Result<bool>;

    /// List links newest first, optionally restricted to one owner
    async fn list(
        &self,
        owner_id: Option<&str>,
        after: Option<ListAfter>,
        limit: i64,
    ) -> Result<Vec<Link>>;

    /// Link and click totals; `now` decides which links count as active
    async fn summary(&self, now: i64) -> Result<LinkSummary>;

    /// Append click events to the log in one transaction and return the
    /// highest sequence id assigned, if any
    async fn append_click_events(&self, events: &[ClickEvent]) -> Result<Option<i64>>;

    /// Apply counter increments covering the log range
    /// `(expected_watermark, up_to]` and advance the watermark to `up_to`.
    ///
    /// If the stored watermark no longer equals `expected_watermark`, the
    /// increments are discarded and the remaining range is folded from the
    /// log instead, so every logged event is counted exactly once.
    async fn apply_click_counts(
        &self,
        counts: &[BucketCount<'_>],
        expected_watermark: i64,
        up_to: i64,
    ) -> Result<FlushOutcome>;

    /// Fold logged events above the watermark into the counters. With
    /// `full`, counters are cleared and every retained event is refolded.
    async fn replay_click_events(&self, full: bool) -> Result<ReplayReport>;

    /// Highest event id already folded into the counters
    async fn click_watermark(&self) -> Result<i64>;

    /// Durable hour buckets for a link, oldest first
    async fn click_buckets(&self, short_code: &str) -> Result<Vec<StatsBucket>>;

    /// Logged events for a link, oldest first
    async fn click_events(&self, short_code: &str, limit: i64) -> Result<Vec<StoredClickEvent>>;

    /// Delete already-folded events older than `before_millis`
    async fn prune_click_events(&self, before_millis: i64) -> Result<u64>;
}
