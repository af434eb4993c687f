use crate::analytics::models::{
    BucketCount, ClickEvent, FlushOutcome, ReplayReport, StatsBucket, StoredClickEvent,
};
use crate::models::{Link, LinkSummary};
use crate::storage::{ListAfter, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Read-through cache for link lookups
///
/// Every mutation that goes through this wrapper invalidates the cached row.
/// `get_current` always reads the inner store and refreshes the entry, so
/// redirects see changes made by other processes immediately.
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Read cache for link lookups, including misses
    read_cache: Cache<String, Option<Link>>,
    /// Bumped before every invalidation; a fill that overlaps a mutation
    /// is discarded
    generation: AtomicU64,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            read_cache,
            generation: AtomicU64::new(0),
        }
    }

    async fn invalidate_cache(&self, short_code: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.read_cache.invalidate(short_code).await;
    }

    /// Cache a row read while the generation was `seen`.
    ///
    /// If a mutation ran since, the row may predate it: drop the entry
    /// instead. The second check covers a mutation that lands between the
    /// first check and the insert.
    async fn fill(&self, short_code: &str, link: Option<Link>, seen: u64) {
        if self.generation.load(Ordering::SeqCst) != seen {
            return;
        }
        self.read_cache.insert(short_code.to_string(), link).await;
        if self.generation.load(Ordering::SeqCst) != seen {
            self.read_cache.invalidate(short_code).await;
        }
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_with_code(
        &self,
        short_code: &str,
        destination_url: &str,
        owner_id: Option<&str>,
        expires_at: Option<i64>,
    ) -> StorageResult<Link> {
        let result = self
            .inner
            .create_with_code(short_code, destination_url, owner_id, expires_at)
            .await;

        match &result {
            // Replaces a cached miss, if any
            Ok(link) => {
                self.read_cache
                    .insert(short_code.to_string(), Some(link.clone()))
                    .await
            }
            Err(_) => self.invalidate_cache(short_code).await,
        }

        result
    }

    async fn get(&self, short_code: &str) -> Result<Option<Link>> {
        if let Some(cached) = self.read_cache.get(short_code).await {
            return Ok(cached);
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let result = self.inner.get(short_code).await?;
        self.fill(short_code, result.clone(), seen).await;

        Ok(result)
    }

    async fn get_current(&self, short_code: &str) -> Result<Option<Link>> {
        let seen = self.generation.load(Ordering::SeqCst);
        let result = self.inner.get_current(short_code).await?;
        self.fill(short_code, result.clone(), seen).await;

        Ok(result)
    }

    async fn exists(&self, short_code: &str) -> Result<bool> {
        if let Some(Some(_)) = self.read_cache.get(short_code).await {
            return Ok(true);
        }
        // Misses are rechecked so a cached miss never hides a fresh insert
        self.inner.exists(short_code).await
    }

    async fn deactivate(&self, short_code: &str) -> Result<bool> {
        let result = self.inner.deactivate(short_code).await;
        self.invalidate_cache(short_code).await;
        result
    }

    async fn reactivate(&self, short_code: &str) -> Result<bool> {
        let result = self.inner.reactivate(short_code).await;
        self.invalidate_cache(short_code).await;
        result
    }

    async fn update_expiry(&self, short_code: &str, expires_at: Option<i64>) -> Result<bool> {
        let result = self.inner.update_expiry(short_code, expires_at).await;
        self.invalidate_cache(short_code).await;
        result
    }

    async fn list(
        &self,
        owner_id: Option<&str>,
        after: Option<ListAfter>,
        limit: i64,
    ) -> Result<Vec<Link>> {
        self.inner.list(owner_id, after, limit).await
    }

    async fn summary(&self, now: i64) -> Result<LinkSummary> {
        self.inner.summary(now).await
    }

    async fn append_click_events(&self, events: &[ClickEvent]) -> Result<Option<i64>> {
        self.inner.append_click_events(events).await
    }

    async fn apply_click_counts(
        &self,
        counts: &[BucketCount<'_>],
        expected_watermark: i64,
        up_to: i64,
    ) -> Result<FlushOutcome> {
        self.inner
            .apply_click_counts(counts, expected_watermark, up_to)
            .await
    }

    async fn replay_click_events(&self, full: bool) -> Result<ReplayReport> {
        self.inner.replay_click_events(full).await
    }

    async fn click_watermark(&self) -> Result<i64> {
        self.inner.click_watermark().await
    }

    async fn click_buckets(&self, short_code: &str) -> Result<Vec<StatsBucket>> {
        self.inner.click_buckets(short_code).await
    }

    async fn click_events(&self, short_code: &str, limit: i64) -> Result<Vec<StoredClickEvent>> {
        self.inner.click_events(short_code, limit).await
    }

    async fn prune_click_events(&self, before_millis: i64) -> Result<u64> {
        self.inner.prune_click_events(before_millis).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn setup() -> (Arc<dyn Storage>, CachedStorage) {
        let inner = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        inner.init().await.unwrap();
        let inner: Arc<dyn Storage> = Arc::new(inner);
        let cached = CachedStorage::new(Arc::clone(&inner), 100, 300);
        (inner, cached)
    }

    #[tokio::test]
    async fn test_cached_miss_replaced_by_create() {
        let (_, cached) = setup().await;

        assert!(cached.get("fresh").await.unwrap().is_none());
        cached
            .create_with_code("fresh", "https://example.com", None, None)
            .await
            .unwrap();

        let link = cached.get("fresh").await.unwrap().unwrap();
        assert_eq!(link.destination_url, "https://example.com");
    }

    #[tokio::test]
    async fn test_deactivate_invalidates_cached_row() {
        let (_, cached) = setup().await;
        cached
            .create_with_code("warm", "https://example.com", None, None)
            .await
            .unwrap();
        assert!(cached.get("warm").await.unwrap().unwrap().is_active);

        cached.deactivate("warm").await.unwrap();
        assert!(!cached.get("warm").await.unwrap().unwrap().is_active);

        cached.update_expiry("warm", Some(5)).await.unwrap();
        assert_eq!(cached.get("warm").await.unwrap().unwrap().expires_at, Some(5));
    }

    #[tokio::test]
    async fn test_exists_sees_inserts_made_behind_the_cache() {
        let (inner, cached) = setup().await;

        assert!(!cached.exists("behind").await.unwrap());
        assert!(cached.get("behind").await.unwrap().is_none());
        inner
            .create_with_code("behind", "https://example.com", None, None)
            .await
            .unwrap();

        assert!(cached.exists("behind").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_current_sees_changes_made_behind_the_cache() {
        let (inner, cached) = setup().await;
        cached
            .create_with_code("promo", "https://example.com", None, None)
            .await
            .unwrap();
        assert!(cached.get("promo").await.unwrap().unwrap().is_active);

        // Another process writes straight to the database
        inner.deactivate("promo").await.unwrap();

        assert!(!cached.get_current("promo").await.unwrap().unwrap().is_active);
        // The fresh row also replaced the cached one
        assert!(!cached.get("promo").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_fill_overlapping_a_mutation_is_discarded() {
        let (inner, cached) = setup().await;
        cached
            .create_with_code("race", "https://example.com", None, None)
            .await
            .unwrap();

        // A read starts and sees the row while it is still active...
        let seen = cached.generation.load(Ordering::SeqCst);
        let stale = inner.get("race").await.unwrap();
        // ...then a deactivation commits and invalidates...
        cached.deactivate("race").await.unwrap();
        // ...and the read finally tries to cache what it saw
        cached.fill("race", stale, seen).await;

        assert!(cached.read_cache.get("race").await.is_none());
        assert!(!cached.get("race").await.unwrap().unwrap().is_active);
    }
}
