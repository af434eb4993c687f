use crate::analytics::models::{
    BucketCount, ClickEvent, FlushOutcome, ReplayReport, StatsBucket, StoredClickEvent,
};
use crate::models::{Link, LinkSummary};
use crate::storage::{ListAfter, Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const LINK_COLUMNS: &str =
    "id, short_code, destination_url, created_at, expires_at, owner_id, is_active";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

/// Fold logged events in `(after, up_to]` into the counters.
/// Returns the number of events folded and the highest id seen.
async fn fold_click_events(
    conn: &mut SqliteConnection,
    after: i64,
    up_to: Option<i64>,
) -> Result<(i64, Option<i64>)> {
    let upper = up_to.unwrap_or(i64::MAX);

    let (count, max_id) = sqlx::query_as::<_, (i64, Option<i64>)>(
        "SELECT COUNT(*), MAX(id) FROM click_events WHERE id > ? AND id <= ?",
    )
    .bind(after)
    .bind(upper)
    .fetch_one(&mut *conn)
    .await?;

    if count > 0 {
        sqlx::query(
            r#"
            INSERT INTO click_counters (short_code, bucket_start, clicks)
            SELECT short_code, (occurred_at / 3600000) * 3600, COUNT(*)
            FROM click_events
            WHERE id > ? AND id <= ?
            GROUP BY short_code, (occurred_at / 3600000) * 3600
            ON CONFLICT (short_code, bucket_start) DO UPDATE SET
                clicks = clicks + excluded.clicks
            "#,
        )
        .bind(after)
        .bind(upper)
        .execute(&mut *conn)
        .await?;
    }

    Ok((count, max_id))
}

async fn read_watermark(conn: &mut SqliteConnection) -> Result<i64> {
    let watermark =
        sqlx::query_scalar::<_, i64>("SELECT last_event_id FROM click_watermark WHERE id = 1")
            .fetch_one(&mut *conn)
            .await?;
    Ok(watermark)
}

async fn write_watermark(conn: &mut SqliteConnection, watermark: i64) -> Result<()> {
    sqlx::query("UPDATE click_watermark SET last_event_id = ? WHERE id = 1")
        .bind(watermark)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL UNIQUE,
                destination_url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                owner_id TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_created ON links(created_at, id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner ON links(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        // Append-only click log, the source of truth for counters
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                referrer TEXT,
                country TEXT,
                user_agent_class TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_click_events_code ON click_events(short_code, id)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_click_events_time ON click_events(occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_counters (
                short_code TEXT NOT NULL,
                bucket_start INTEGER NOT NULL,
                clicks INTEGER NOT NULL,
                PRIMARY KEY (short_code, bucket_start)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_watermark (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_event_id INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "INSERT INTO click_watermark (id, last_event_id) VALUES (1, 0) ON CONFLICT (id) DO NOTHING",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_with_code(
        &self,
        short_code: &str,
        destination_url: &str,
        owner_id: Option<&str>,
        expires_at: Option<i64>,
    ) -> StorageResult<Link> {
        let created_at = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO links (short_code, destination_url, created_at, expires_at, owner_id, is_active)
            VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(short_code)
        .bind(destination_url)
        .bind(created_at)
        .bind(expires_at)
        .bind(owner_id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(Link {
            id: result.last_insert_rowid(),
            short_code: short_code.to_string(),
            destination_url: destination_url.to_string(),
            created_at,
            expires_at,
            owner_id: owner_id.map(str::to_string),
            is_active: true,
        })
    }

    async fn get(&self, short_code: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?"
        ))
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn exists(&self, short_code: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM links WHERE short_code = ?")
            .bind(short_code)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(found.is_some())
    }

    async fn deactivate(&self, short_code: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE links SET is_active = 0 WHERE short_code = ?")
            .bind(short_code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reactivate(&self, short_code: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE links SET is_active = 1 WHERE short_code = ?")
            .bind(short_code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_expiry(&self, short_code: &str, expires_at: Option<i64>) -> Result<bool> {
        let result = sqlx::query("UPDATE links SET expires_at = ? WHERE short_code = ?")
            .bind(expires_at)
            .bind(short_code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        owner_id: Option<&str>,
        after: Option<ListAfter>,
        limit: i64,
    ) -> Result<Vec<Link>> {
        let after_created = after.map(|a| a.created_at);
        let after_id = after.map(|a| a.id);

        let links = sqlx::query_as::<_, Link>(&format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM links
            WHERE (? IS NULL OR owner_id = ?)
              AND (? IS NULL OR created_at < ? OR (created_at = ? AND id < ?))
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(owner_id)
        .bind(owner_id)
        .bind(after_created)
        .bind(after_created)
        .bind(after_created)
        .bind(after_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn summary(&self, now: i64) -> Result<LinkSummary> {
        let summary = sqlx::query_as::<_, LinkSummary>(
            r#"
            SELECT
                COUNT(*) AS total_links,
                COALESCE(SUM(CASE WHEN is_active = 1 AND (expires_at IS NULL OR expires_at >= ?)
                    THEN 1 ELSE 0 END), 0) AS active_links,
                (SELECT COALESCE(SUM(clicks), 0) FROM click_counters) AS total_clicks
            FROM links
            "#,
        )
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(summary)
    }

    async fn append_click_events(&self, events: &[ClickEvent]) -> Result<Option<i64>> {
        if events.is_empty() {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;
        let mut last_id = None;

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO click_events (short_code, occurred_at, referrer, country, user_agent_class)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.link_code)
            .bind(event.occurred_at)
            .bind(event.source.referrer.as_deref())
            .bind(event.source.country.as_deref())
            .bind(event.source.user_agent_class.as_str())
            .execute(&mut *tx)
            .await?;

            last_id = Some(result.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(last_id)
    }

    async fn apply_click_counts(
        &self,
        counts: &[BucketCount<'_>],
        expected_watermark: i64,
        up_to: i64,
    ) -> Result<FlushOutcome> {
        let mut tx = self.pool.begin().await?;
        let current = read_watermark(&mut *tx).await?;

        if up_to <= current {
            // A replay already folded this range
            tx.commit().await?;
            return Ok(FlushOutcome::Refolded { watermark: current });
        }

        if current != expected_watermark {
            fold_click_events(&mut *tx, current, Some(up_to)).await?;
            write_watermark(&mut *tx, up_to).await?;
            tx.commit().await?;
            return Ok(FlushOutcome::Refolded { watermark: up_to });
        }

        for count in counts {
            sqlx::query(
                r#"
                INSERT INTO click_counters (short_code, bucket_start, clicks)
                VALUES (?, ?, ?)
                ON CONFLICT (short_code, bucket_start) DO UPDATE SET
                    clicks = clicks + excluded.clicks
                "#,
            )
            .bind(count.short_code)
            .bind(count.bucket_start)
            .bind(count.clicks as i64)
            .execute(&mut *tx)
            .await?;
        }

        write_watermark(&mut *tx, up_to).await?;
        tx.commit().await?;

        Ok(FlushOutcome::Applied { watermark: up_to })
    }

    async fn replay_click_events(&self, full: bool) -> Result<ReplayReport> {
        let mut tx = self.pool.begin().await?;

        if full {
            sqlx::query("DELETE FROM click_counters")
                .execute(&mut *tx)
                .await?;
            write_watermark(&mut *tx, 0).await?;
        }

        let current = read_watermark(&mut *tx).await?;
        let (events_replayed, max_id) = fold_click_events(&mut *tx, current, None).await?;
        let watermark = max_id.unwrap_or(current).max(current);
        write_watermark(&mut *tx, watermark).await?;

        tx.commit().await?;

        Ok(ReplayReport {
            events_replayed,
            watermark,
        })
    }

    async fn click_watermark(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        read_watermark(&mut *conn).await
    }

    async fn click_buckets(&self, short_code: &str) -> Result<Vec<StatsBucket>> {
        let buckets = sqlx::query_as::<_, StatsBucket>(
            r#"
            SELECT bucket_start AS start, clicks
            FROM click_counters
            WHERE short_code = ?
            ORDER BY bucket_start
            "#,
        )
        .bind(short_code)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(buckets)
    }

    async fn click_events(&self, short_code: &str, limit: i64) -> Result<Vec<StoredClickEvent>> {
        let events = sqlx::query_as::<_, StoredClickEvent>(
            r#"
            SELECT id, short_code, occurred_at, referrer, country, user_agent_class
            FROM click_events
            WHERE short_code = ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(short_code)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(events)
    }

    async fn prune_click_events(&self, before_millis: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM click_events
            WHERE occurred_at < ?
              AND id <= (SELECT last_event_id FROM click_watermark WHERE id = 1)
            "#,
        )
        .bind(before_millis)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}
