//! Background click aggregation
//!
//! The resolver hands click events to [`ClickAggregator::record`], which only
//! does a non-blocking `try_send` on a bounded channel. A single actor task
//! owns everything behind the channel:
//!
//! - received events are appended to the durable click log in small batches
//!   (every `log_interval_ms`, or sooner when a batch fills up);
//! - increments for logged events accumulate per link and hour bucket in a
//!   shared map, where stats queries can see them;
//! - every `flush_interval_secs`, or once `flush_batch_size` increments are
//!   pending, the increments and the new log watermark are committed in one
//!   transaction.
//!
//! If the process dies between logging and flushing, the increments are
//! lost but the events are not: [`Storage::replay_click_events`] folds
//! everything above the watermark back into the counters.

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analytics::models::{
    BucketCount, ClickEvent, FlushOutcome, Granularity, LinkStats, StatsBucket,
};
use crate::config::ClickConfig;
use crate::models::LinkSummary;
use crate::storage::Storage;

/// Received events appended to the log in one go
const LOG_BATCH_SIZE: usize = 256;

/// Unlogged events kept while storage is failing before the oldest are dropped
const MAX_UNLOGGED_EVENTS: usize = 100_000;

/// Where a link's counters stand in the flush cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// Nothing pending
    #[default]
    Idle,
    /// Logged clicks waiting for the next flush
    Accumulating,
    /// Increments are being committed
    Flushed,
}

#[derive(Debug, Default)]
struct PendingCounts {
    phase: LinkPhase,
    /// Hour bucket start → clicks
    buckets: BTreeMap<i64, u64>,
}

enum ActorMessage {
    Record(ClickEvent),
    /// Append everything received so far to the log, without flushing
    SyncLog(oneshot::Sender<Result<()>>),
    /// Append and flush everything received so far
    Flush(oneshot::Sender<Result<Option<FlushOutcome>>>),
    Shutdown(oneshot::Sender<()>),
}

struct ClickActor {
    receiver: mpsc::Receiver<ActorMessage>,
    storage: Arc<dyn Storage>,
    /// Received but not yet logged (actor-local, no locks)
    buffer: Vec<ClickEvent>,
    /// Logged but not yet flushed, shared with stats readers
    pending: Arc<DashMap<String, PendingCounts>>,
    pending_clicks: usize,
    /// Watermark this actor last committed
    watermark: i64,
    /// Highest event id appended by this actor
    last_logged: i64,
    flush_gate: Arc<RwLock<()>>,
    dropped: Arc<AtomicU64>,
    log_interval: Duration,
    flush_interval: Duration,
    flush_batch_size: usize,
}

impl ClickActor {
    async fn run(mut self) {
        let mut log_ticker = tokio::time::interval(self.log_interval);
        let mut flush_ticker = tokio::time::interval(self.flush_interval);

        // Skip the first ticks which fire immediately
        log_ticker.tick().await;
        flush_ticker.tick().await;

        loop {
            tokio::select! {
                msg = self.receiver.recv() => {
                    match msg {
                        Some(ActorMessage::Record(event)) => {
                            self.buffer.push(event);
                            if self.buffer.len() >= LOG_BATCH_SIZE {
                                self.log_and_maybe_flush().await;
                            }
                        }
                        Some(ActorMessage::SyncLog(ack)) => {
                            let _ = ack.send(self.append_buffer().await);
                        }
                        Some(ActorMessage::Flush(ack)) => {
                            let result = match self.append_buffer().await {
                                Ok(()) => self.flush_counters().await,
                                Err(e) => Err(e),
                            };
                            let _ = ack.send(result);
                        }
                        Some(ActorMessage::Shutdown(ack)) => {
                            info!("Click aggregator received shutdown signal, flushing...");
                            self.final_flush().await;
                            let _ = ack.send(());
                            break;
                        }
                        None => {
                            warn!("Click aggregator channel closed unexpectedly, flushing...");
                            self.final_flush().await;
                            break;
                        }
                    }
                }
                _ = log_ticker.tick() => {
                    self.log_and_maybe_flush().await;
                }
                _ = flush_ticker.tick() => {
                    if let Err(e) = self.append_buffer().await {
                        error!("Failed to append click events: {:#}", e);
                    }
                    if let Err(e) = self.flush_counters().await {
                        error!("Failed to flush click counters: {:#}", e);
                    }
                }
            }
        }
    }

    async fn log_and_maybe_flush(&mut self) {
        if let Err(e) = self.append_buffer().await {
            error!("Failed to append click events: {:#}", e);
            return;
        }

        if self.pending_clicks >= self.flush_batch_size {
            if let Err(e) = self.flush_counters().await {
                error!("Failed to flush click counters: {:#}", e);
            }
        }
    }

    async fn final_flush(&mut self) {
        if let Err(e) = self.append_buffer().await {
            error!(
                unlogged = self.buffer.len(),
                "Failed to append click events on shutdown: {:#}", e
            );
        }
        match self.flush_counters().await {
            Ok(_) => info!("Click counters flushed successfully on shutdown"),
            Err(e) => error!(
                "Failed to flush click counters on shutdown, replay will recover them: {:#}",
                e
            ),
        }
    }

    /// Append buffered events to the log and count them as pending
    async fn append_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let appended = self.storage.append_click_events(&self.buffer).await;
        match appended {
            Ok(last_id) => {
                for event in self.buffer.drain(..) {
                    let bucket = event.bucket_start();
                    let mut entry = self.pending.entry(event.link_code).or_default();
                    entry.phase = LinkPhase::Accumulating;
                    *entry.buckets.entry(bucket).or_insert(0) += 1;
                    self.pending_clicks += 1;
                }
                if let Some(last_id) = last_id {
                    self.last_logged = self.last_logged.max(last_id);
                }
                Ok(())
            }
            Err(e) => {
                if self.buffer.len() > MAX_UNLOGGED_EVENTS {
                    let excess = self.buffer.len() - MAX_UNLOGGED_EVENTS;
                    self.buffer.drain(..excess);
                    self.dropped.fetch_add(excess as u64, Ordering::Relaxed);
                    warn!(dropped = excess, "Click log unavailable, dropped oldest events");
                }
                Err(e)
            }
        }
    }

    /// Commit pending increments and advance the watermark
    async fn flush_counters(&mut self) -> Result<Option<FlushOutcome>> {
        if self.pending_clicks == 0 {
            return Ok(None);
        }

        let _gate = self.flush_gate.write().await;

        let mut snapshot: Vec<(String, i64, u64)> = Vec::new();
        for mut entry in self.pending.iter_mut() {
            entry.phase = LinkPhase::Flushed;
            let code = entry.key().clone();
            for (&bucket, &clicks) in &entry.buckets {
                snapshot.push((code.clone(), bucket, clicks));
            }
        }

        let counts: Vec<BucketCount<'_>> = snapshot
            .iter()
            .map(|(code, bucket, clicks)| BucketCount {
                short_code: code,
                bucket_start: *bucket,
                clicks: *clicks,
            })
            .collect();

        let applied = self
            .storage
            .apply_click_counts(&counts, self.watermark, self.last_logged)
            .await;
        match applied {
            Ok(outcome) => {
                debug!(
                    links = self.pending.len(),
                    clicks = self.pending_clicks,
                    ?outcome,
                    "Flushed click counters"
                );
                self.pending.clear();
                self.pending_clicks = 0;
                self.watermark = outcome.watermark();
                Ok(Some(outcome))
            }
            Err(e) => {
                for mut entry in self.pending.iter_mut() {
                    entry.phase = LinkPhase::Accumulating;
                }
                Err(e)
            }
        }
    }
}

/// Handle to the click aggregation actor
pub struct ClickAggregator {
    storage: Arc<dyn Storage>,
    actor_tx: mpsc::Sender<ActorMessage>,
    pending: Arc<DashMap<String, PendingCounts>>,
    flush_gate: Arc<RwLock<()>>,
    dropped: Arc<AtomicU64>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl ClickAggregator {
    /// Spawn the aggregation actor. Must be called within a tokio runtime.
    pub async fn start(storage: Arc<dyn Storage>, config: &ClickConfig) -> Result<Self> {
        let watermark = storage.click_watermark().await?;
        let (actor_tx, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let pending = Arc::new(DashMap::new());
        let flush_gate = Arc::new(RwLock::new(()));
        let dropped = Arc::new(AtomicU64::new(0));

        let actor = ClickActor {
            receiver,
            storage: Arc::clone(&storage),
            buffer: Vec::new(),
            pending: Arc::clone(&pending),
            pending_clicks: 0,
            watermark,
            last_logged: watermark,
            flush_gate: Arc::clone(&flush_gate),
            dropped: Arc::clone(&dropped),
            log_interval: Duration::from_millis(config.log_interval_ms.max(1)),
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            flush_batch_size: config.flush_batch_size.max(1),
        };

        let handle = tokio::spawn(actor.run());

        Ok(Self {
            storage,
            actor_tx,
            pending,
            flush_gate,
            dropped,
            actor: Mutex::new(Some(handle)),
        })
    }

    /// Queue a click event without waiting. Returns false if it was dropped.
    ///
    /// This is the hot path; it never blocks on the log or the counters.
    pub fn record(&self, event: ClickEvent) -> bool {
        match self.actor_tx.try_send(ActorMessage::Record(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Logging every drop would add load exactly when the queue is saturated
                if total.is_power_of_two() {
                    warn!(dropped_total = total, "Click queue full, dropping click event");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Click aggregator stopped, dropping click event");
                false
            }
        }
    }

    /// Click events dropped because the queue was full or closed
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn phase(&self, short_code: &str) -> LinkPhase {
        self.pending
            .get(short_code)
            .map(|entry| entry.phase)
            .unwrap_or_default()
    }

    /// Logged clicks not yet flushed, across all links
    pub fn pending_total(&self) -> u64 {
        self.pending
            .iter()
            .map(|entry| entry.buckets.values().sum::<u64>())
            .sum()
    }

    /// Durable counters plus logged-but-unflushed clicks
    pub async fn stats(&self, short_code: &str, granularity: Granularity) -> Result<LinkStats> {
        let _gate = self.flush_gate.read().await;

        let mut buckets = self.storage.click_buckets(short_code).await?;
        if let Some(entry) = self.pending.get(short_code) {
            buckets.extend(entry.buckets.iter().map(|(&start, &clicks)| StatsBucket {
                start,
                clicks: clicks as i64,
            }));
        }

        Ok(LinkStats::from_hour_buckets(short_code, buckets, granularity))
    }

    /// Dashboard totals including unflushed clicks
    pub async fn summary(&self, now: i64) -> Result<LinkSummary> {
        let _gate = self.flush_gate.read().await;

        let mut summary = self.storage.summary(now).await?;
        summary.total_clicks += self.pending_total() as i64;
        Ok(summary)
    }

    /// Append every event queued so far to the log, leaving counters pending
    pub async fn sync_log(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.actor_tx
            .send(ActorMessage::SyncLog(ack))
            .await
            .map_err(|_| anyhow!("click aggregator is not running"))?;
        done.await
            .map_err(|_| anyhow!("click aggregator stopped before syncing"))?
    }

    /// Append and flush every event queued so far
    pub async fn flush(&self) -> Result<Option<FlushOutcome>> {
        let (ack, done) = oneshot::channel();
        self.actor_tx
            .send(ActorMessage::Flush(ack))
            .await
            .map_err(|_| anyhow!("click aggregator is not running"))?;
        done.await
            .map_err(|_| anyhow!("click aggregator stopped before flushing"))?
    }

    /// Flush everything and stop the actor
    pub async fn shutdown(&self) {
        let Some(handle) = self.actor.lock().await.take() else {
            return;
        };

        let (ack, done) = oneshot::channel();
        if self.actor_tx.send(ActorMessage::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = handle.await {
            error!("Click aggregator task failed: {}", e);
        }
    }

    /// Stop the actor immediately, discarding unflushed increments.
    ///
    /// Logged events stay in the click log and are recovered by replay.
    pub async fn abort(&self) {
        if let Some(handle) = self.actor.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.pending.clear();
        warn!("Click aggregator aborted; unflushed increments will be recovered by replay");
    }
}
