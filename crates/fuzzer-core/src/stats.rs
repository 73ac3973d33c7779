//! Run counters and their single owner.
//!
//! Workers and the producer never touch the counters directly: they send
//! [`StatsUpdate`]s through a bounded queue to the [`StatsAggregator`] task,
//! which applies them in order, publishes a [`StatsSnapshot`] on a watch
//! channel, and periodically emits throughput/progress events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::FuzzConfig;
use crate::events::EventPublisher;
use crate::models::Event;
use crate::report::{RunEvent, RunReporter};

/// A single counter mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsUpdate {
    /// Wordlist pre-count finished with this many jobs.
    Total(u64),
    Processed,
    Error,
    Saved,
}

/// Sender side of the stats queue.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<StatsUpdate>,
}

impl StatsHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatsUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Blocks while the queue is full. Updates sent after the aggregator
    /// stopped are dropped.
    pub async fn send(&self, update: StatsUpdate) {
        let _ = self.tx.send(update).await;
    }
}

/// Read-only view of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub total_finalized: bool,
    pub processed: u64,
    pub errors: u64,
    pub saved: u64,
    pub req_per_sec: f64,
    pub started_at: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    pub fn left(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }

    /// All counted jobs are processed. False until the total is final.
    pub fn is_complete(&self) -> bool {
        self.total_finalized && self.processed >= self.total
    }
}

/// Mutable counters, owned by the aggregator.
#[derive(Debug, Clone)]
pub struct Stats {
    pub total: u64,
    pub total_finalized: bool,
    pub processed: u64,
    pub errors: u64,
    pub saved: u64,
    pub req_per_sec: f64,
    pub last_calculated: Instant,
    pub last_processed: u64,
}

impl Stats {
    pub fn new(now: Instant) -> Self {
        Self {
            total: 0,
            total_finalized: false,
            processed: 0,
            errors: 0,
            saved: 0,
            req_per_sec: 0.0,
            last_calculated: now,
            last_processed: 0,
        }
    }

    pub fn apply(&mut self, update: StatsUpdate) {
        match update {
            StatsUpdate::Total(total) => {
                self.total = total;
                self.total_finalized = true;
            }
            StatsUpdate::Processed => self.processed += 1,
            StatsUpdate::Error => self.errors += 1,
            StatsUpdate::Saved => self.saved += 1,
        }
    }

    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_calculated) > interval
    }

    /// Rate since the previous calculation, not a cumulative average.
    pub fn calculate(&mut self, now: Instant) -> f64 {
        let elapsed = now
            .saturating_duration_since(self.last_calculated)
            .as_secs_f64();
        let delta = self.processed.saturating_sub(self.last_processed);
        self.req_per_sec = if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        };
        self.last_calculated = now;
        self.last_processed = self.processed;
        self.req_per_sec
    }

    pub fn snapshot(&self, started_at: DateTime<Utc>) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total,
            total_finalized: self.total_finalized,
            processed: self.processed,
            errors: self.errors,
            saved: self.saved,
            req_per_sec: self.req_per_sec,
            started_at: Some(started_at),
        }
    }
}

/// The task that owns [`Stats`].
pub struct StatsAggregator<R: RunReporter> {
    stats: Stats,
    updates: mpsc::Receiver<StatsUpdate>,
    snapshots: watch::Sender<StatsSnapshot>,
    events: EventPublisher,
    reporter: Arc<R>,
    config: Arc<FuzzConfig>,
    workers: usize,
    started_at: DateTime<Utc>,
}

impl<R: RunReporter> StatsAggregator<R> {
    pub fn new(
        updates: mpsc::Receiver<StatsUpdate>,
        snapshots: watch::Sender<StatsSnapshot>,
        events: EventPublisher,
        reporter: Arc<R>,
        config: Arc<FuzzConfig>,
        workers: usize,
    ) -> Self {
        Self {
            stats: Stats::new(Instant::now()),
            updates,
            snapshots,
            events,
            reporter,
            config,
            workers,
            started_at: Utc::now(),
        }
    }

    /// Run until cancellation.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let interval = self.config.timings.stats_interval;
        self.publish();

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                update = self.updates.recv() => match update {
                    Some(update) => {
                        self.stats.apply(update);
                        self.publish();
                        if self.stats.is_due(Instant::now(), interval) {
                            self.calculate().await;
                        }
                    }
                    None => {
                        // Every sender is gone; nothing left to count.
                        cancel_token.cancelled().await;
                        break;
                    }
                },
                () = tokio::time::sleep(interval) => self.calculate().await,
            }
        }

        self.publish();
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(self.stats.snapshot(self.started_at));
    }

    async fn calculate(&mut self) {
        let per_second = self.stats.calculate(Instant::now());
        let snapshot = self.stats.snapshot(self.started_at);
        self.snapshots.send_replace(snapshot.clone());

        self.events.publish(Event::Throughput { per_second }).await;
        self.events
            .publish(Event::Progress {
                processed: snapshot.processed,
                total: snapshot.total,
            })
            .await;

        if !self.config.silent {
            self.reporter.report(RunEvent::Stats {
                url: &self.config.url,
                proxy_url: self.config.proxy(),
                workers: self.workers,
                snapshot: &snapshot,
            });
        }
    }
}
