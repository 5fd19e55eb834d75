//! Scheduled full recompute of trending scores
//!
//! Walks every entity whose start time is still in the future, in fixed-size
//! batches with bounded parallelism inside each batch and sequential
//! progression across batches, so the store never sees more than
//! `parallelism` concurrent recomputes.
//!
//! Failure isolation: one entity failing (or timing out) is logged and the
//! sweep continues; a failed enumeration aborts the whole sweep, and the
//! next scheduled tick is the retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::score::refresh::ScoreRefreshService;
use crate::store::{Clock, EntityStore};
use crate::types::Result;

/// Tunables for the scheduled sweep
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Entities fetched and recomputed per batch
    pub batch_size: u64,
    /// Concurrent recomputes within a batch
    pub parallelism: usize,
    /// Cadence of the scheduled sweep
    pub interval: Duration,
    /// Run a sweep immediately at startup instead of waiting one interval
    pub sweep_on_start: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            parallelism: 8,
            interval: Duration::from_secs(86_400),
            sweep_on_start: false,
        }
    }
}

/// Outcome of one sweep run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Entities enumerated
    pub scanned: u64,
    /// Scores successfully recomputed and written
    pub refreshed: u64,
    /// Per-entity failures (logged, skipped)
    pub failed: u64,
    pub elapsed: Duration,
    /// True when a tick found a sweep already in progress and did nothing
    pub skipped: bool,
}

/// Periodic batch recompute over all active entities
pub struct SweepService {
    refresh: Arc<ScoreRefreshService>,
    entities: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    running: AtomicBool,
}

impl SweepService {
    pub fn new(
        refresh: Arc<ScoreRefreshService>,
        entities: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
    ) -> Self {
        Self {
            refresh,
            entities,
            clock,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run one full sweep. Overlapping runs are not allowed: if a sweep is
    /// already in progress this returns a `skipped` report immediately.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Trending sweep already in progress; skipping this run");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        }

        let result = self.run_sweep_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_sweep_inner(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let now = self.clock.now();

        let mut report = SweepReport::default();
        let mut offset = 0u64;

        loop {
            // Enumeration failure is sweep-fatal; the next tick retries
            let batch = self
                .entities
                .list_upcoming(now, offset, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len() as u64;

            let outcomes = stream::iter(batch.into_iter().map(|entity| {
                let refresh = Arc::clone(&self.refresh);
                async move { (entity.id, refresh.refresh(entity.id).await) }
            }))
            .buffer_unordered(self.config.parallelism)
            .collect::<Vec<_>>()
            .await;

            for (entity_id, outcome) in outcomes {
                match outcome {
                    Ok(_) => report.refreshed += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            entity_id = %entity_id,
                            error = %e,
                            "Score recompute failed during sweep; continuing"
                        );
                    }
                }
            }
            report.scanned += batch_len;

            if batch_len < self.config.batch_size {
                break;
            }
            offset += batch_len;
        }

        report.elapsed = started.elapsed();
        info!(
            scanned = report.scanned,
            refreshed = report.refreshed,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Trending sweep completed"
        );
        Ok(report)
    }
}

/// Spawn the sweep scheduler.
///
/// Ticks cannot overlap: the loop awaits each sweep before the next tick is
/// taken, and `run_sweep` itself refuses to run concurrently.
pub fn spawn_sweep_task(service: Arc<SweepService>) -> tokio::task::JoinHandle<()> {
    let interval = service.config.interval;
    let sweep_on_start = service.config.sweep_on_start;

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The first tick resolves immediately; consume it unless an
        // immediate sweep was requested
        if !sweep_on_start {
            ticker.tick().await;
        }

        loop {
            ticker.tick().await;
            if let Err(e) = service.run_sweep().await {
                error!(error = %e, "Trending sweep failed; will retry at next tick");
            }
        }
    });

    info!(
        interval_secs = interval.as_secs(),
        sweep_on_start = sweep_on_start,
        "Trending sweep task started"
    );
    handle
}

// ============================================================================
// Tests
// ============================================================================
