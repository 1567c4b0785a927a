use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::blockchain::gap_scanner::{BackfillPlan, GapTracker};
use crate::blockchain::head_subscription::SubscriptionHealth;
use crate::blockchain::{ChainClient, HeightEvent, HeightSource};
use crate::config::{ProcessingConfig, SubscriptionConfig};
use crate::error::{ErrorSeverity, Result};
use crate::logging::{ErrorLogger, LogContext, MetricsLogger};
use crate::stats::PipelineStats;

/// Interval height polling, the fallback intake when the subscription is quiet.
pub struct BlockPoller {
    chain_client: Arc<ChainClient>,
    tracker: Arc<Mutex<GapTracker>>,
    sender: mpsc::Sender<HeightEvent>,
    stats: Arc<PipelineStats>,
    health: SubscriptionHealth,
    poll_interval: Duration,
    healthy_poll_interval: Duration,
    stale_after: Duration,
    max_backfill_blocks: u64,
    last_seen: u64,
}

impl BlockPoller {
    pub fn new(
        chain_client: Arc<ChainClient>,
        tracker: Arc<Mutex<GapTracker>>,
        sender: mpsc::Sender<HeightEvent>,
        stats: Arc<PipelineStats>,
        health: SubscriptionHealth,
        processing: &ProcessingConfig,
        subscription: &SubscriptionConfig,
        start_height: u64,
    ) -> Self {
        Self {
            chain_client,
            tracker,
            sender,
            stats,
            health,
            poll_interval: Duration::from_secs(processing.poll_interval_seconds),
            healthy_poll_interval: Duration::from_secs(processing.healthy_poll_interval_seconds),
            stale_after: Duration::from_secs(subscription.stale_after_seconds),
            max_backfill_blocks: processing.max_backfill_blocks,
            last_seen: start_height,
        }
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Slow down while the subscription is delivering
    pub fn current_interval(&self) -> Duration {
        if self.health.is_healthy(self.stale_after) {
            self.healthy_poll_interval
        } else {
            self.poll_interval
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Block poller started from height {}", self.last_seen);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(count) => debug!("Poller submitted {} heights, last seen {}", count, self.last_seen),
                Err(e) => {
                    // Transient failures only warrant a warning, the next tick retries
                    if e.severity() == ErrorSeverity::Critical {
                        ErrorLogger::log_error(&e, Some(LogContext::new("block_poller", "poll")));
                    } else {
                        LogContext::new("block_poller", "poll").warn(&format!("Poll failed: {}", e));
                    }
                }
            }

            let interval = self.current_interval();
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(interval) => {}
            }
        }

        info!("Block poller stopped at height {}", self.last_seen);
    }

    /// One polling tick. Returns the number of heights submitted.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let current = self.chain_client.get_chain_height().await?;
        self.stats.observe_chain_height(current);

        if current <= self.last_seen {
            return Ok(0);
        }

        // Heights the other producers already confirmed are not a backlog
        let watermark = self.tracker.lock().unwrap_or_else(|e| e.into_inner()).watermark();
        let from = self.last_seen.max(watermark) + 1;
        if current < from {
            self.last_seen = current;
            return Ok(0);
        }

        let plan = BackfillPlan::new(from, current, self.max_backfill_blocks);
        if let Some(skipped) = &plan.skipped {
            MetricsLogger::log_skipped_range(*skipped.start(), *skipped.end(), self.max_backfill_blocks);
            let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
            let already = (*skipped.start()..=*skipped.end())
                .filter(|h| tracker.is_confirmed(*h))
                .count() as u64;
            self.stats.record_skipped(plan.skipped_count() - already);
            tracker.skip_through(*skipped.end());
        }

        let mut submitted = 0;
        for height in plan.process.clone() {
            let event = HeightEvent { height, source: HeightSource::Poller };
            if self.sender.send(event).await.is_err() {
                break;
            }
            submitted += 1;
            self.last_seen = height;
        }

        Ok(submitted)
    }
}
