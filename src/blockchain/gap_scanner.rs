use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::blockchain::{ChainClient, HeightEvent, HeightSource};
use crate::error::Result;
use crate::logging::MetricsLogger;
use crate::stats::PipelineStats;

/// Split `from..=to` into the heights to process and the heights to skip
/// when the range is longer than `cap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillPlan {
    pub skipped: Option<RangeInclusive<u64>>,
    pub process: RangeInclusive<u64>,
}

impl BackfillPlan {
    /// `from <= to` is expected; an inverted range yields an empty plan
    pub fn new(from: u64, to: u64, cap: u64) -> Self {
        let cap = cap.max(1);
        if to < from || to - from < cap {
            return Self { skipped: None, process: from..=to };
        }

        let first_kept = to - cap + 1;
        Self {
            skipped: Some(from..=first_kept - 1),
            process: first_kept..=to,
        }
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped
            .as_ref()
            .map(|r| r.end() - r.start() + 1)
            .unwrap_or(0)
    }
}

/// Watermark of fully processed heights plus the confirmed ones above it
#[derive(Debug, Clone)]
pub struct GapTracker {
    watermark: u64,
    confirmed: BTreeSet<u64>,
}

impl GapTracker {
    pub fn new(watermark: u64) -> Self {
        Self {
            watermark,
            confirmed: BTreeSet::new(),
        }
    }

    /// Highest height with no unconfirmed height at or below it
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn confirm(&mut self, height: u64) {
        if height <= self.watermark {
            return;
        }
        self.confirmed.insert(height);
        self.advance();
    }

    /// Jump the watermark over heights that will never be processed
    pub fn skip_through(&mut self, height: u64) {
        if height <= self.watermark {
            return;
        }
        self.watermark = height;
        self.confirmed = self.confirmed.split_off(&(height + 1));
        self.advance();
    }

    pub fn is_confirmed(&self, height: u64) -> bool {
        height <= self.watermark || self.confirmed.contains(&height)
    }

    /// Unconfirmed heights in `watermark+1 ..= up_to`
    pub fn missing(&self, up_to: u64) -> Vec<u64> {
        if up_to <= self.watermark {
            return Vec::new();
        }
        (self.watermark + 1..=up_to)
            .filter(|h| !self.confirmed.contains(h))
            .collect()
    }

    fn advance(&mut self) {
        while self.confirmed.remove(&(self.watermark + 1)) {
            self.watermark += 1;
        }
    }
}

/// Periodically re-submits heights the watermark has not reached yet
pub struct GapScanner {
    chain_client: Arc<ChainClient>,
    tracker: Arc<Mutex<GapTracker>>,
    sender: mpsc::Sender<HeightEvent>,
    stats: Arc<PipelineStats>,
    interval: Duration,
    max_backfill_blocks: u64,
}

impl GapScanner {
    pub fn new(
        chain_client: Arc<ChainClient>,
        tracker: Arc<Mutex<GapTracker>>,
        sender: mpsc::Sender<HeightEvent>,
        stats: Arc<PipelineStats>,
        interval: Duration,
        max_backfill_blocks: u64,
    ) -> Self {
        Self {
            chain_client,
            tracker,
            sender,
            stats,
            interval,
            max_backfill_blocks,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Gap scanner started with {}s interval", self.interval.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(self.interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            match self.scan_once().await {
                Ok(0) => {}
                Ok(count) => debug!("Gap scanner re-submitted {} heights", count),
                Err(e) => warn!("Gap scan failed: {}", e),
            }
        }

        info!("Gap scanner stopped");
    }

    /// Compare the watermark against the chain head and enqueue the holes.
    /// Returns the number of heights submitted.
    pub async fn scan_once(&self) -> Result<usize> {
        let current = self.chain_client.get_chain_height().await?;
        self.stats.observe_chain_height(current);

        let missing = {
            let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
            let watermark = tracker.watermark();
            if current <= watermark.saturating_add(1) {
                return Ok(0);
            }

            let plan = BackfillPlan::new(watermark + 1, current, self.max_backfill_blocks);
            if let Some(skipped) = &plan.skipped {
                MetricsLogger::log_skipped_range(*skipped.start(), *skipped.end(), self.max_backfill_blocks);
                let already = (*skipped.start()..=*skipped.end())
                    .filter(|h| tracker.is_confirmed(*h))
                    .count() as u64;
                self.stats.record_skipped(plan.skipped_count() - already);
                tracker.skip_through(*skipped.end());
            }
            tracker.missing(current)
        };

        let mut submitted = 0;
        for height in missing {
            let event = HeightEvent { height, source: HeightSource::GapScanner };
            if self.sender.send(event).await.is_err() {
                break;
            }
            submitted += 1;
        }

        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_plan_within_cap() {
        let plan = BackfillPlan::new(101, 110, 50);
        assert_eq!(plan.skipped, None);
        assert_eq!(plan.process, 101..=110);
        assert_eq!(plan.skipped_count(), 0);
    }

    #[test]
    fn test_backfill_plan_over_cap() {
        let plan = BackfillPlan::new(1, 100, 50);
        assert_eq!(plan.skipped, Some(1..=50));
        assert_eq!(plan.process, 51..=100);
        assert_eq!(plan.skipped_count(), 50);

        // Exactly cap heights fit
        let plan = BackfillPlan::new(51, 100, 50);
        assert_eq!(plan.skipped, None);
    }

    #[test]
    fn test_tracker_advances_over_contiguous_heights() {
        let mut tracker = GapTracker::new(99);
        tracker.confirm(101);
        tracker.confirm(102);
        assert_eq!(tracker.watermark(), 99);
        assert_eq!(tracker.missing(103), vec![100, 103]);

        tracker.confirm(100);
        assert_eq!(tracker.watermark(), 102);
        assert!(tracker.is_confirmed(101));
        assert_eq!(tracker.missing(103), vec![103]);
    }

    #[test]
    fn test_tracker_ignores_old_heights() {
        let mut tracker = GapTracker::new(50);
        tracker.confirm(10);
        assert_eq!(tracker.watermark(), 50);
        assert!(tracker.missing(50).is_empty());
    }

    #[test]
    fn test_skip_through() {
        let mut tracker = GapTracker::new(0);
        tracker.confirm(5);
        tracker.confirm(12);
        tracker.confirm(11);

        tracker.skip_through(10);
        assert_eq!(tracker.watermark(), 12);
        assert_eq!(tracker.missing(14), vec![13, 14]);

        // Moving backwards is a no-op
        tracker.skip_through(3);
        assert_eq!(tracker.watermark(), 12);
    }
}
