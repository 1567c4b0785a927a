use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Pipeline counters, updated lock-free from every task
#[derive(Debug)]
pub struct PipelineStats {
    started_at: Instant,
    blocks_processed: AtomicU64,
    transactions_scanned: AtomicU64,
    matches_found: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    fetch_failures: AtomicU64,
    heights_skipped: AtomicU64,
    last_latency_ms: AtomicU64,
    chain_height: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub blocks_processed: u64,
    pub transactions_scanned: u64,
    pub matches_found: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub fetch_failures: u64,
    pub heights_skipped: u64,
    pub last_latency_ms: u64,
    pub chain_height: u64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            blocks_processed: AtomicU64::new(0),
            transactions_scanned: AtomicU64::new(0),
            matches_found: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            heights_skipped: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
            chain_height: AtomicU64::new(0),
        }
    }

    pub fn record_block_processed(&self, transaction_count: usize, latency_ms: u64) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
        self.transactions_scanned.fetch_add(transaction_count as u64, Ordering::Relaxed);
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, count: u64) {
        self.heights_skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Chain height only moves forward; a lagging endpoint cannot pull it back
    pub fn observe_chain_height(&self, height: u64) {
        self.chain_height.fetch_max(height, Ordering::Relaxed);
    }

    pub fn chain_height(&self) -> u64 {
        self.chain_height.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            transactions_scanned: self.transactions_scanned.load(Ordering::Relaxed),
            matches_found: self.matches_found.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            heights_skipped: self.heights_skipped.load(Ordering::Relaxed),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
            chain_height: self.chain_height.load(Ordering::Relaxed),
        }
    }
}
