use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::logging::MetricsLogger;
use crate::notification::message::Alert;
use crate::notification::webhook::AlertSink;
use crate::retry::{RetryConfig, RetryManager};
use crate::stats::PipelineStats;

/// Fire-and-forget alert delivery.
///
/// Each alert runs in its own task with bounded retries; after the last
/// attempt it is dropped and counted as failed. Callers never wait on delivery.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn AlertSink>,
    retry_config: RetryConfig,
    stats: Arc<PipelineStats>,
    in_flight: Arc<AtomicUsize>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, retry_config: RetryConfig, stats: Arc<PipelineStats>) -> Self {
        Self {
            sink,
            retry_config,
            stats,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn dispatch(&self, alert: Alert) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let dispatcher = self.clone();

        tokio::spawn(async move {
            dispatcher.deliver(alert).await;
            dispatcher.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Deliver with retries; returns whether the sink accepted the alert
    pub async fn deliver(&self, alert: Alert) -> bool {
        let retry_manager = RetryManager::new("dispatch", self.retry_config.clone());
        let attempts = AtomicUsize::new(0);

        let result = retry_manager
            .execute(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.sink.deliver(&alert)
            })
            .await;

        let delivered = result.is_ok();
        self.stats.record_notification(delivered);
        MetricsLogger::log_dispatch(
            alert.tx_hash.as_deref(),
            attempts.load(Ordering::Relaxed) as u32,
            delivered,
        );
        if let Err(e) = result {
            log::error!("Dropping alert {:?}: {}", alert.title, e);
        }

        delivered
    }

    /// Wait for in-flight alerts; false if some were still pending at the deadline
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("{} alert(s) still pending at shutdown", self.in_flight());
                return false;
            }
            sleep(Duration::from_millis(25)).await;
        }
    }
}
