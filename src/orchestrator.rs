use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at};

use crate::blockchain::{
    BlockPoller, BlockProcessor, ChainClient, Deduplicator, GapScanner, GapTracker, HeadSubscription,
    HeightEvent, SubscriptionHealth, SubscriptionStatus, TokenMetadataCache,
};
use crate::config::AppConfig;
use crate::error::{Result, SystemError};
use crate::logging::{ErrorLogger, LogContext, MetricsLogger};
use crate::models::{MatchEvent, WatchList};
use crate::notification::{
    format_match_alert, format_startup_alert, format_token_alert, AlertSink, LogSink, NotificationDispatcher,
    WebhookSink,
};
use crate::retry::{RetryConfig, RetryManager};
use crate::stats::{PipelineStats, StatsSnapshot};

/// What happened to a candidate height at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightOutcome {
    /// Already admitted, confirmed or skipped
    Duplicate,
    Processed { matches: usize, alerts: usize },
    /// Fetch or decode failed; the height was released for a later retry
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub last_confirmed_height: u64,
    pub blocks_behind: u64,
    pub subscription: SubscriptionStatus,
    pub active_endpoint: String,
    pub watched_wallets: usize,
    pub processed_heights: usize,
    pub processed_transactions: usize,
    pub rpc_requests: u64,
    pub pending_alerts: usize,
    pub alert_sink: String,
}

/// Owns the shared pipeline state and turns candidate heights into alerts.
pub struct Orchestrator {
    config: AppConfig,
    chain_client: Arc<ChainClient>,
    watch_list: Arc<WatchList>,
    deduplicator: Arc<Deduplicator>,
    tracker: Arc<Mutex<GapTracker>>,
    stats: Arc<PipelineStats>,
    processor: BlockProcessor,
    dispatcher: NotificationDispatcher,
    token_cache: Option<Arc<TokenMetadataCache>>,
    subscription_health: SubscriptionHealth,
}

impl Orchestrator {
    /// Build from configuration; alerts go to the webhook when one is configured
    pub fn new(config: AppConfig) -> Result<Self> {
        let sink: Arc<dyn AlertSink> = match &config.notification.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url, config.notification.timeout_seconds)?),
            None => {
                warn!("No webhook configured, alerts are written to the log only");
                Arc::new(LogSink)
            }
        };
        Self::with_sink(config, sink)
    }

    pub fn with_sink(config: AppConfig, sink: Arc<dyn AlertSink>) -> Result<Self> {
        config.validate()?;

        let chain_client = Arc::new(ChainClient::new(&config.rpc)?);
        let watch_list = Arc::new(WatchList::from_addresses(&config.processing.watched_wallets)?);
        let stats = Arc::new(PipelineStats::new());
        let deduplicator = Arc::new(Deduplicator::new(
            config.processing.processed_heights_capacity,
            config.processing.processed_tx_capacity,
        ));
        let dispatcher = NotificationDispatcher::new(
            sink,
            RetryConfig::for_dispatch(&config.notification),
            stats.clone(),
        );
        let token_cache = config.notification.token_details.then(|| {
            Arc::new(TokenMetadataCache::new(
                chain_client.clone(),
                Duration::from_secs(config.notification.token_cache_ttl_seconds),
            ))
        });

        Ok(Self {
            processor: BlockProcessor::new(chain_client.clone(), watch_list.clone()),
            chain_client,
            watch_list,
            deduplicator,
            tracker: Arc::new(Mutex::new(GapTracker::new(0))),
            stats,
            dispatcher,
            token_cache,
            subscription_health: SubscriptionHealth::default(),
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn watch_list(&self) -> &Arc<WatchList> {
        &self.watch_list
    }

    pub fn chain_client(&self) -> &Arc<ChainClient> {
        &self.chain_client
    }

    pub fn deduplicator(&self) -> &Arc<Deduplicator> {
        &self.deduplicator
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn last_confirmed_height(&self) -> u64 {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner()).watermark()
    }

    /// Restart gap tracking just below `height`
    pub fn reset_watermark(&self, watermark: u64) {
        *self.tracker.lock().unwrap_or_else(|e| e.into_inner()) = GapTracker::new(watermark);
    }

    pub fn status(&self) -> StatusReport {
        let stats = self.stats.snapshot();
        let last_confirmed_height = self.last_confirmed_height();

        StatusReport {
            blocks_behind: stats.chain_height.saturating_sub(last_confirmed_height),
            stats,
            last_confirmed_height,
            subscription: self.subscription_health.status(),
            active_endpoint: self.chain_client.active_endpoint().name.clone(),
            watched_wallets: self.watch_list.len(),
            processed_heights: self.deduplicator.height_count(),
            processed_transactions: self.deduplicator.tx_count(),
            rpc_requests: self.chain_client.request_count(),
            pending_alerts: self.dispatcher.in_flight(),
            alert_sink: self.dispatcher.sink_name().to_string(),
        }
    }

    pub fn block_poller(&self, sender: mpsc::Sender<HeightEvent>, start_height: u64) -> BlockPoller {
        BlockPoller::new(
            self.chain_client.clone(),
            self.tracker.clone(),
            sender,
            self.stats.clone(),
            self.subscription_health.clone(),
            &self.config.processing,
            &self.config.subscription,
            start_height,
        )
    }

    pub fn gap_scanner(&self, sender: mpsc::Sender<HeightEvent>) -> GapScanner {
        GapScanner::new(
            self.chain_client.clone(),
            self.tracker.clone(),
            sender,
            self.stats.clone(),
            Duration::from_secs(self.config.processing.gap_scan_interval_seconds),
            self.config.processing.max_backfill_blocks,
        )
    }

    pub fn head_subscription(&self, sender: mpsc::Sender<HeightEvent>) -> HeadSubscription {
        HeadSubscription::new(&self.config.subscription, sender, self.subscription_health.clone())
    }

    /// Single intake for every producer: admit, fetch, filter, alert.
    pub async fn on_candidate_height(&self, event: HeightEvent) -> HeightOutcome {
        let height = event.height;
        let started = Instant::now();

        let already_confirmed = self
            .tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_confirmed(height);
        if already_confirmed || !self.deduplicator.admit_height(height) {
            debug!("Height {} from {:?} already handled", height, event.source);
            return HeightOutcome::Duplicate;
        }

        let block = match self.processor.process_height(height).await {
            Ok(block) => block,
            Err(e) => {
                self.deduplicator.release_height(height);
                self.stats.record_fetch_failure();
                let context = LogContext::new("orchestrator", "process_height")
                    .with_block_number(height)
                    .with_metadata("source", json!(event.source));
                ErrorLogger::log_error(&e, Some(context));
                return HeightOutcome::Failed;
            }
        };

        let matches = block.matches.len();
        let mut alerts = 0;
        for event in block.matches {
            if !self.deduplicator.admit_tx(&event.transaction.hash, event.block_height) {
                continue;
            }
            self.stats.record_match();
            MetricsLogger::log_match_found(
                event.block_height,
                &event.transaction.hash,
                &event.wallet,
                event.direction.label(),
            );
            self.notify(event);
            alerts += 1;
        }

        self.tracker.lock().unwrap_or_else(|e| e.into_inner()).confirm(height);

        let latency_ms = started.elapsed().as_millis() as u64;
        self.stats.record_block_processed(block.transaction_count, latency_ms);
        MetricsLogger::log_block_processed(height, block.transaction_count, matches, latency_ms);

        HeightOutcome::Processed { matches, alerts }
    }

    fn notify(&self, event: MatchEvent) {
        self.dispatcher.dispatch(format_match_alert(&event, &self.config.notification));

        let Some(cache) = self.token_cache.clone() else { return };
        if !event.kind.is_token_interaction() {
            return;
        }
        let Some(token_address) = event.transaction.to.clone() else { return };
        let dispatcher = self.dispatcher.clone();
        let config = self.config.notification.clone();

        // Details follow the basic alert once the token lookup resolves
        tokio::spawn(async move {
            let token = cache.get(&token_address).await;
            dispatcher.dispatch(format_token_alert(&event, &token, &config));
        });
    }

    /// Query the chain head, retrying with backoff until it answers or shutdown
    async fn initial_height(&self, shutdown: &mut watch::Receiver<bool>) -> Result<u64> {
        let backoff = RetryManager::new("initial_height", RetryConfig::for_startup(&self.config.rpc));
        let mut attempt = 0u32;

        loop {
            match self.chain_client.get_chain_height().await {
                Ok(height) => return Ok(height),
                Err(e) => {
                    attempt += 1;
                    let delay = backoff.calculate_delay(attempt);
                    warn!("Chain height unavailable at startup (attempt {}), retrying in {:?}: {}", attempt, delay, e);
                    tokio::select! {
                        _ = shutdown.changed() => {
                            return Err(SystemError::Signal("shutdown before startup completed".to_string()).into());
                        }
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Run the pipeline until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let start_height = self.initial_height(&mut shutdown).await?;
        let watermark = start_height.saturating_sub(1);
        self.reset_watermark(watermark);
        self.stats.observe_chain_height(start_height);

        LogContext::new("orchestrator", "start")
            .with_block_number(start_height)
            .with_endpoint(&self.chain_client.active_endpoint().name)
            .with_metadata("watched_wallets", json!(self.watch_list.len()))
            .info("Pipeline starting");

        if self.config.notification.startup_notification {
            self.dispatcher.dispatch(format_startup_alert(
                self.watch_list.len(),
                start_height,
                &self.chain_client.active_endpoint().name,
            ));
        }

        let (sender, receiver) = mpsc::channel(self.config.processing.channel_capacity);
        let mut producers = JoinSet::new();
        producers.spawn(self.head_subscription(sender.clone()).run(shutdown.clone()));
        producers.spawn(self.block_poller(sender.clone(), watermark).run(shutdown.clone()));
        producers.spawn(self.gap_scanner(sender).run(shutdown.clone()));
        producers.spawn(self.clone().report_status(shutdown.clone()));

        let mut tasks = self.clone().intake(receiver, shutdown).await;

        // One grace period covers block tasks, pending alerts and producers together
        let grace = Duration::from_secs(self.config.processing.shutdown_grace_seconds);
        let deadline = tokio::time::Instant::now() + grace;

        info!("Draining {} in-flight block task(s)", tasks.len());
        if timeout_at(deadline, async { while tasks.join_next().await.is_some() {} }).await.is_err() {
            warn!("Aborting {} block task(s) still running after {:?}", tasks.len(), grace);
            tasks.abort_all();
        }
        self.dispatcher
            .drain(deadline.saturating_duration_since(tokio::time::Instant::now()))
            .await;
        if timeout_at(deadline, async { while producers.join_next().await.is_some() {} }).await.is_err() {
            producers.abort_all();
        }

        info!("Pipeline stopped at confirmed height {}", self.last_confirmed_height());
        Ok(())
    }

    /// Feed candidate heights to at most `worker_count` block tasks until shutdown.
    ///
    /// An event is only taken off the channel once a worker slot is free, and
    /// nothing new is started after the shutdown signal. The still-running
    /// tasks are handed back to the caller.
    async fn intake(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<HeightEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinSet<HeightOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.processing.worker_count));
        let mut tasks = JoinSet::new();

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Block task ended abnormally: {}", e);
                    }
                }
                permit = semaphore.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        event = receiver.recv() => {
                            let Some(event) = event else { break };
                            let this = self.clone();
                            tasks.spawn(async move {
                                let _permit = permit;
                                this.on_candidate_height(event).await
                            });
                        }
                    }
                }
            }
        }

        tasks
    }

    async fn report_status(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.logging.stats_interval_seconds.max(1));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(interval) => {}
            }

            let status = self.status();
            MetricsLogger::log_system_status(
                status.stats.chain_height,
                status.last_confirmed_height,
                status.stats.blocks_processed,
                status.stats.matches_found,
                &format!("{:?}", status.subscription.state),
            );
        }
    }
}
