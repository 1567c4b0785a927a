use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::blockchain::{HeightEvent, HeightSource};
use crate::config::{EndpointConfig, SubscriptionConfig};
use crate::error::SubscriptionError;
use crate::logging::{LogContext, MetricsLogger};
use crate::models::transaction::parse_hex_u64;
use crate::retry::{RetryConfig, RetryManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub state: ConnectionState,
    pub endpoint: Option<String>,
    pub last_notification: Option<DateTime<Utc>>,
    pub last_height: Option<u64>,
    pub reconnects: u64,
    #[serde(skip)]
    last_notification_at: Option<Instant>,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            endpoint: None,
            last_notification: None,
            last_height: None,
            reconnects: 0,
            last_notification_at: None,
        }
    }
}

/// Shared read handle onto the subscription's connection state
#[derive(Debug, Clone, Default)]
pub struct SubscriptionHealth {
    inner: Arc<RwLock<SubscriptionStatus>>,
}

impl SubscriptionHealth {
    pub fn status(&self) -> SubscriptionStatus {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Subscribed and heard from within `stale_after`
    pub fn is_healthy(&self, stale_after: Duration) -> bool {
        let status = self.inner.read().unwrap_or_else(|e| e.into_inner());
        status.state == ConnectionState::Subscribed
            && status
                .last_notification_at
                .map(|at| at.elapsed() <= stale_after)
                .unwrap_or(false)
    }

    fn update(&self, f: impl FnOnce(&mut SubscriptionStatus)) {
        let mut status = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut status);
    }

    fn set_connecting(&self, endpoint: &str) {
        self.update(|s| {
            s.state = ConnectionState::Connecting;
            s.endpoint = Some(endpoint.to_string());
        });
    }

    fn set_subscribed(&self) {
        self.update(|s| {
            s.state = ConnectionState::Subscribed;
            // Staleness is measured from the moment the subscription is acknowledged
            s.last_notification_at = Some(Instant::now());
        });
    }

    fn record_notification(&self, height: u64) {
        self.update(|s| {
            s.last_notification = Some(Utc::now());
            s.last_notification_at = Some(Instant::now());
            s.last_height = Some(height);
        });
    }

    fn set_disconnected(&self, reconnecting: bool) {
        self.update(|s| {
            s.state = ConnectionState::Disconnected;
            if reconnecting {
                s.reconnects += 1;
            }
        });
    }
}

#[derive(Debug, Deserialize)]
struct WsResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<WsRpcError>,
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct WsRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: String,
    result: HeadResult,
}

#[derive(Debug, Deserialize)]
struct HeadResult {
    number: String,
}

#[derive(Debug, PartialEq, Eq)]
enum WsMessage {
    Subscribed(String),
    Head { subscription: String, height: u64 },
    Rejected(String),
    Ignored,
}

const SUBSCRIBE_REQUEST_ID: u64 = 1;

fn parse_message(text: &str) -> WsMessage {
    let response: WsResponse = match serde_json::from_str(text) {
        Ok(response) => response,
        Err(e) => {
            debug!("Ignoring unparseable websocket message: {}", e);
            return WsMessage::Ignored;
        }
    };

    if response.id == Some(SUBSCRIBE_REQUEST_ID) {
        if let Some(error) = response.error {
            return WsMessage::Rejected(format!("code={}, message={}", error.code, error.message));
        }
        if let Some(Value::String(id)) = response.result {
            return WsMessage::Subscribed(id);
        }
        return WsMessage::Rejected("subscription reply without id".to_string());
    }

    match response.params {
        Some(params) => match parse_hex_u64(&params.result.number) {
            Ok(height) => WsMessage::Head {
                subscription: params.subscription,
                height,
            },
            Err(e) => {
                warn!("Head notification with bad block number: {}", e);
                WsMessage::Ignored
            }
        },
        None => WsMessage::Ignored,
    }
}

/// `eth_subscribe("newHeads")` over websocket, one session at a time.
///
/// Runs until shutdown: every failed session is followed by a capped
/// exponential backoff, and after `failures_before_rotation` consecutive
/// failures the next endpoint is tried.
pub struct HeadSubscription {
    endpoints: Vec<EndpointConfig>,
    config: SubscriptionConfig,
    sender: mpsc::Sender<HeightEvent>,
    health: SubscriptionHealth,
}

impl HeadSubscription {
    pub fn new(config: &SubscriptionConfig, sender: mpsc::Sender<HeightEvent>, health: SubscriptionHealth) -> Self {
        let mut endpoints = config.endpoints.clone();
        endpoints.sort_by_key(|e| e.priority);

        Self {
            endpoints,
            config: config.clone(),
            sender,
            health,
        }
    }

    pub fn health(&self) -> SubscriptionHealth {
        self.health.clone()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.endpoints.is_empty() {
            warn!("No websocket endpoints configured, relying on block polling only");
            return;
        }

        let backoff = RetryManager::new("head_subscription", RetryConfig::for_reconnect(&self.config));
        let mut index = 0usize;
        let mut consecutive_failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let endpoint = &self.endpoints[index];
            self.health.set_connecting(&endpoint.name);
            let mut delivered = 0u64;

            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.run_session(endpoint, &mut delivered) => outcome,
            };

            let error = match outcome {
                Ok(()) => {
                    info!("Height channel closed, stopping head subscription");
                    break;
                }
                Err(error) => error,
            };

            self.health.set_disconnected(true);
            if delivered > 0 {
                consecutive_failures = 0;
            }
            consecutive_failures += 1;

            LogContext::new("head_subscription", "session_ended")
                .with_endpoint(&endpoint.name)
                .with_metadata("delivered", json!(delivered))
                .with_metadata("consecutive_failures", json!(consecutive_failures))
                .warn(&format!("Subscription session ended: {}", error));

            if consecutive_failures >= self.config.failures_before_rotation && self.endpoints.len() > 1 {
                let next = (index + 1) % self.endpoints.len();
                MetricsLogger::log_endpoint_rotation(
                    "websocket",
                    &endpoint.name,
                    &self.endpoints[next].name,
                    &error.to_string(),
                );
                index = next;
                consecutive_failures = 0;
            }

            let delay = backoff.calculate_delay(consecutive_failures.max(1));
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(delay) => {}
            }
        }

        self.health.set_disconnected(false);
        info!("Head subscription stopped");
    }

    /// One websocket session. `Ok` only when the height receiver is gone.
    async fn run_session(&self, endpoint: &EndpointConfig, delivered: &mut u64) -> Result<(), SubscriptionError> {
        let connect_timeout = self.config.connect_timeout_seconds;
        let (stream, _) = timeout(Duration::from_secs(connect_timeout), connect_async(endpoint.url.as_str()))
            .await
            .map_err(|_| SubscriptionError::ConnectTimeout { seconds: connect_timeout })??;

        let (mut write, mut read) = stream.split();

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        });
        write.send(Message::Text(request.to_string())).await?;

        let stale_after = Duration::from_secs(self.config.stale_after_seconds);
        let mut deadline = Instant::now() + stale_after;
        let mut subscription_id: Option<String> = None;

        loop {
            let message = match timeout_at(deadline, read.next()).await {
                Err(_) => return Err(SubscriptionError::Stale { seconds: self.config.stale_after_seconds }),
                Ok(None) => return Err(SubscriptionError::Closed),
                Ok(Some(message)) => message?,
            };

            match message {
                Message::Text(text) => match parse_message(&text) {
                    WsMessage::Subscribed(id) => {
                        info!("Subscribed to newHeads on {} ({})", endpoint.name, id);
                        self.health.set_subscribed();
                        subscription_id = Some(id);
                        deadline = Instant::now() + stale_after;
                    }
                    WsMessage::Head { subscription, height } => {
                        if subscription_id.as_deref() != Some(subscription.as_str()) {
                            debug!("Ignoring notification for unknown subscription {}", subscription);
                            continue;
                        }
                        self.health.record_notification(height);
                        deadline = Instant::now() + stale_after;

                        let event = HeightEvent { height, source: HeightSource::Subscription };
                        if self.sender.send(event).await.is_err() {
                            return Ok(());
                        }
                        *delivered += 1;
                    }
                    WsMessage::Rejected(reason) => return Err(SubscriptionError::Rejected(reason)),
                    WsMessage::Ignored => {}
                },
                Message::Ping(data) => write.send(Message::Pong(data)).await?,
                Message::Close(_) => return Err(SubscriptionError::Closed),
                _ => {}
            }
        }
    }
}
