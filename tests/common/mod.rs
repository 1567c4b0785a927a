#![allow(dead_code)]

use async_trait::async_trait;
use bsc_wallet_watcher::config::{AppConfig, EndpointConfig};
use bsc_wallet_watcher::error::Result;
use bsc_wallet_watcher::notification::{Alert, AlertSink};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const WATCHED: &str = "0xd196a0e08bfd8b2b41a0a1ddbe1e5e4e4e4e8308";
pub const OTHER: &str = "0x1111111111111111111111111111111111111111";

#[derive(Default)]
struct StubState {
    head: AtomicU64,
    blocks: Mutex<HashMap<u64, Value>>,
    failing: Mutex<HashSet<u64>>,
    fetches: Mutex<HashMap<u64, u32>>,
    call_results: Mutex<HashMap<String, String>>,
    block_delay: Mutex<Duration>,
}

/// Minimal JSON-RPC node: answers from in-memory blocks and counts block fetches
#[derive(Clone, Default)]
pub struct ChainStub {
    state: Arc<StubState>,
}

impl ChainStub {
    pub fn new(head: u64) -> Self {
        let stub = Self::default();
        stub.set_head(head);
        stub
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("POST"))
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    pub fn set_head(&self, head: u64) {
        self.state.head.store(head, Ordering::SeqCst);
    }

    pub fn insert_block(&self, height: u64, transactions: Vec<Value>) {
        self.state
            .blocks
            .lock()
            .unwrap()
            .insert(height, block_json(height, transactions));
    }

    /// Answer `eth_getBlockByNumber` for `height` with a JSON-RPC error until cleared
    pub fn fail_height(&self, height: u64) {
        self.state.failing.lock().unwrap().insert(height);
    }

    pub fn clear_failure(&self, height: u64) {
        self.state.failing.lock().unwrap().remove(&height);
    }

    /// Return value for `eth_call` with the given calldata hex
    pub fn set_call_result(&self, data: &str, result: &str) {
        self.state
            .call_results
            .lock()
            .unwrap()
            .insert(data.to_string(), result.to_string());
    }

    /// Hold every `eth_getBlockByNumber` answer back by `delay`
    pub fn set_block_delay(&self, delay: Duration) {
        *self.state.block_delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self, height: u64) -> u32 {
        self.state.fetches.lock().unwrap().get(&height).copied().unwrap_or(0)
    }

    fn result(&self, body: &Value) -> std::result::Result<Value, Value> {
        let params = &body["params"];
        match body["method"].as_str().unwrap_or_default() {
            "eth_blockNumber" => Ok(json!(format!("0x{:x}", self.state.head.load(Ordering::SeqCst)))),
            "eth_getBlockByNumber" => {
                let height = u64::from_str_radix(params[0].as_str().unwrap_or("0x0").trim_start_matches("0x"), 16)
                    .unwrap_or_default();
                *self.state.fetches.lock().unwrap().entry(height).or_insert(0) += 1;

                if self.state.failing.lock().unwrap().contains(&height) {
                    return Err(json!({"code": -32000, "message": "header not found"}));
                }
                if height > self.state.head.load(Ordering::SeqCst) {
                    return Ok(Value::Null);
                }
                let blocks = self.state.blocks.lock().unwrap();
                Ok(blocks.get(&height).cloned().unwrap_or_else(|| block_json(height, vec![])))
            }
            "eth_getTransactionByHash" => {
                let hash = params[0].as_str().unwrap_or_default().to_lowercase();
                let blocks = self.state.blocks.lock().unwrap();
                Ok(blocks
                    .values()
                    .flat_map(|block| block["transactions"].as_array().cloned().unwrap_or_default())
                    .find(|tx| tx["hash"].as_str() == Some(hash.as_str()))
                    .unwrap_or(Value::Null))
            }
            "eth_call" => {
                let data = params[0]["data"].as_str().unwrap_or_default();
                let results = self.state.call_results.lock().unwrap();
                results
                    .get(data)
                    .map(|result| json!(result))
                    .ok_or_else(|| json!({"code": -32000, "message": "execution reverted"}))
            }
            other => Err(json!({"code": -32601, "message": format!("method {} not found", other)})),
        }
    }
}

impl Respond for ChainStub {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let id = body["id"].clone();
        let payload = match self.result(&body) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
        };
        let response = ResponseTemplate::new(200).set_body_json(payload);
        if body["method"] == "eth_getBlockByNumber" {
            response.set_delay(*self.state.block_delay.lock().unwrap())
        } else {
            response
        }
    }
}

pub fn block_json(height: u64, transactions: Vec<Value>) -> Value {
    json!({
        "number": format!("0x{:x}", height),
        "hash": format!("0x{:064x}", height),
        "timestamp": "0x6553f100",
        "transactions": transactions,
    })
}

pub fn tx_json(hash: &str, from: &str, to: Option<&str>, value_wei: u128) -> Value {
    json!({
        "hash": hash,
        "from": from,
        "to": to,
        "value": format!("0x{:x}", value_wei),
        "input": "0x",
    })
}

/// Records delivered alerts instead of posting them
#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn titles(&self) -> Vec<String> {
        self.alerts.lock().unwrap().iter().map(|a| a.title.clone()).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Config pointing at the given RPC servers, no websocket, quiet alerts
pub fn test_config(rpc_urls: &[String], wallets: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.rpc.endpoints = rpc_urls
        .iter()
        .enumerate()
        .map(|(i, url)| EndpointConfig::new(&format!("node-{}", i), url, i as u32))
        .collect();
    config.rpc.timeout_seconds = 1;
    config.rpc.retry_delay_ms = 10;
    config.rpc.max_retry_delay_ms = 20;
    config.rpc.requests_per_second = 0;
    config.subscription.endpoints.clear();
    config.processing.watched_wallets = wallets.iter().map(|w| w.to_string()).collect();
    config.processing.poll_interval_seconds = 1;
    config.processing.healthy_poll_interval_seconds = 1;
    config.processing.gap_scan_interval_seconds = 1;
    config.processing.max_backfill_blocks = 20;
    config.processing.processed_heights_capacity = 100;
    config.processing.shutdown_grace_seconds = 1;
    config.notification.webhook_url = None;
    config.notification.retry_delay_ms = 10;
    config.notification.startup_notification = false;
    config.notification.token_details = false;
    config
}

/// Poll `condition` until it holds or `within` elapses
pub async fn eventually<F: Fn() -> bool>(within: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
