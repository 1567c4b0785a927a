use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::{EndpointConfig, RpcConfig};
use crate::error::{ConfigError, ProcessingError, Result, RpcError, WatcherError};
use crate::logging::{LogContext, MetricsLogger, PerformanceMonitor};
use crate::models::transaction::{decode_hex_data, parse_hex_u256, parse_hex_u64};
use crate::models::{Block, Transaction};
use crate::retry::{RetryConfig, RetryManager};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    /// `Some(Null)` for an explicit null result, `None` when the field is absent
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    number: String,
    hash: Option<String>,
    timestamp: String,
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
    #[serde(default)]
    input: String,
}

impl RawTransaction {
    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            hash: self.hash.to_lowercase(),
            from: self.from.to_lowercase(),
            to: self.to.map(|to| to.to_lowercase()),
            value: parse_hex_u256(&self.value)?,
            input: decode_hex_data(&self.input)?,
        })
    }
}

/// JSON-RPC client over a priority-ordered pool of HTTP endpoints.
///
/// Every call goes to the active endpoint. A transport failure moves the
/// active index to the next endpoint and the call is retried there. Protocol
/// failures are returned to the caller but counted against the endpoint, and
/// `failures_before_rotation` of them in a row rotate as well.
///
/// All requests share one rate limiter, so the pool as a whole never exceeds
/// `requests_per_second`.
pub struct ChainClient {
    client: Client,
    endpoints: Vec<EndpointConfig>,
    active: AtomicUsize,
    /// Consecutive protocol failures of the active endpoint
    strikes: AtomicU32,
    failures_before_rotation: u32,
    limiter: Option<DefaultDirectRateLimiter>,
    request_id: AtomicU64,
    requests_sent: AtomicU64,
    retry_config: RetryConfig,
    timeout_seconds: u64,
}

impl ChainClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints.into());
        }

        let mut endpoints = config.endpoints.clone();
        endpoints.sort_by_key(|e| e.priority);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(RpcError::Http)?;

        LogContext::new("chain_client", "initialization")
            .with_endpoint(&endpoints[0].url)
            .with_metadata("pool_size", json!(endpoints.len()))
            .with_metadata("timeout_seconds", json!(config.timeout_seconds))
            .with_metadata("requests_per_second", json!(config.requests_per_second))
            .info("Initializing chain client");

        // One request at a time, spaced evenly; no bursts
        let limiter = NonZeroU32::new(config.requests_per_second)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)));

        Ok(Self {
            client,
            endpoints,
            active: AtomicUsize::new(0),
            strikes: AtomicU32::new(0),
            failures_before_rotation: config.failures_before_rotation.max(1),
            limiter,
            request_id: AtomicU64::new(1),
            requests_sent: AtomicU64::new(0),
            retry_config: RetryConfig::for_rpc(config),
            timeout_seconds: config.timeout_seconds,
        })
    }

    pub fn active_endpoint(&self) -> &EndpointConfig {
        &self.endpoints[self.active.load(Ordering::SeqCst) % self.endpoints.len()]
    }

    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    /// Requests sent since startup, across all endpoints
    pub fn request_count(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Issue a raw JSON-RPC call with endpoint failover
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let retry_manager = RetryManager::new(method, self.retry_config.clone());
        retry_manager
            .execute(|| {
                let params = params.clone();
                async move {
                    let index = self.active.load(Ordering::SeqCst) % self.endpoints.len();
                    let result = self.request_once(index, method, params).await;
                    match &result {
                        Ok(_) => self.strikes.store(0, Ordering::SeqCst),
                        Err(error) if error.is_transport() => self.rotate_from(index, &error.to_string()),
                        Err(error) if error.is_endpoint_fault() => self.record_strike(index, error),
                        Err(_) => {}
                    }
                    result
                }
            })
            .await
    }

    pub async fn get_chain_height(&self) -> Result<u64> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        let hex = value.as_str().ok_or_else(|| {
            RpcError::InvalidResponse(format!("eth_blockNumber returned {}", value))
        })?;
        Ok(parse_hex_u64(hex)?)
    }

    /// Full block with transaction objects; `None` when the node does not know the height
    pub async fn get_block(&self, height: u64) -> Result<Option<Block>> {
        let monitor = PerformanceMonitor::new("get_block")
            .with_metadata("block_number", json!(height));

        let result = self
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", height), true]))
            .await
            .and_then(|value| parse_block(height, value));
        monitor.finish_with_result(&result);

        result
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
        let value = self.call("eth_getTransactionByHash", json!([hash])).await?;
        if value.is_null() {
            return Ok(None);
        }

        let raw: RawTransaction = serde_json::from_value(value)
            .map_err(|e| ProcessingError::TransactionParsing(format!("{}: {}", hash, e)))?;
        raw.into_transaction().map(Some)
    }

    /// `eth_call` against the latest block, returning the raw return data
    pub async fn eth_call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let params = json!([
            { "to": to, "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let value = self.call("eth_call", params).await?;
        let hex = value.as_str().ok_or_else(|| {
            RpcError::InvalidResponse(format!("eth_call returned {}", value))
        })?;
        Ok(decode_hex_data(hex)?)
    }

    async fn request_once(&self, index: usize, method: &str, params: Value) -> Result<Value> {
        let endpoint = &self.endpoints[index];
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        self.requests_sent.fetch_add(1, Ordering::Relaxed);

        let monitor = PerformanceMonitor::new(method);
        let result = self.send(endpoint, &request).await;
        MetricsLogger::log_rpc_call(method, &endpoint.name, monitor.elapsed_ms(), result.is_ok());

        result
    }

    async fn send(&self, endpoint: &EndpointConfig, request: &JsonRpcRequest<'_>) -> Result<Value> {
        let response = self
            .client
            .post(&endpoint.url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status {
                status: status.as_u16(),
                endpoint: endpoint.name.clone(),
            }.into());
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        let rpc_response: JsonRpcResponse = serde_json::from_str(&body).map_err(RpcError::Json)?;

        if let Some(error) = rpc_response.error {
            return Err(classify_rpc_error(error).into());
        }

        rpc_response
            .result
            .ok_or_else(|| RpcError::InvalidResponse("No result in response".to_string()).into())
    }

    fn classify(&self, error: reqwest::Error) -> WatcherError {
        if error.is_timeout() {
            RpcError::Timeout { seconds: self.timeout_seconds }.into()
        } else if error.is_connect() {
            RpcError::Connection(error.to_string()).into()
        } else {
            RpcError::Http(error).into()
        }
    }

    fn record_strike(&self, index: usize, error: &WatcherError) {
        // A late answer from an endpoint we already left does not count
        if self.active.load(Ordering::SeqCst) % self.endpoints.len() != index {
            return;
        }
        let strikes = self.strikes.fetch_add(1, Ordering::SeqCst) + 1;
        if strikes >= self.failures_before_rotation {
            self.rotate_from(index, &format!("{} consecutive failures, last: {}", strikes, error));
        }
    }

    /// Advance past `failed` unless another task already rotated away from it
    fn rotate_from(&self, failed: usize, reason: &str) {
        let next = (failed + 1) % self.endpoints.len();
        if self
            .active
            .compare_exchange(failed, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.strikes.store(0, Ordering::SeqCst);
        if next != failed {
            MetricsLogger::log_endpoint_rotation(
                "rpc",
                &self.endpoints[failed].name,
                &self.endpoints[next].name,
                reason,
            );
        }
    }
}

// Public nodes signal throttling through the error object rather than HTTP 429
fn classify_rpc_error(error: JsonRpcError) -> RpcError {
    let message = error.message.to_lowercase();
    if error.code == -32005 || message.contains("rate limit") || message.contains("limit exceeded") {
        RpcError::RateLimit { seconds: 1 }
    } else {
        RpcError::Method { code: error.code, message: error.message }
    }
}

fn parse_block(height: u64, value: Value) -> Result<Option<Block>> {
    if value.is_null() {
        return Ok(None);
    }

    let raw: RawBlock = serde_json::from_value(value)
        .map_err(|e| ProcessingError::BlockParsing(format!("block {}: {}", height, e)))?;

    let number = parse_hex_u64(&raw.number)?;
    if number != height {
        return Err(ProcessingError::BlockParsing(format!(
            "requested block {} but node returned {}", height, number
        )).into());
    }

    let transactions = raw
        .transactions
        .into_iter()
        .map(RawTransaction::into_transaction)
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Block {
        height: number,
        hash: raw.hash,
        timestamp: parse_hex_u64(&raw.timestamp)?,
        transactions,
    }))
}
