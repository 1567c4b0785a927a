use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use crate::error::ConfigError;
use crate::models::watch_list::validate_address;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub subscription: SubscriptionConfig,
    pub processing: ProcessingConfig,
    pub notification: NotificationConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// A single chain endpoint; lower priority value is tried first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub priority: u32,
}

impl EndpointConfig {
    pub fn new(name: &str, url: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            priority,
        }
    }
}

/// JSON-RPC client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// HTTP JSON-RPC endpoints
    pub endpoints: Vec<EndpointConfig>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Consecutive protocol failures tolerated before moving to the next endpoint
    pub failures_before_rotation: u32,
    /// Client-side request budget shared by every task; 0 disables throttling
    pub requests_per_second: u32,
}

/// Head subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// WebSocket endpoints used for `eth_subscribe("newHeads")`
    pub endpoints: Vec<EndpointConfig>,
    pub connect_timeout_seconds: u64,
    pub reconnect_delay_seconds: u64,
    pub max_reconnect_delay_seconds: u64,
    /// A session silent for this long is torn down
    pub stale_after_seconds: u64,
    pub failures_before_rotation: u32,
}

/// Block intake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Addresses watched at startup
    pub watched_wallets: Vec<String>,
    /// Poll interval while the subscription is unhealthy
    pub poll_interval_seconds: u64,
    /// Poll interval while the subscription is healthy
    pub healthy_poll_interval_seconds: u64,
    pub gap_scan_interval_seconds: u64,
    /// Most recent heights processed after an outage; older ones are skipped
    pub max_backfill_blocks: u64,
    pub worker_count: usize,
    pub channel_capacity: usize,
    pub processed_heights_capacity: usize,
    pub processed_tx_capacity: usize,
    pub shutdown_grace_seconds: u64,
}

/// Webhook notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Transaction link prefix, the hash is appended
    pub explorer_tx_url: String,
    pub native_symbol: String,
    pub native_decimals: u32,
    pub startup_notification: bool,
    /// Follow up token interactions with name/symbol looked up on chain
    pub token_details: bool,
    pub token_cache_ttl_seconds: u64,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable HTTP API server
    pub enabled: bool,
    /// Server port
    pub port: u16,
    /// Server host/bind address
    pub host: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
    /// Interval of the periodic status line
    pub stats_interval_seconds: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                EndpointConfig::new("bsc-dataseed", "https://bsc-dataseed.bnbchain.org", 1),
                EndpointConfig::new("bsc-dataseed-1", "https://bsc-dataseed1.defibit.io", 2),
                EndpointConfig::new("ankr", "https://rpc.ankr.com/bsc", 3),
            ],
            timeout_seconds: 10,
            retry_delay_ms: 250,
            max_retry_delay_ms: 2_000,
            failures_before_rotation: 3,
            requests_per_second: 5,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                EndpointConfig::new("bsc-ws", "wss://bsc-rpc.publicnode.com", 1),
                EndpointConfig::new("ankr-ws", "wss://rpc.ankr.com/bsc/ws", 2),
            ],
            connect_timeout_seconds: 8,
            reconnect_delay_seconds: 2,
            max_reconnect_delay_seconds: 30,
            stale_after_seconds: 30,
            failures_before_rotation: 2,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            watched_wallets: Vec::new(),
            poll_interval_seconds: 10,
            healthy_poll_interval_seconds: 30,
            gap_scan_interval_seconds: 10,
            max_backfill_blocks: 50,
            worker_count: 8,
            channel_capacity: 1024,
            processed_heights_capacity: 150,
            processed_tx_capacity: 10_000,
            shutdown_grace_seconds: 5,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: 10,
            max_attempts: 3,
            retry_delay_ms: 1_000,
            explorer_tx_url: "https://bscscan.com/tx/".to_string(),
            native_symbol: "BNB".to_string(),
            native_decimals: 18,
            startup_notification: true,
            token_details: true,
            token_cache_ttl_seconds: 300,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            stats_interval_seconds: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    /// Environment variables take precedence over file values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file; a missing file yields defaults
    pub fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &str) -> Result<Self, ConfigError> {
        if !Path::new(config_path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .map_err(|_| ConfigError::FileNotFound(config_path.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Endpoint lists are comma separated, priority follows list order
        if let Ok(urls) = env::var("BSC_RPC_URLS") {
            self.rpc.endpoints = parse_endpoint_list("rpc", &urls);
        }
        if let Ok(urls) = env::var("BSC_WS_URLS") {
            self.subscription.endpoints = parse_endpoint_list("ws", &urls);
        }
        if let Ok(timeout) = env::var("RPC_TIMEOUT_SECONDS") {
            self.rpc.timeout_seconds = parse_env("RPC_TIMEOUT_SECONDS", timeout)?;
        }
        if let Ok(rate) = env::var("RPC_REQUESTS_PER_SECOND") {
            self.rpc.requests_per_second = parse_env("RPC_REQUESTS_PER_SECOND", rate)?;
        }

        if let Ok(wallets) = env::var("WATCHED_WALLETS") {
            self.processing.watched_wallets = wallets
                .split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(interval) = env::var("BLOCK_POLL_INTERVAL") {
            self.processing.poll_interval_seconds = parse_env("BLOCK_POLL_INTERVAL", interval)?;
        }
        if let Ok(interval) = env::var("GAP_SCAN_INTERVAL") {
            self.processing.gap_scan_interval_seconds = parse_env("GAP_SCAN_INTERVAL", interval)?;
        }
        if let Ok(cap) = env::var("MAX_BACKFILL_BLOCKS") {
            self.processing.max_backfill_blocks = parse_env("MAX_BACKFILL_BLOCKS", cap)?;
        }
        if let Ok(workers) = env::var("WORKER_COUNT") {
            self.processing.worker_count = parse_env("WORKER_COUNT", workers)?;
        }

        if let Ok(url) = env::var("WEBHOOK_URL") {
            self.notification.webhook_url = Some(url);
        }

        if let Ok(enabled) = env::var("API_ENABLED") {
            self.api.enabled = parse_env("API_ENABLED", enabled)?;
        }
        // PORT is what most hosting platforms inject
        if let Ok(port) = env::var("API_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = parse_env("API_PORT", port)?;
        }
        if let Ok(host) = env::var("API_HOST") {
            self.api.host = host;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        for endpoint in &self.rpc.endpoints {
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                return Err(ConfigError::InvalidUrl(endpoint.url.clone()));
            }
        }
        for endpoint in &self.subscription.endpoints {
            if !endpoint.url.starts_with("ws://") && !endpoint.url.starts_with("wss://") {
                return Err(ConfigError::InvalidUrl(endpoint.url.clone()));
            }
        }

        if self.rpc.timeout_seconds == 0 || self.rpc.timeout_seconds > 120 {
            return Err(invalid("rpc.timeout_seconds", self.rpc.timeout_seconds));
        }
        if self.rpc.failures_before_rotation == 0 {
            return Err(invalid("rpc.failures_before_rotation", self.rpc.failures_before_rotation));
        }

        for wallet in &self.processing.watched_wallets {
            if validate_address(wallet).is_err() {
                return Err(invalid("processing.watched_wallets", wallet));
            }
        }

        if self.processing.poll_interval_seconds == 0 || self.processing.poll_interval_seconds > 300 {
            return Err(invalid("processing.poll_interval_seconds", self.processing.poll_interval_seconds));
        }
        if self.processing.healthy_poll_interval_seconds < self.processing.poll_interval_seconds {
            return Err(invalid(
                "processing.healthy_poll_interval_seconds",
                self.processing.healthy_poll_interval_seconds,
            ));
        }
        if self.processing.gap_scan_interval_seconds == 0 {
            return Err(invalid("processing.gap_scan_interval_seconds", self.processing.gap_scan_interval_seconds));
        }
        if self.processing.max_backfill_blocks == 0 || self.processing.max_backfill_blocks > 10_000 {
            return Err(invalid("processing.max_backfill_blocks", self.processing.max_backfill_blocks));
        }
        if self.processing.worker_count == 0 || self.processing.worker_count > 64 {
            return Err(invalid("processing.worker_count", self.processing.worker_count));
        }
        if self.processing.channel_capacity == 0 {
            return Err(invalid("processing.channel_capacity", self.processing.channel_capacity));
        }
        // The height set must at least cover one full backfill window
        if (self.processing.processed_heights_capacity as u64) < self.processing.max_backfill_blocks {
            return Err(invalid(
                "processing.processed_heights_capacity",
                self.processing.processed_heights_capacity,
            ));
        }
        if self.processing.processed_tx_capacity == 0 {
            return Err(invalid("processing.processed_tx_capacity", self.processing.processed_tx_capacity));
        }

        if let Some(url) = &self.notification.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.notification.max_attempts == 0 || self.notification.max_attempts > 10 {
            return Err(invalid("notification.max_attempts", self.notification.max_attempts));
        }

        if self.api.port == 0 {
            return Err(invalid("api.port", self.api.port));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(invalid("logging.level", &self.logging.level));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(invalid("logging.format", &self.logging.format));
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> Result<String, ConfigError> {
        let config = Self::default();
        toml::to_string_pretty(&config)
            .map_err(|e| ConfigError::Parsing(e.to_string()))
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_endpoint_list(prefix: &str, urls: &str) -> Vec<EndpointConfig> {
    urls.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .enumerate()
        .map(|(index, url)| EndpointConfig {
            name: format!("{}-{}", prefix, index + 1),
            url: url.to_string(),
            priority: index as u32 + 1,
        })
        .collect()
}
