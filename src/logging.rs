use log::{info, warn, error, debug, trace, LevelFilter};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::LoggingConfig;
use crate::error::{ErrorSeverity, WatcherError};

/// Structured logging context for the watcher
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, Value>,
}

impl LogContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_block_number(self, block_number: u64) -> Self {
        self.with_metadata("block_number", json!(block_number))
    }

    pub fn with_transaction_hash(self, tx_hash: &str) -> Self {
        self.with_metadata("transaction_hash", json!(tx_hash))
    }

    pub fn with_address(self, address: &str) -> Self {
        self.with_metadata("address", json!(address))
    }

    pub fn with_endpoint(self, endpoint: &str) -> Self {
        self.with_metadata("endpoint", json!(endpoint))
    }

    pub fn with_duration_ms(self, duration_ms: u64) -> Self {
        self.with_metadata("duration_ms", json!(duration_ms))
    }

    pub fn with_retry_count(self, retry_count: u32) -> Self {
        self.with_metadata("retry_count", json!(retry_count))
    }

    fn format_message(&self, level: &str, message: &str) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut log_entry = json!({
            "timestamp": timestamp,
            "level": level,
            "component": self.component,
            "operation": self.operation,
            "message": message,
        });

        for (key, value) in &self.metadata {
            log_entry[key] = value.clone();
        }

        log_entry.to_string()
    }

    pub fn info(&self, message: &str) {
        info!("{}", self.format_message("INFO", message));
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", self.format_message("WARN", message));
    }

    pub fn error(&self, message: &str) {
        error!("{}", self.format_message("ERROR", message));
    }

    pub fn debug(&self, message: &str) {
        debug!("{}", self.format_message("DEBUG", message));
    }

    pub fn trace(&self, message: &str) {
        trace!("{}", self.format_message("TRACE", message));
    }
}

/// Performance monitoring utilities
pub struct PerformanceMonitor {
    pub start_time: SystemTime,
    operation: String,
    metadata: HashMap<String, Value>,
}

impl PerformanceMonitor {
    pub fn new(operation: &str) -> Self {
        Self {
            start_time: SystemTime::now(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn finish_with_result<T, E>(self, result: &Result<T, E>) -> u64
    where
        E: std::fmt::Display
    {
        let duration = self.elapsed_ms();

        let mut context = LogContext::new("performance", &self.operation)
            .with_duration_ms(duration);

        for (key, value) in self.metadata {
            context = context.with_metadata(&key, value);
        }

        match result {
            Ok(_) => {
                context.debug(&format!("Operation completed successfully in {}ms", duration));
            }
            Err(e) => {
                context = context.with_metadata("error", json!(e.to_string()));
                context.warn(&format!("Operation failed after {}ms: {}", duration, e));
            }
        }

        duration
    }
}

/// Error logging utilities
pub struct ErrorLogger;

impl ErrorLogger {
    pub fn log_error(error: &WatcherError, context: Option<LogContext>) {
        let severity = error.severity();

        let mut log_context = context.unwrap_or_else(|| LogContext::new("error", "unknown"));
        log_context = log_context
            .with_metadata("error_type", json!(format!("{:?}", error)))
            .with_metadata("severity", json!(format!("{:?}", severity)))
            .with_metadata("recoverable", json!(error.is_recoverable()));

        if let Some(delay) = error.retry_delay() {
            log_context = log_context.with_metadata("retry_delay_seconds", json!(delay));
        }

        let message = format!("Error occurred: {}", error);

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => log_context.error(&message),
            ErrorSeverity::Medium => log_context.warn(&message),
            ErrorSeverity::Low => log_context.info(&message),
        }
    }

    pub fn log_recovery_attempt(operation: &str, error: &WatcherError, attempt: u32, max_attempts: u32) {
        let context = LogContext::new("recovery", "retry_attempt")
            .with_metadata("operation", json!(operation))
            .with_retry_count(attempt)
            .with_metadata("max_attempts", json!(max_attempts));

        if attempt == max_attempts {
            context.error(&format!("Final retry attempt failed: {}", error));
        } else {
            context.warn(&format!("Retry attempt {} of {}: {}", attempt, max_attempts, error));
        }
    }

    pub fn log_recovery_success(operation: &str, attempts: u32, total_duration_ms: u64) {
        let context = LogContext::new("recovery", "success")
            .with_metadata("operation", json!(operation))
            .with_retry_count(attempts)
            .with_duration_ms(total_duration_ms);

        context.info(&format!("Operation recovered after {} attempts in {}ms", attempts, total_duration_ms));
    }
}

/// Pipeline metrics emitted as structured log lines
pub struct MetricsLogger;

impl MetricsLogger {
    pub fn log_block_processed(block_number: u64, transaction_count: usize, match_count: usize, latency_ms: u64) {
        let context = LogContext::new("metrics", "block_processed")
            .with_block_number(block_number)
            .with_metadata("transaction_count", json!(transaction_count))
            .with_metadata("match_count", json!(match_count))
            .with_duration_ms(latency_ms);

        context.debug(&format!(
            "Block {} processed: {} transactions, {} matches",
            block_number, transaction_count, match_count
        ));
    }

    pub fn log_rpc_call(method: &str, endpoint: &str, duration_ms: u64, success: bool) {
        let context = LogContext::new("metrics", "rpc_call")
            .with_metadata("method", json!(method))
            .with_endpoint(endpoint)
            .with_duration_ms(duration_ms)
            .with_metadata("success", json!(success));

        if success {
            context.trace(&format!("RPC call {} completed in {}ms", method, duration_ms));
        } else {
            context.debug(&format!("RPC call {} failed after {}ms", method, duration_ms));
        }
    }

    pub fn log_endpoint_rotation(kind: &str, from: &str, to: &str, reason: &str) {
        LogContext::new("metrics", "endpoint_rotation")
            .with_metadata("kind", json!(kind))
            .with_metadata("from", json!(from))
            .with_metadata("to", json!(to))
            .with_metadata("reason", json!(reason))
            .warn(&format!("Switching {} endpoint {} -> {}: {}", kind, from, to, reason));
    }

    pub fn log_match_found(block_number: u64, tx_hash: &str, wallet: &str, direction: &str) {
        LogContext::new("metrics", "match_found")
            .with_block_number(block_number)
            .with_transaction_hash(tx_hash)
            .with_address(wallet)
            .with_metadata("direction", json!(direction))
            .info(&format!("Watched wallet {} matched in block {}", wallet, block_number));
    }

    pub fn log_dispatch(tx_hash: Option<&str>, attempts: u32, success: bool) {
        let mut context = LogContext::new("metrics", "dispatch")
            .with_retry_count(attempts)
            .with_metadata("success", json!(success));
        if let Some(hash) = tx_hash {
            context = context.with_transaction_hash(hash);
        }

        if success {
            context.info(&format!("Alert delivered after {} attempt(s)", attempts));
        } else {
            context.error(&format!("Alert dropped after {} attempt(s)", attempts));
        }
    }

    pub fn log_skipped_range(from: u64, to: u64, cap: u64) {
        LogContext::new("metrics", "heights_skipped")
            .with_metadata("from", json!(from))
            .with_metadata("to", json!(to))
            .with_metadata("count", json!(to - from + 1))
            .with_metadata("max_backfill_blocks", json!(cap))
            .warn(&format!("Backfill cap {} exceeded, skipping heights {}..={}", cap, from, to));
    }

    pub fn log_system_status(
        chain_height: u64,
        last_confirmed_height: u64,
        blocks_processed: u64,
        matches_found: u64,
        subscription_state: &str,
    ) {
        let blocks_behind = chain_height.saturating_sub(last_confirmed_height);
        let context = LogContext::new("metrics", "system_status")
            .with_metadata("chain_height", json!(chain_height))
            .with_metadata("last_confirmed_height", json!(last_confirmed_height))
            .with_metadata("blocks_behind", json!(blocks_behind))
            .with_metadata("blocks_processed", json!(blocks_processed))
            .with_metadata("matches_found", json!(matches_found))
            .with_metadata("subscription_state", json!(subscription_state));

        if blocks_behind > 10 {
            context.warn(&format!("Watcher is {} blocks behind (chain: {}, confirmed: {})",
                blocks_behind, chain_height, last_confirmed_height));
        } else {
            context.info(&format!("Status: {} blocks processed, {} matches, subscription {}",
                blocks_processed, matches_found, subscription_state));
        }
    }
}

/// Initialize structured logging for the application
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = config.level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let pretty = config.format != "json";

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    // RUST_LOG still wins for per-module tuning
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder
        .format(move |buf, record| {
            use std::io::Write;

            let message = record.args().to_string();
            match serde_json::from_str::<Value>(&message) {
                Ok(json_value) if pretty => writeln!(buf, "{}", serde_json::to_string_pretty(&json_value)?),
                Ok(_) => writeln!(buf, "{}", message),
                Err(_) => writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message
                ),
            }
        })
        .try_init()?;

    info!("Structured logging initialized");
    Ok(())
}
