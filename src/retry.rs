use std::time::Duration;
use tokio::time::sleep;
use crate::config::{NotificationConfig, RpcConfig, SubscriptionConfig};
use crate::error::{SystemError, WatcherError};
use crate::logging::{LogContext, ErrorLogger, PerformanceMonitor};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Initial delay between attempts in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// One attempt per configured endpoint, at least two
    pub fn for_rpc(config: &RpcConfig) -> Self {
        Self {
            max_attempts: config.endpoints.len().max(2) as u32,
            initial_delay_ms: config.retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn for_dispatch(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay_ms: config.retry_delay_ms,
            max_delay_ms: config.retry_delay_ms.saturating_mul(8),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Initial chain height query; startup keeps trying until shutdown
    pub fn for_startup(config: &RpcConfig) -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay_ms: config.retry_delay_ms.max(500),
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Reconnect backoff; `max_attempts` is unused, the subscription never gives up
    pub fn for_reconnect(config: &SubscriptionConfig) -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay_ms: config.reconnect_delay_seconds * 1_000,
            max_delay_ms: config.max_reconnect_delay_seconds * 1_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry mechanism with exponential backoff and jitter
pub struct RetryManager {
    config: RetryConfig,
    operation_name: String,
}

impl RetryManager {
    pub fn new(operation_name: &str, config: RetryConfig) -> Self {
        Self {
            config,
            operation_name: operation_name.to_string(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic.
    ///
    /// Non-recoverable errors are returned immediately.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, WatcherError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, WatcherError>>,
    {
        let monitor = PerformanceMonitor::new(&format!("retry_{}", self.operation_name));
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        ErrorLogger::log_recovery_success(&self.operation_name, attempt, monitor.elapsed_ms());
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_recoverable() {
                        LogContext::new("retry", &self.operation_name)
                            .with_retry_count(attempt)
                            .with_metadata("reason", serde_json::json!("non_recoverable"))
                            .debug(&format!("Non-recoverable error, aborting retries: {}", error));
                        return Err(error);
                    }

                    ErrorLogger::log_recovery_attempt(&self.operation_name, &error, attempt, self.config.max_attempts);

                    if attempt >= self.config.max_attempts {
                        last_error = Some(error);
                        break;
                    }

                    let delay = self.calculate_delay(attempt);
                    LogContext::new("retry", &self.operation_name)
                        .with_retry_count(attempt)
                        .with_metadata("delay_ms", serde_json::json!(delay.as_millis() as u64))
                        .debug(&format!("Retrying in {}ms (attempt {} of {})",
                            delay.as_millis(), attempt, self.config.max_attempts));

                    sleep(delay).await;
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            WatcherError::System(SystemError::ResourceExhausted(
                "All retry attempts exhausted".to_string()
            ))
        }))
    }

    /// Calculate delay for the given attempt number
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64;
        let exponential_delay = base_delay * self.config.backoff_multiplier.powi(attempt.saturating_sub(1).min(30) as i32);

        let capped_delay = exponential_delay.min(self.config.max_delay_ms as f64);

        let final_delay = if self.config.jitter {
            let jitter_factor = 0.1; // 10% jitter
            let jitter = capped_delay * jitter_factor * (rand::random::<f64>() - 0.5);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}
