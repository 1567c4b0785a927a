pub mod blockchain;
pub mod models;
pub mod notification;
pub mod api;
pub mod error;
pub mod logging;
pub mod retry;
pub mod config;
pub mod stats;
pub mod orchestrator;

pub use blockchain::{ChainClient, Deduplicator, GapTracker, HeightEvent, HeightSource};
pub use error::{WatcherError, Result};
pub use logging::{LogContext, PerformanceMonitor, ErrorLogger, MetricsLogger};
pub use retry::{RetryManager, RetryConfig};
pub use config::{AppConfig, RpcConfig, SubscriptionConfig, ProcessingConfig, NotificationConfig, ApiConfig, LoggingConfig};
pub use orchestrator::{HeightOutcome, Orchestrator, StatusReport};
pub use stats::{PipelineStats, StatsSnapshot};
