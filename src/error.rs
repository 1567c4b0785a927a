use thiserror::Error;

/// Main error type for the wallet watcher
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// RPC-related errors
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC method error: code={code}, message={message}")]
    Method { code: i64, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Rate limit exceeded, retry after {seconds} seconds")]
    RateLimit { seconds: u64 },

    #[error("Block not found: {block_number}")]
    BlockNotFound { block_number: u64 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },
}

/// Block and transaction decoding errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Block parsing failed: {0}")]
    BlockParsing(String),

    #[error("Transaction parsing failed: {0}")]
    TransactionParsing(String),

    #[error("Amount parsing failed: {0}")]
    AmountParsing(String),

    #[error("ABI decoding failed: {0}")]
    AbiDecoding(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("No RPC endpoints configured")]
    NoEndpoints,
}

/// Validation errors raised at the admin API boundary
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Wallet address is required")]
    MissingAddress,

    #[error("Wallet already watched: {0}")]
    DuplicateAddress(String),

    #[error("Wallet not watched: {0}")]
    UnknownAddress(String),
}

/// Webhook delivery errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    Status(u16),

    #[error("Webhook rejected alert: errcode={code}, errmsg={message}")]
    Rejected { code: i64, message: String },

    #[error("Webhook URL not configured")]
    NotConfigured,
}

/// Head subscription errors
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("No notification within {seconds} seconds")]
    Stale { seconds: u64 },

    #[error("Connect timed out after {seconds} seconds")]
    ConnectTimeout { seconds: u64 },
}

/// System-level errors
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Signal received: {0}")]
    Signal(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// High priority errors that affect functionality
    High,
    /// Medium priority errors that may affect performance
    Medium,
    /// Low priority errors that are mostly informational
    Low,
}

impl WatcherError {
    /// Get the severity level of an error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WatcherError::Config(_) => ErrorSeverity::Critical,
            WatcherError::System(SystemError::ResourceExhausted(_)) => ErrorSeverity::Critical,

            WatcherError::Rpc(RpcError::Connection(_)) => ErrorSeverity::High,
            WatcherError::Dispatch(_) => ErrorSeverity::High,
            WatcherError::Processing(_) => ErrorSeverity::High,

            WatcherError::Rpc(RpcError::Timeout { .. }) => ErrorSeverity::Medium,
            WatcherError::Rpc(RpcError::RateLimit { .. }) => ErrorSeverity::Medium,
            WatcherError::Subscription(_) => ErrorSeverity::Medium,

            WatcherError::Validation(_) => ErrorSeverity::Low,
            WatcherError::Rpc(RpcError::BlockNotFound { .. }) => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Transport-level failures: the endpoint, not the payload, is at fault.
    pub fn is_transport(&self) -> bool {
        match self {
            WatcherError::Rpc(RpcError::Timeout { .. })
            | WatcherError::Rpc(RpcError::RateLimit { .. })
            | WatcherError::Rpc(RpcError::Connection(_)) => true,
            WatcherError::Rpc(RpcError::Status { status, .. }) => *status == 429 || *status >= 500,
            WatcherError::Rpc(RpcError::Http(e)) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Protocol failures that count against the endpoint that produced them.
    /// A reverted call or malformed params is the caller's problem, not the node's.
    pub fn is_endpoint_fault(&self) -> bool {
        match self {
            WatcherError::Rpc(RpcError::Json(_))
            | WatcherError::Rpc(RpcError::InvalidResponse(_))
            | WatcherError::Rpc(RpcError::Status { .. }) => true,
            WatcherError::Rpc(RpcError::Method { code, message }) => {
                !matches!(*code, -32600 | -32602) && !message.to_lowercase().contains("revert")
            }
            _ => false,
        }
    }

    /// Check if the error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        if self.is_transport() {
            return true;
        }

        match self {
            WatcherError::Dispatch(DispatchError::Http(_)) => true,
            WatcherError::Dispatch(DispatchError::Status(status)) => *status == 429 || *status >= 500,
            WatcherError::Dispatch(DispatchError::Rejected { .. }) => true,
            WatcherError::Subscription(_) => true,

            // Non-recoverable errors
            WatcherError::Config(_) => false,
            WatcherError::Validation(_) => false,
            WatcherError::Processing(_) => false,
            WatcherError::Dispatch(DispatchError::NotConfigured) => false,

            _ => false,
        }
    }

    /// Get suggested retry delay in seconds for recoverable errors
    pub fn retry_delay(&self) -> Option<u64> {
        if !self.is_recoverable() {
            return None;
        }

        match self {
            WatcherError::Rpc(RpcError::RateLimit { seconds }) => Some(*seconds),
            WatcherError::Rpc(RpcError::Timeout { .. }) => Some(1),
            WatcherError::Rpc(RpcError::Connection(_)) => Some(2),
            WatcherError::Subscription(_) => Some(2),
            _ => Some(1),
        }
    }
}
