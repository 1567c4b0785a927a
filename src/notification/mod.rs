pub mod dispatcher;
pub mod message;
pub mod webhook;

pub use dispatcher::NotificationDispatcher;
pub use message::{format_match_alert, format_startup_alert, format_token_alert, Alert};
pub use webhook::{AlertSink, LogSink, WebhookSink};
