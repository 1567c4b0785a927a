use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::{DispatchError, Result};
use crate::notification::message::Alert;

/// Destination for rendered alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<()>;

    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct RobotResponse {
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: String,
}

/// Markdown chat robot webhook (DingTalk message format)
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(DispatchError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let payload = json!({
            "msgtype": "markdown",
            "markdown": {
                "title": alert.title,
                "text": alert.text,
            },
            "at": { "isAtAll": false },
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(DispatchError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()).into());
        }

        // A 2xx without a robot envelope is accepted as delivered
        let body = response.text().await.map_err(DispatchError::Http)?;
        match serde_json::from_str::<RobotResponse>(&body) {
            Ok(RobotResponse { errcode: Some(code), errmsg }) if code != 0 => {
                Err(DispatchError::Rejected { code, message: errmsg }.into())
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Used when no webhook is configured: alerts only reach the log
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        log::info!("{}\n{}", alert.title, alert.text);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
