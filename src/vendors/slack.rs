//! Chat delivery through a Slack incoming-webhook URL

use crate::message::{DeliveryMode, Message};
use crate::vendors::Vendor;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const SUPPORTED_MODES: [DeliveryMode; 2] = [DeliveryMode::Slack, DeliveryMode::Im];

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

pub struct SlackVendor {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackVendor {
    pub fn new(config: SlackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Vendor for SlackVendor {
    fn name(&self) -> &str {
        "slack"
    }

    fn supports(&self) -> &[DeliveryMode] {
        &SUPPORTED_MODES
    }

    async fn send(&self, message: &Message) -> Result<Duration> {
        let text = if message.subject.is_empty() {
            message.body.clone()
        } else {
            format!("{}: {}", message.subject, message.body)
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&json!({
                "channel": message.destination,
                "text": text,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VendorSend {
                vendor: "slack".to_string(),
                reason: format!("HTTP {}: {}", status, body),
            });
        }
        Ok(start.elapsed())
    }
}
