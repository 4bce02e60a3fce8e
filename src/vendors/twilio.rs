//! SMS and voice delivery through the Twilio REST API

use crate::message::{DeliveryMode, Message};
use crate::vendors::Vendor;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};

const SUPPORTED_MODES: [DeliveryMode; 2] = [DeliveryMode::Sms, DeliveryMode::Call];

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Number calls and texts originate from
    pub from_number: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

pub struct TwilioVendor {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioVendor {
    pub fn new(config: TwilioConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn message_text(&self, message: &Message) -> String {
        let mut parts = Vec::new();
        if !message.subject.is_empty() {
            parts.push(message.subject.as_str());
        }
        if !message.body.is_empty() {
            parts.push(message.body.as_str());
        }
        parts.join(". ")
    }

    fn api_url(&self, resource: &str) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/{}.json",
            self.config.account_sid, resource
        )
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<()> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VendorSend {
                vendor: "twilio".to_string(),
                reason: format!("HTTP {}: {}", status, body),
            });
        }
        Ok(())
    }

    async fn send_sms(&self, message: &Message) -> Result<()> {
        let text = self.message_text(message);
        self.post_form(
            &self.api_url("Messages"),
            &[
                ("To", message.destination.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Body", text.as_str()),
            ],
        )
        .await
    }

    async fn send_call(&self, message: &Message) -> Result<()> {
        let text = self.message_text(message);
        let twiml = format!(
            "<Response><Say loop=\"3\">{}</Say></Response>",
            xml_escape(&text)
        );
        self.post_form(
            &self.api_url("Calls"),
            &[
                ("To", message.destination.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Twiml", twiml.as_str()),
            ],
        )
        .await
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl Vendor for TwilioVendor {
    fn name(&self) -> &str {
        "twilio"
    }

    fn supports(&self) -> &[DeliveryMode] {
        &SUPPORTED_MODES
    }

    async fn send(&self, message: &Message) -> Result<Duration> {
        let start = Instant::now();
        match message.mode {
            DeliveryMode::Sms => self.send_sms(message).await?,
            DeliveryMode::Call => self.send_call(message).await?,
            other => {
                return Err(Error::VendorSend {
                    vendor: "twilio".to_string(),
                    reason: format!("unsupported mode {}", other),
                })
            }
        }
        Ok(start.elapsed())
    }
}
