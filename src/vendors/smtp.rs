//! Email delivery through an SMTP relay

use crate::message::{DeliveryMode, Message};
use crate::vendors::Vendor;
use crate::{Error, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::Deserialize;
use std::time::{Duration, Instant};

const SUPPORTED_MODES: [DeliveryMode; 2] = [DeliveryMode::Email, DeliveryMode::Im];

fn default_port() -> u16 {
    25
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Relay host mail is submitted through
    pub relay: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address messages originate from
    pub from: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

pub struct SmtpVendor {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpVendor {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let from = config
            .from
            .parse()
            .map_err(|e| Error::Config(format!("smtp from address: {}", e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.relay)
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Vendor for SmtpVendor {
    fn name(&self) -> &str {
        "smtp"
    }

    fn supports(&self) -> &[DeliveryMode] {
        &SUPPORTED_MODES
    }

    async fn send(&self, message: &Message) -> Result<Duration> {
        let to: Mailbox = message.destination.parse().map_err(|e| Error::VendorSend {
            vendor: "smtp".to_string(),
            reason: format!("bad destination {}: {}", message.destination, e),
        })?;

        let email = lettre::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .body(message.body.clone())
            .map_err(|e| Error::VendorSend {
                vendor: "smtp".to_string(),
                reason: e.to_string(),
            })?;

        let start = Instant::now();
        self.transport
            .send(email)
            .await
            .map_err(|e| Error::VendorSend {
                vendor: "smtp".to_string(),
                reason: e.to_string(),
            })?;
        Ok(start.elapsed())
    }
}
