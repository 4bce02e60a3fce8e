//! Deterministic dummy vendor
//!
//! Logs the send and reports a fixed elapsed time. Supports every mode, so
//! a single instance makes a complete development configuration.

use crate::message::{DeliveryMode, Message};
use crate::vendors::{ApplicationOverride, Vendor};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct DummyVendor {
    time_taken: Duration,
}

impl DummyVendor {
    pub fn new() -> Self {
        Self {
            time_taken: Duration::from_secs(1),
        }
    }

    /// Use a different fixed elapsed time
    pub fn with_time_taken(time_taken: Duration) -> Self {
        Self { time_taken }
    }
}

impl Default for DummyVendor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vendor for DummyVendor {
    fn name(&self) -> &str {
        "dummy"
    }

    fn supports(&self) -> &[DeliveryMode] {
        &DeliveryMode::ALL
    }

    async fn send(&self, message: &Message) -> Result<Duration> {
        let subject: String = message.subject.chars().take(25).collect();
        info!(
            "SEND: {} {} {} {}",
            message.mode,
            message.application.as_deref().unwrap_or("-"),
            message.destination,
            subject
        );
        Ok(self.time_taken)
    }
}

/// Contrived example of how an application can change how its messages are
/// sent: delegates delivery to the wrapped vendor but reports its own
/// elapsed time.
pub struct DummyApp {
    time_taken: Duration,
}

impl DummyApp {
    pub fn new() -> Self {
        Self {
            time_taken: Duration::from_secs(2),
        }
    }
}

impl Default for DummyApp {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationOverride for DummyApp {
    fn name(&self) -> &str {
        "dummy_app"
    }

    fn wrap(&self, vendor: Arc<dyn Vendor>) -> Arc<dyn Vendor> {
        Arc::new(DummyAppVendor {
            inner: vendor,
            time_taken: self.time_taken,
        })
    }
}

struct DummyAppVendor {
    inner: Arc<dyn Vendor>,
    time_taken: Duration,
}

#[async_trait]
impl Vendor for DummyAppVendor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports(&self) -> &[DeliveryMode] {
        self.inner.supports()
    }

    async fn send(&self, message: &Message) -> Result<Duration> {
        self.inner.send(message).await?;
        Ok(self.time_taken)
    }
}
