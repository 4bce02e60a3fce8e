//! Vendor contract and concrete delivery backends
//!
//! Every delivery vendor implements the same small capability set: the
//! fixed list of modes it supports and a `send` that either reports the
//! elapsed delivery time or fails. Concrete vendors own their external
//! protocols and failure semantics; the dispatch engine only sees the
//! uniform contract.

pub mod dummy;
pub mod slack;
pub mod smtp;
pub mod twilio;

pub use dummy::{DummyApp, DummyVendor};
pub use slack::{SlackConfig, SlackVendor};
pub use smtp::{SmtpConfig, SmtpVendor};
pub use twilio::{TwilioConfig, TwilioVendor};

use crate::message::{DeliveryMode, Message};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Uniform capability contract all delivery vendors implement
#[async_trait]
pub trait Vendor: Send + Sync {
    /// Short name used in logs and error reports
    fn name(&self) -> &str;

    /// Fixed set of delivery modes this instance can serve
    fn supports(&self) -> &[DeliveryMode];

    /// Deliver one message, returning the elapsed delivery time
    async fn send(&self, message: &Message) -> Result<Duration>;
}

/// Application-specific wrapper around base vendor instances.
///
/// An override inherits the wrapped instance's configuration while changing
/// how sends behave for one application. The registry builds an independent
/// rotation from wrapped copies of every base instance, so override traffic
/// cannot skew the default pool's fairness or vice versa.
pub trait ApplicationOverride: Send + Sync {
    /// Application name messages select the override by
    fn name(&self) -> &str;

    /// Wrap one base vendor instance with this application's behavior
    fn wrap(&self, vendor: Arc<dyn Vendor>) -> Arc<dyn Vendor>;
}
