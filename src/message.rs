//! Outbound message payload and delivery modes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery channel for an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Email delivery
    Email,
    /// Text message delivery
    Sms,
    /// Voice call delivery
    Call,
    /// Generic instant-message delivery
    Im,
    /// Slack delivery
    Slack,
}

impl DeliveryMode {
    /// Every delivery mode the platform knows about
    pub const ALL: [DeliveryMode; 5] = [
        DeliveryMode::Email,
        DeliveryMode::Sms,
        DeliveryMode::Call,
        DeliveryMode::Im,
        DeliveryMode::Slack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Email => "email",
            DeliveryMode::Sms => "sms",
            DeliveryMode::Call => "call",
            DeliveryMode::Im => "im",
            DeliveryMode::Slack => "slack",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound message as handed to the dispatch engine.
///
/// Transient: herald never persists messages. Storage, deduplication and
/// retry-after-exhaustion policy belong to the API/escalation layer that
/// produced the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Delivery channel to use
    pub mode: DeliveryMode,
    /// Mode-specific destination (phone number, email address, channel name)
    pub destination: String,
    /// Subject line, where the mode has one
    #[serde(default)]
    pub subject: String,
    /// Message body
    #[serde(default)]
    pub body: String,
    /// Username or role the message is addressed to
    #[serde(default)]
    pub target: String,
    /// Application that generated the message, used to select an
    /// application-specific vendor rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    /// Incident this message belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<u64>,
    /// Persistent message ID assigned by the API layer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u64>,
    /// Free-form context the originating application attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl Message {
    /// Create a minimal message with the given mode and destination
    pub fn new(mode: DeliveryMode, destination: impl Into<String>) -> Self {
        Self {
            mode,
            destination: destination.into(),
            subject: String::new(),
            body: String::new(),
            target: String::new(),
            application: None,
            incident_id: None,
            message_id: None,
            context: None,
        }
    }
}
