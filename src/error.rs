//! Error types for the herald sender core

use crate::message::Message;
use std::fmt;

/// Result type alias for herald operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for herald operations
#[derive(Debug)]
pub enum Error {
    /// Coordination backend (lock service or database) temporarily unreachable
    Backend(String),
    /// Lock acquisition timed out, which should not happen under the
    /// non-blocking acquisition policy
    LockTimeout,
    /// An in-flight backend operation was cancelled (backend disconnect or
    /// process shutdown)
    Cancelled,
    /// A single vendor delivery attempt failed
    VendorSend { vendor: String, reason: String },
    /// Every bounded delivery attempt failed for a message
    DispatchExhausted { message: Box<Message> },
    /// Configuration errors
    Config(String),
    /// Malformed host:port address
    AddressParse(String),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Relational election store errors
    Database(sqlx::Error),
    /// HTTP errors from vendor API calls
    Http(reqwest::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Database(e) => Some(e),
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Backend(msg) => write!(f, "Coordination backend error: {}", msg),
            Error::LockTimeout => write!(f, "Master lock acquisition timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::VendorSend { vendor, reason } => {
                write!(f, "Vendor {} failed to send: {}", vendor, reason)
            }
            Error::DispatchExhausted { message } => write!(
                f,
                "All {} vendors failed for message to {}",
                message.mode, message.destination
            ),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::AddressParse(addr) => write!(f, "Failed parsing address from {}", addr),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
