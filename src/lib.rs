//! # Herald
//!
//! The distributed sender core of a paging/notification platform. Herald
//! turns incidents into outbound messages (SMS, voice, email, chat) and
//! delivers them reliably while sender processes scale horizontally.
//!
//! ## Architecture
//!
//! - **Coordinator**: elects exactly one active master sender among N peer
//!   processes and tracks live slave peers for work redistribution. Two
//!   interchangeable backends: a consensus-lock service (ZooKeeper-style
//!   lock + membership party) and a relational heartbeat table with
//!   compare-and-swap leader takeover.
//! - **Dispatch engine**: load-balances message delivery across shuffled
//!   rotations of heterogeneous vendor backends, failing over between
//!   instances with a hard bound of five attempts per message.
//!
//! The REST API, escalation engine and webhook ingestion live elsewhere;
//! they produce [`message::Message`] values for this core to deliver and
//! consume its cluster-status queries.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod message;
pub mod metrics;
pub mod telemetry;
pub mod vendors;

mod error;

pub use error::{Error, Result};
