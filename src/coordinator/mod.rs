//! Cluster coordination for the distributed sender fleet
//!
//! Elects exactly one active master sender among N peer processes and
//! tracks live slave peers so the master can redistribute work. Two
//! interchangeable backends exist: a consensus-lock service
//! ([`lock::LockCoordinator`]) and a relational heartbeat table
//! ([`heartbeat::HeartbeatCoordinator`]). Callers go through the
//! [`ClusterCoordinator`] trait and never need to know which is active.

pub mod heartbeat;
pub mod lock;
pub mod memory;
pub mod mysql;
pub mod noncluster;

pub use heartbeat::{ElectionStore, HeartbeatCoordinator};
pub use lock::{ConnectionState, LockCoordinator, LockService};
pub use memory::{MemoryCluster, MemoryElectionStore, MemoryLockService};
pub use mysql::MySqlElectionStore;
pub use noncluster::NonClusterCoordinator;

use crate::metrics::MetricsSink;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Period between status-update ticks
pub const UPDATE_PERIOD: Duration = Duration::from_secs(3);

/// Address of one sender process, compared by value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::AddressParse(s.to_string()))?;
        if host.is_empty() {
            return Err(Error::AddressParse(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| Error::AddressParse(s.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Election status of one coordinator instance.
///
/// Unknown holds only before the first successful tick or immediately after
/// a backend disconnect. ShuttingDown is terminal; a coordinator never
/// re-enters Master after `leave_cluster`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Unknown,
    Master,
    Slave,
    ShuttingDown,
}

/// One tick's snapshot of live peers, traversed as an infinite cycle.
///
/// The snapshot is immutable once built; membership changes are applied by
/// swapping in a freshly built cycle, never by mutating one an in-flight
/// consumer may be traversing. The cursor is an index modulo the snapshot
/// length, so a fetch never blocks and an empty snapshot is a valid
/// "no slaves" sentinel.
#[derive(Debug, Default)]
pub struct SlaveCycle {
    peers: Vec<NodeAddress>,
    cursor: AtomicUsize,
}

impl SlaveCycle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(peers: Vec<NodeAddress>) -> Self {
        Self {
            peers,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next peer in rotation order, or None when the snapshot is empty.
    ///
    /// Ordering is stable within the tick that built this cycle; callers
    /// must not assume positional stability across ticks.
    pub fn next(&self) -> Option<NodeAddress> {
        if self.peers.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.peers.len();
        Some(self.peers[index].clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Common contract of both coordination backends.
///
/// `update_status` is driven by a single dedicated background task per
/// process ([`run_status_updates`]) and is never concurrent with itself.
/// The read accessors are safe from arbitrary tasks and return best-effort
/// answers: on backend trouble they yield None/empty rather than an error,
/// since cluster-status visibility is advisory.
#[async_trait]
pub trait ClusterCoordinator: Send + Sync {
    /// Announce this node's presence to the cluster. Idempotent.
    async fn join(&self) -> Result<()>;

    /// Run one election tick. Never fails: backend trouble is logged and the
    /// node is treated as non-master until the next tick.
    async fn update_status(&self);

    /// Whether this node is currently the master. None before the first
    /// successful tick; Some(false) once shutting down.
    fn am_i_master(&self) -> Option<bool>;

    /// Current election state of this instance
    fn state(&self) -> ElectionState;

    /// Address of the current cluster master, if one can be observed
    async fn get_current_master(&self) -> Option<NodeAddress>;

    /// Live peers as of the latest observation, never including this node
    async fn get_current_slaves(&self) -> Vec<NodeAddress>;

    /// Next slave in rotation order to forward work to, or None when this
    /// node sees no slaves (including whenever it is not master)
    fn next_slave(&self) -> Option<NodeAddress>;

    /// Number of slaves in the current cycle
    fn slave_count(&self) -> usize;

    /// Leave the cluster: cancel any in-flight election attempt, release
    /// held resources and stop reporting as master. Idempotent, bounded.
    async fn leave_cluster(&self);
}

/// Drive `update_status` on a fixed period until the token is cancelled.
///
/// Spawn exactly one of these per coordinator instance; the single-flight
/// loop is what keeps tick execution serialized.
pub async fn run_status_updates(
    coordinator: Arc<dyn ClusterCoordinator>,
    sink: Arc<MetricsSink>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let before = coordinator.am_i_master();
                coordinator.update_status().await;
                let after = coordinator.am_i_master();

                if after == Some(true) {
                    if before != after {
                        info!("I am the master sender");
                    } else {
                        debug!("I am the master sender");
                    }
                } else if before != after {
                    info!("I am a slave sender");
                } else {
                    debug!("I am a slave sender");
                }

                sink.set_master(after);
                sink.set_slave_count(coordinator.slave_count());
            }
            _ = shutdown.cancelled() => {
                info!("Coordinator status loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_address_display_and_parse_round_trip() {
        let addr = NodeAddress::new("sender1.example.com", 2321);
        assert_eq!(addr.to_string(), "sender1.example.com:2321");
        assert_eq!(addr.to_string().parse::<NodeAddress>().unwrap(), addr);
    }

    #[test]
    fn node_address_rejects_garbage() {
        assert!("no-port-here".parse::<NodeAddress>().is_err());
        assert!(":8080".parse::<NodeAddress>().is_err());
        assert!("host:notaport".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn empty_cycle_yields_none_without_blocking() {
        let cycle = SlaveCycle::empty();
        assert!(cycle.is_empty());
        assert_eq!(cycle.next(), None);
        assert_eq!(cycle.next(), None);
    }

    #[test]
    fn cycle_repeats_in_stable_order() {
        let peers = vec![
            NodeAddress::new("a", 1),
            NodeAddress::new("b", 2),
            NodeAddress::new("c", 3),
        ];
        let cycle = SlaveCycle::new(peers.clone());

        let drawn: Vec<_> = (0..6).filter_map(|_| cycle.next()).collect();
        assert_eq!(&drawn[..3], &peers[..]);
        assert_eq!(&drawn[3..], &peers[..], "Cycle should wrap around");
    }
}
