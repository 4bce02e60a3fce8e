//! In-process coordination backends
//!
//! Backs the [`LockService`] and [`ElectionStore`] traits with shared
//! in-memory state for development mode and the test suites. Every handle
//! connected to the same [`MemoryCluster`] observes the same lock, party
//! and election tables, so multiple coordinator instances in one process
//! behave like a real cluster.

use crate::coordinator::heartbeat::ElectionStore;
use crate::coordinator::lock::{ConnectionState, LockService};
use crate::coordinator::NodeAddress;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct AnchorRecord {
    address: NodeAddress,
    last_seen_active: Instant,
}

#[derive(Debug, Default)]
struct ClusterState {
    lock_holder: Option<String>,
    party: BTreeSet<String>,
    anchor: Option<AnchorRecord>,
    instances: HashMap<NodeAddress, Instant>,
}

/// Shared state all in-process backends connect to
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything a node registered, as a lost backend session
    /// would. Test hook.
    pub fn evict(&self, identifier: &str) {
        let mut state = self.state.lock();
        if state.lock_holder.as_deref() == Some(identifier) {
            state.lock_holder = None;
        }
        state.party.remove(identifier);
    }

    /// Number of heartbeat rows currently stored. Test hook.
    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }
}

/// In-process [`LockService`], one handle per node.
pub struct MemoryLockService {
    cluster: MemoryCluster,
    connection: watch::Sender<ConnectionState>,
}

impl MemoryLockService {
    pub fn connect(cluster: &MemoryCluster) -> Arc<Self> {
        let (connection, _) = watch::channel(ConnectionState::Connected);
        Arc::new(Self {
            cluster: cluster.clone(),
            connection,
        })
    }

    /// Simulate a connectivity transition for this handle. Test hook.
    pub fn set_connection(&self, state: ConnectionState) {
        let _ = self.connection.send(state);
    }

    fn check_connected(&self) -> Result<()> {
        if *self.connection.borrow() != ConnectionState::Connected {
            return Err(Error::Backend("lock service not connected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, identifier: &str, _timeout: Duration) -> Result<bool> {
        self.check_connected()?;
        let mut state = self.cluster.state.lock();
        match &state.lock_holder {
            Some(holder) if holder != identifier => Ok(false),
            _ => {
                state.lock_holder = Some(identifier.to_string());
                Ok(true)
            }
        }
    }

    async fn release(&self, identifier: &str) -> Result<()> {
        self.check_connected()?;
        let mut state = self.cluster.state.lock();
        if state.lock_holder.as_deref() == Some(identifier) {
            state.lock_holder = None;
        }
        Ok(())
    }

    async fn holder(&self) -> Result<Option<String>> {
        self.check_connected()?;
        Ok(self.cluster.state.lock().lock_holder.clone())
    }

    async fn join_party(&self, identifier: &str) -> Result<()> {
        self.check_connected()?;
        self.cluster
            .state
            .lock()
            .party
            .insert(identifier.to_string());
        Ok(())
    }

    async fn leave_party(&self, identifier: &str) -> Result<()> {
        self.check_connected()?;
        self.cluster.state.lock().party.remove(identifier);
        Ok(())
    }

    async fn party_members(&self) -> Result<Vec<String>> {
        self.check_connected()?;
        Ok(self.cluster.state.lock().party.iter().cloned().collect())
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }
}

/// In-process [`ElectionStore`]. The whole claim-or-refresh step runs
/// inside one mutex critical section, matching the atomicity the trait
/// demands of relational implementations.
pub struct MemoryElectionStore {
    cluster: MemoryCluster,
    failing: AtomicBool,
}

impl MemoryElectionStore {
    pub fn connect(cluster: &MemoryCluster) -> Arc<Self> {
        Arc::new(Self {
            cluster: cluster.clone(),
            failing: AtomicBool::new(false),
        })
    }

    /// Make every store operation fail, simulating a database outage.
    /// Test hook.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Backend("election store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ElectionStore for MemoryElectionStore {
    async fn claim_or_refresh(&self, me: &NodeAddress, takeover: Duration) -> Result<NodeAddress> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.cluster.state.lock();

        match &mut state.anchor {
            None => {
                state.anchor = Some(AnchorRecord {
                    address: me.clone(),
                    last_seen_active: now,
                });
                Ok(me.clone())
            }
            Some(anchor) if anchor.address == *me => {
                anchor.last_seen_active = now;
                Ok(me.clone())
            }
            Some(anchor) if now.duration_since(anchor.last_seen_active) > takeover => {
                anchor.address = me.clone();
                anchor.last_seen_active = now;
                Ok(me.clone())
            }
            Some(anchor) => Ok(anchor.address.clone()),
        }
    }

    async fn current_master(&self) -> Result<Option<NodeAddress>> {
        self.check_available()?;
        Ok(self
            .cluster
            .state
            .lock()
            .anchor
            .as_ref()
            .map(|anchor| anchor.address.clone()))
    }

    async fn upsert_heartbeat(&self, me: &NodeAddress) -> Result<()> {
        self.check_available()?;
        self.cluster
            .state
            .lock()
            .instances
            .insert(me.clone(), Instant::now());
        Ok(())
    }

    async fn live_instances(&self, within: Duration) -> Result<Vec<NodeAddress>> {
        self.check_available()?;
        let now = Instant::now();
        let mut live: Vec<NodeAddress> = self
            .cluster
            .state
            .lock()
            .instances
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) <= within)
            .map(|(addr, _)| addr.clone())
            .collect();
        live.sort_by_key(|addr| addr.to_string());
        Ok(live)
    }

    async fn remove_instance(&self, addr: &NodeAddress) -> Result<()> {
        self.check_available()?;
        self.cluster.state.lock().instances.remove(addr);
        Ok(())
    }

    async fn prune_stale(&self, older_than: Duration) -> Result<u64> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.cluster.state.lock();
        let before = state.instances.len();
        state
            .instances
            .retain(|_, last_seen| now.duration_since(*last_seen) <= older_than);
        Ok((before - state.instances.len()) as u64)
    }
}
