//! Relational-heartbeat election backend
//!
//! Emulates compare-and-swap leader takeover on top of two relational
//! tables: an "anchor" record holding (address, last_seen_active) and an
//! instances table of per-node heartbeats. A node becomes master by
//! conditionally replacing a stale anchor with its own address; slaves
//! advertise themselves through heartbeat rows so the master can discover
//! them.

use crate::coordinator::{ClusterCoordinator, ElectionState, NodeAddress, SlaveCycle};
use crate::metrics::MetricsSink;
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Anchor staleness after which another node may take over mastership
pub const MASTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat staleness after which an instance row is pruned
pub const INSTANCE_EXPIRY: Duration = Duration::from_secs(60);

/// Period of the master's stale-instance cleanup task
pub const CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

/// Storage contract for the heartbeat election.
///
/// `claim_or_refresh` MUST execute its read-modify-write atomically: a
/// single conditional upsert (MySQL `INSERT .. ON DUPLICATE KEY UPDATE`
/// runs under the anchor row's lock) or an equivalent serializable
/// operation. Two separate read-then-write statements under default
/// isolation would allow two nodes to claim the anchor simultaneously.
#[async_trait]
pub trait ElectionStore: Send + Sync {
    /// Atomically claim the anchor if it is older than `takeover`, or
    /// refresh its activity timestamp if `me` already holds it. Returns
    /// the anchor address after the operation.
    async fn claim_or_refresh(&self, me: &NodeAddress, takeover: Duration) -> Result<NodeAddress>;

    /// Anchor address as currently stored, regardless of staleness
    async fn current_master(&self) -> Result<Option<NodeAddress>>;

    /// Insert or refresh this node's heartbeat row
    async fn upsert_heartbeat(&self, me: &NodeAddress) -> Result<()>;

    /// Addresses with a heartbeat newer than `within`
    async fn live_instances(&self, within: Duration) -> Result<Vec<NodeAddress>>;

    /// Delete one node's heartbeat row
    async fn remove_instance(&self, addr: &NodeAddress) -> Result<()>;

    /// Delete heartbeat rows stale beyond `older_than`; returns rows removed
    async fn prune_stale(&self, older_than: Duration) -> Result<u64>;
}

/// The master's supervised cleanup loop, cancelled deterministically on
/// demotion rather than abandoned
struct CleanupTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Coordinator backend over a relational election store.
pub struct HeartbeatCoordinator {
    me: NodeAddress,
    store: Arc<dyn ElectionStore>,
    sink: Arc<MetricsSink>,
    state: RwLock<ElectionState>,
    slaves: RwLock<Arc<SlaveCycle>>,
    shutting_down: AtomicBool,
    cleanup: tokio::sync::Mutex<Option<CleanupTask>>,
    takeover: Duration,
    instance_expiry: Duration,
    cleanup_period: Duration,
}

impl HeartbeatCoordinator {
    pub fn new(me: NodeAddress, store: Arc<dyn ElectionStore>, sink: Arc<MetricsSink>) -> Self {
        Self {
            me,
            store,
            sink,
            state: RwLock::new(ElectionState::Unknown),
            slaves: RwLock::new(Arc::new(SlaveCycle::empty())),
            shutting_down: AtomicBool::new(false),
            cleanup: tokio::sync::Mutex::new(None),
            takeover: MASTER_TIMEOUT,
            instance_expiry: INSTANCE_EXPIRY,
            cleanup_period: CLEANUP_PERIOD,
        }
    }

    /// Override the anchor takeover timeout
    pub fn with_takeover(mut self, takeover: Duration) -> Self {
        self.takeover = takeover;
        self
    }

    /// Override the heartbeat expiry used by the cleanup task
    pub fn with_instance_expiry(mut self, expiry: Duration) -> Self {
        self.instance_expiry = expiry;
        self
    }

    /// Override the cleanup task period
    pub fn with_cleanup_period(mut self, period: Duration) -> Self {
        self.cleanup_period = period;
        self
    }

    fn replace_slaves(&self, peers: Vec<NodeAddress>) {
        *self.slaves.write() = Arc::new(SlaveCycle::new(peers));
    }

    /// Start the stale-instance pruner. Called exactly on the transition
    /// into Master; a second call while one is running is a no-op.
    async fn start_cleanup(&self) {
        let mut guard = self.cleanup.lock().await;
        if guard.is_some() {
            return;
        }

        info!("Starting stale-instance cleanup task");
        let token = CancellationToken::new();
        let child = token.clone();
        let store = Arc::clone(&self.store);
        let period = self.cleanup_period;
        let expiry = self.instance_expiry;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match store.prune_stale(expiry).await {
                            Ok(0) => {}
                            Ok(removed) => info!("Pruned {} stale sender instance rows", removed),
                            Err(e) => warn!("Failed pruning stale sender instances: {}", e),
                        }
                    }
                    _ = child.cancelled() => break,
                }
            }
        });

        *guard = Some(CleanupTask { token, handle });
    }

    /// Cancel the pruner. Called exactly on the transition out of Master
    /// and on shutdown; waits for the loop to exit so at most one cleanup
    /// task exists cluster-wide while at most one master does.
    async fn stop_cleanup(&self) {
        let task = self.cleanup.lock().await.take();
        if let Some(task) = task {
            info!("Stopping stale-instance cleanup task");
            task.token.cancel();
            let _ = task.handle.await;
        }
    }

    async fn demote(&self) {
        self.replace_slaves(Vec::new());
        if !self.shutting_down.load(Ordering::SeqCst) {
            *self.state.write() = ElectionState::Slave;
        }
        self.stop_cleanup().await;
    }
}

#[async_trait]
impl ClusterCoordinator for HeartbeatCoordinator {
    async fn join(&self) -> Result<()> {
        self.store.upsert_heartbeat(&self.me).await
    }

    async fn update_status(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let anchor = match self.store.claim_or_refresh(&self.me, self.takeover).await {
            Ok(anchor) => anchor,
            Err(e) => {
                warn!(
                    "Election store unreachable, treating node as slave for this tick: {}",
                    e
                );
                self.demote().await;
                return;
            }
        };

        if anchor == self.me {
            let peers = match self.store.live_instances(self.takeover).await {
                Ok(instances) => instances
                    .into_iter()
                    .filter(|addr| *addr != self.me)
                    .collect(),
                Err(e) => {
                    warn!("Failed listing live sender instances: {}", e);
                    Vec::new()
                }
            };
            self.replace_slaves(peers);

            let was_master = {
                let mut state = self.state.write();
                let was = *state == ElectionState::Master;
                *state = ElectionState::Master;
                was
            };
            if !was_master {
                self.start_cleanup().await;
            }
        } else {
            // Keep our heartbeat fresh so the current master sees us
            if let Err(e) = self.store.upsert_heartbeat(&self.me).await {
                warn!("Failed upserting own heartbeat: {}", e);
            }
            self.demote().await;
        }
    }

    fn am_i_master(&self) -> Option<bool> {
        match *self.state.read() {
            ElectionState::Unknown => None,
            ElectionState::Master => Some(true),
            ElectionState::Slave | ElectionState::ShuttingDown => Some(false),
        }
    }

    fn state(&self) -> ElectionState {
        *self.state.read()
    }

    async fn get_current_master(&self) -> Option<NodeAddress> {
        match self.store.current_master().await {
            Ok(master) => master,
            Err(e) => {
                warn!("Failed reading anchor record: {}", e);
                None
            }
        }
    }

    async fn get_current_slaves(&self) -> Vec<NodeAddress> {
        let master = self.store.current_master().await.unwrap_or(None);
        match self.store.live_instances(self.takeover).await {
            Ok(instances) => instances
                .into_iter()
                .filter(|addr| *addr != self.me && Some(addr) != master.as_ref())
                .collect(),
            Err(e) => {
                warn!("Failed listing live sender instances: {}", e);
                Vec::new()
            }
        }
    }

    fn next_slave(&self) -> Option<NodeAddress> {
        self.slaves.read().next()
    }

    fn slave_count(&self) -> usize {
        self.slaves.read().len()
    }

    async fn leave_cluster(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_cleanup().await;

        // Drop our heartbeat row immediately; the anchor is left to expire
        // so a survivor takes over within one takeover window.
        if let Err(e) = self.store.remove_instance(&self.me).await {
            warn!("Failed removing own heartbeat row: {}", e);
        }

        self.replace_slaves(Vec::new());
        *self.state.write() = ElectionState::ShuttingDown;
        self.sink.set_master(Some(false));
    }
}
