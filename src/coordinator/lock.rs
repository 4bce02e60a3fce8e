//! Consensus-lock election backend
//!
//! Elects the master through one cluster-wide mutual-exclusion lock at a
//! well-known path, and tracks liveness through a best-effort membership
//! "party" that every sender joins regardless of role. Lock acquisition is
//! always non-blocking with a short bound so the tick loop never stalls
//! waiting for a lock it may never get.

use crate::coordinator::{ClusterCoordinator, ElectionState, NodeAddress, SlaveCycle};
use crate::metrics::MetricsSink;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bound on one non-blocking lock acquisition attempt
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connectivity of the session to the lock backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Suspended,
    Lost,
}

/// External lock-plus-membership service consumed by [`LockCoordinator`].
///
/// Identifiers are `host:port` strings; the service itself treats them as
/// opaque. Every operation that can hang externally must respect the given
/// bound or the service's own session timeout.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Try to take the master lock for `identifier` without blocking beyond
    /// `timeout`. Returns false when another holder has it.
    async fn try_acquire(&self, identifier: &str, timeout: Duration) -> Result<bool>;

    /// Release the master lock if `identifier` holds it
    async fn release(&self, identifier: &str) -> Result<()>;

    /// Identifier of the current lock holder, if any
    async fn holder(&self) -> Result<Option<String>>;

    /// Register `identifier` in the membership party
    async fn join_party(&self, identifier: &str) -> Result<()>;

    /// Remove `identifier` from the membership party
    async fn leave_party(&self, identifier: &str) -> Result<()>;

    /// All identifiers currently registered in the party
    async fn party_members(&self) -> Result<Vec<String>>;

    /// Watch channel reflecting backend connectivity
    fn watch_connection(&self) -> watch::Receiver<ConnectionState>;
}

/// Coordinator backend over a distributed lock service.
pub struct LockCoordinator {
    me: NodeAddress,
    service: Arc<dyn LockService>,
    sink: Arc<MetricsSink>,
    state: RwLock<ElectionState>,
    slaves: RwLock<Arc<SlaveCycle>>,
    lock_held: AtomicBool,
    participating: AtomicBool,
    shutting_down: AtomicBool,
    /// Cancels the in-flight acquisition attempt; replaced after each cancel
    /// so later ticks can attempt again
    abort_acquire: Mutex<CancellationToken>,
}

impl LockCoordinator {
    /// Create the coordinator and start its connectivity listener.
    ///
    /// The listener resets election state to Unknown and clears the cached
    /// lock-held/participating flags whenever the backend reports Suspended
    /// or Lost, forcing a clean re-election once reconnected instead of
    /// trusting flags the disconnect made unreliable.
    pub fn new(
        me: NodeAddress,
        service: Arc<dyn LockService>,
        sink: Arc<MetricsSink>,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            me,
            service,
            sink,
            state: RwLock::new(ElectionState::Unknown),
            slaves: RwLock::new(Arc::new(SlaveCycle::empty())),
            lock_held: AtomicBool::new(false),
            participating: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            abort_acquire: Mutex::new(CancellationToken::new()),
        });
        coordinator.spawn_connection_listener();
        coordinator
    }

    fn spawn_connection_listener(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut connection = self.service.watch_connection();

        tokio::spawn(async move {
            while connection.changed().await.is_ok() {
                let state = *connection.borrow();
                let Some(coordinator) = weak.upgrade() else {
                    return;
                };

                if matches!(state, ConnectionState::Suspended | ConnectionState::Lost) {
                    info!(
                        "Lock backend transitioned to {:?}, resetting election state",
                        state
                    );
                    coordinator.cancel_pending_acquire();
                    coordinator.lock_held.store(false, Ordering::SeqCst);
                    coordinator.participating.store(false, Ordering::SeqCst);
                    if !coordinator.shutting_down.load(Ordering::SeqCst) {
                        *coordinator.state.write() = ElectionState::Unknown;
                    }
                }
            }
        });
    }

    fn cancel_pending_acquire(&self) {
        let mut token = self.abort_acquire.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    fn acquire_abort_token(&self) -> CancellationToken {
        self.abort_acquire.lock().clone()
    }

    fn replace_slaves(&self, peers: Vec<NodeAddress>) {
        *self.slaves.write() = Arc::new(SlaveCycle::new(peers));
    }

    fn connected(&self) -> bool {
        *self.service.watch_connection().borrow() == ConnectionState::Connected
    }

    /// One acquisition attempt, raced against the abort token so shutdown
    /// and disconnects never wait out the acquisition bound.
    async fn attempt_lock(&self) -> bool {
        let identifier = self.me.to_string();
        let abort = self.acquire_abort_token();

        let attempt = tokio::select! {
            result = self.service.try_acquire(&identifier, ACQUIRE_TIMEOUT) => result,
            _ = abort.cancelled() => Err(Error::Cancelled),
        };

        match attempt {
            Ok(acquired) => {
                self.lock_held.store(acquired, Ordering::SeqCst);
                acquired
            }
            // Expected while recovering from a backend disconnect
            Err(Error::Cancelled) => {
                debug!("Master lock acquisition cancelled");
                false
            }
            Err(Error::LockTimeout) => {
                warn!("Master lock acquisition timed out, which should not happen with non-blocking acquisition");
                false
            }
            Err(e) => {
                warn!("Backend problem while trying to acquire master lock: {}", e);
                false
            }
        }
    }

    fn parse_members(&self, members: Vec<String>, exclude_self: bool) -> Vec<NodeAddress> {
        let me = self.me.to_string();
        members
            .into_iter()
            .filter(|member| !exclude_self || *member != me)
            .filter_map(|member| match member.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!("Failed getting address tuple from {}", member);
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl ClusterCoordinator for LockCoordinator {
    async fn join(&self) -> Result<()> {
        self.service.join_party(&self.me.to_string()).await?;
        self.participating.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn update_status(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        if !self.connected() {
            warn!("Lock backend is not connected, treating node as non-master");
            self.replace_slaves(Vec::new());
            *self.state.write() = ElectionState::Slave;
            return;
        }

        // Stay registered in the party regardless of role so the cluster
        // sees this node, even if the backend reset our participation.
        if !self.participating.load(Ordering::SeqCst) {
            match self.service.join_party(&self.me.to_string()).await {
                Ok(()) => {
                    self.participating.store(true, Ordering::SeqCst);
                }
                Err(e) => warn!("Failed re-joining party: {}", e),
            }
        }

        let is_master = if self.lock_held.load(Ordering::SeqCst) {
            true
        } else {
            self.attempt_lock().await
        };

        if is_master {
            match self.service.party_members().await {
                Ok(members) => {
                    let peers = self.parse_members(members, true);
                    self.replace_slaves(peers);
                }
                Err(e) => {
                    warn!("Failed listing party members: {}", e);
                    self.replace_slaves(Vec::new());
                }
            }
            *self.state.write() = ElectionState::Master;
        } else {
            self.replace_slaves(Vec::new());
            *self.state.write() = ElectionState::Slave;
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
        match self.service.holder().await {
            Ok(holder) => holder.and_then(|identifier| identifier.parse().ok()),
            Err(e) => {
                warn!("Failed getting master lock holder: {}", e);
                None
            }
        }
    }

    async fn get_current_slaves(&self) -> Vec<NodeAddress> {
        // The lock holder sits in the party like everyone else but is the
        // master, never a slave.
        let holder = self.service.holder().await.unwrap_or(None);
        match self.service.party_members().await {
            Ok(members) => {
                let members = members
                    .into_iter()
                    .filter(|member| holder.as_deref() != Some(member.as_str()))
                    .collect();
                self.parse_members(members, true)
            }
            Err(e) => {
                warn!("Failed getting party members: {}", e);
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

        // Cancel any attempt to acquire the master lock which could make us
        // hang past the shutdown deadline.
        self.cancel_pending_acquire();

        let identifier = self.me.to_string();
        if self.participating.swap(false, Ordering::SeqCst) {
            info!("Leaving party");
            if let Err(e) = self.service.leave_party(&identifier).await {
                warn!("Failed leaving party: {}", e);
            }
        }
        if self.lock_held.swap(false, Ordering::SeqCst) {
            info!("Releasing master lock");
            if let Err(e) = self.service.release(&identifier).await {
                warn!("Failed releasing master lock: {}", e);
            }
        }

        self.replace_slaves(Vec::new());
        *self.state.write() = ElectionState::ShuttingDown;
        self.sink.set_master(Some(false));
    }
}
