//! Statically-configured coordinator for single-node deployments
//!
//! No backend at all: master status and the slave list come straight from
//! configuration and never change. Useful on dev boxes and in deployments
//! that run exactly one sender.

use crate::coordinator::{ClusterCoordinator, ElectionState, NodeAddress, SlaveCycle};
use crate::metrics::MetricsSink;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct NonClusterCoordinator {
    is_master: bool,
    peers: Vec<NodeAddress>,
    slaves: Arc<SlaveCycle>,
    sink: Arc<MetricsSink>,
    shutting_down: AtomicBool,
}

impl NonClusterCoordinator {
    pub fn new(is_master: bool, slaves: Vec<NodeAddress>, sink: Arc<MetricsSink>) -> Self {
        if is_master {
            info!("I am the master sender");
        } else {
            info!("I am a slave sender");
        }
        Self {
            is_master,
            peers: slaves.clone(),
            slaves: Arc::new(SlaveCycle::new(slaves)),
            sink,
            shutting_down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClusterCoordinator for NonClusterCoordinator {
    async fn join(&self) -> Result<()> {
        Ok(())
    }

    async fn update_status(&self) {}

    fn am_i_master(&self) -> Option<bool> {
        if self.shutting_down.load(Ordering::SeqCst) {
            Some(false)
        } else {
            Some(self.is_master)
        }
    }

    fn state(&self) -> ElectionState {
        if self.shutting_down.load(Ordering::SeqCst) {
            ElectionState::ShuttingDown
        } else if self.is_master {
            ElectionState::Master
        } else {
            ElectionState::Slave
        }
    }

    /// There is no shared backend to observe, so no master address is known
    async fn get_current_master(&self) -> Option<NodeAddress> {
        None
    }

    async fn get_current_slaves(&self) -> Vec<NodeAddress> {
        self.peers.clone()
    }

    fn next_slave(&self) -> Option<NodeAddress> {
        if self.shutting_down.load(Ordering::SeqCst) {
            None
        } else {
            self.slaves.next()
        }
    }

    fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    async fn leave_cluster(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.sink.set_master(Some(false));
    }
}
