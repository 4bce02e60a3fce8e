//! Vendor rotation pools and the message dispatch engine
//!
//! The registry groups configured vendor instances by supported mode into
//! shuffled cyclic pools, plus independent per-application override pools.
//! The dispatch engine resolves the right pool for each message and fails
//! over between instances under a hard attempt bound.

use crate::message::{DeliveryMode, Message};
use crate::metrics::MetricsSink;
use crate::vendors::{ApplicationOverride, Vendor};
use crate::{Error, Result};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hard bound on delivery attempts per message
pub const MAX_TRIES_PER_MESSAGE: usize = 5;

/// Cyclic rotation over interchangeable vendor instances.
///
/// Shuffled once at load time so no instance gets a positional advantage;
/// never reshuffled per dispatch. The cursor is an atomic index modulo the
/// pool size, so concurrent callers may interleave draws — uniform long-run
/// coverage is guaranteed, exact per-caller fairness is not.
pub struct VendorPool {
    instances: Vec<Arc<dyn Vendor>>,
    cursor: AtomicUsize,
}

impl VendorPool {
    fn new(mut instances: Vec<Arc<dyn Vendor>>) -> Self {
        let mut rng = rand::rng();
        instances.shuffle(&mut rng);
        Self {
            instances,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next instance in rotation order, or None for an empty pool
    fn next(&self) -> Option<Arc<dyn Vendor>> {
        if self.instances.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        Some(Arc::clone(&self.instances[index]))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Per-mode default rotations plus per-application override rotations,
/// built once at startup and immutable apart from cursor advancement.
pub struct VendorRegistry {
    default_pools: HashMap<DeliveryMode, VendorPool>,
    override_pools: HashMap<String, HashMap<DeliveryMode, VendorPool>>,
    total_instances: usize,
}

impl VendorRegistry {
    pub fn new(
        vendors: Vec<Arc<dyn Vendor>>,
        applications: Vec<Arc<dyn ApplicationOverride>>,
    ) -> Self {
        let mut by_mode: HashMap<DeliveryMode, Vec<Arc<dyn Vendor>>> = HashMap::new();
        for vendor in &vendors {
            for mode in vendor.supports() {
                by_mode.entry(*mode).or_default().push(Arc::clone(vendor));
            }
        }

        // Each application rotates over its own wrapped copies of every
        // base instance, independent of the default pools.
        let mut override_pools = HashMap::new();
        for application in &applications {
            let mut pools = HashMap::new();
            for (mode, instances) in &by_mode {
                let wrapped = instances
                    .iter()
                    .map(|vendor| application.wrap(Arc::clone(vendor)))
                    .collect();
                pools.insert(*mode, VendorPool::new(wrapped));
            }
            override_pools.insert(application.name().to_string(), pools);
        }

        let total_instances = vendors.len();
        let default_pools = by_mode
            .into_iter()
            .map(|(mode, instances)| (mode, VendorPool::new(instances)))
            .collect();

        Self {
            default_pools,
            override_pools,
            total_instances,
        }
    }

    /// Resolve the rotation for a message: the application override pool
    /// when both the application and the mode have one, else the default
    /// pool for the mode. None when no vendor supports the mode at all.
    fn resolve(&self, message: &Message) -> Option<&VendorPool> {
        if let Some(application) = &message.application {
            if let Some(pools) = self.override_pools.get(application) {
                if let Some(pool) = pools.get(&message.mode) {
                    return Some(pool);
                }
            }
        }
        self.default_pools.get(&message.mode)
    }

    /// Number of configured base vendor instances
    pub fn total_instances(&self) -> usize {
        self.total_instances
    }
}

/// Attempts delivery of messages with bounded failover across a rotation.
pub struct DispatchEngine {
    registry: VendorRegistry,
    sink: Arc<MetricsSink>,
}

impl DispatchEngine {
    pub fn new(registry: VendorRegistry, sink: Arc<MetricsSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &VendorRegistry {
        &self.registry
    }

    /// Deliver one message, failing over across the resolved rotation.
    ///
    /// Returns the first successful vendor's elapsed delivery time. A pool
    /// with no instances fails on the first attempt; otherwise instances
    /// are drawn in rotation order, repeating when the pool is smaller than
    /// the attempt bound, and the same instance is never retried
    /// back-to-back while a distinct one is available.
    pub async fn send_message(&self, message: &Message) -> Result<Duration> {
        let pool = self.registry.resolve(message);

        for attempt in 1..=MAX_TRIES_PER_MESSAGE {
            let Some(vendor) = pool.and_then(|pool| pool.next()) else {
                break;
            };

            self.sink.message_attempted(message.mode);
            debug!(
                "Attempting {} send to {} using vendor {} (attempt {}/{})",
                message.mode,
                message.destination,
                vendor.name(),
                attempt,
                MAX_TRIES_PER_MESSAGE
            );

            match vendor.send(message).await {
                Ok(elapsed) => {
                    self.sink.message_sent(message.mode, elapsed);
                    return Ok(elapsed);
                }
                Err(e) => {
                    self.sink.message_failed(message.mode);
                    warn!(
                        "Sending {} message to {} with vendor {} failed: {}",
                        message.mode,
                        message.destination,
                        vendor.name(),
                        e
                    );
                }
            }
        }

        warn!(
            "Exhausted delivery attempts for {} message to {}",
            message.mode, message.destination
        );
        Err(Error::DispatchExhausted {
            message: Box::new(message.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendors::DummyVendor;

    fn vendor_for(modes: &'static [DeliveryMode]) -> Arc<dyn Vendor> {
        struct FixedModes(&'static [DeliveryMode]);

        #[async_trait::async_trait]
        impl Vendor for FixedModes {
            fn name(&self) -> &str {
                "fixed"
            }
            fn supports(&self) -> &[DeliveryMode] {
                self.0
            }
            async fn send(&self, _message: &Message) -> Result<Duration> {
                Ok(Duration::from_secs(1))
            }
        }

        Arc::new(FixedModes(modes))
    }

    #[test]
    fn registry_groups_instances_by_mode() {
        let registry = VendorRegistry::new(
            vec![
                vendor_for(&[DeliveryMode::Sms, DeliveryMode::Call]),
                vendor_for(&[DeliveryMode::Sms]),
            ],
            Vec::new(),
        );

        let sms = Message::new(DeliveryMode::Sms, "15551234567");
        assert_eq!(registry.resolve(&sms).unwrap().len(), 2);

        let call = Message::new(DeliveryMode::Call, "15551234567");
        assert_eq!(registry.resolve(&call).unwrap().len(), 1);

        let email = Message::new(DeliveryMode::Email, "oncall@example.com");
        assert!(registry.resolve(&email).is_none());
    }

    #[test]
    fn unknown_application_falls_back_to_default_pool() {
        let registry = VendorRegistry::new(vec![Arc::new(DummyVendor::new())], Vec::new());

        let mut message = Message::new(DeliveryMode::Sms, "15551234567");
        message.application = Some("no-such-app".to_string());
        assert!(registry.resolve(&message).is_some());
    }

    #[test]
    fn empty_pool_never_yields() {
        let pool = VendorPool::new(Vec::new());
        assert!(pool.is_empty());
        assert!(pool.next().is_none());
    }
}
