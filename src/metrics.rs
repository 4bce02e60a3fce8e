//! Write-only metrics sink
//!
//! Fire-and-forget counters and gauges consumed by dashboards and the
//! Prometheus exporter. Observation failures are never surfaced to callers;
//! cluster-status metrics are advisory, not correctness-critical.

use crate::message::DeliveryMode;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-mode delivery-time aggregates feeding the `{mode}_min` / `{mode}_max`
/// / `{mode}_total` gauges
struct ModeTimer {
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    total_ms: AtomicU64,
}

impl ModeTimer {
    fn new() -> Self {
        Self {
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
        }
    }
}

/// Metrics emitted by the sender subsystem.
///
/// One sink per process, shared by the coordinator status loop and the
/// dispatch engine.
pub struct MetricsSink {
    timers: HashMap<DeliveryMode, ModeTimer>,
}

impl MetricsSink {
    pub fn new() -> Self {
        let timers = DeliveryMode::ALL
            .iter()
            .map(|mode| (*mode, ModeTimer::new()))
            .collect();
        Self { timers }
    }

    /// Record one delivery attempt for a mode (`{mode}_cnt`)
    pub fn message_attempted(&self, mode: DeliveryMode) {
        counter!(format!("{}_cnt", mode)).increment(1);
    }

    /// Record a successful delivery and its elapsed time
    pub fn message_sent(&self, mode: DeliveryMode, elapsed: Duration) {
        counter!(format!("{}_sent", mode)).increment(1);

        let ms = elapsed.as_millis() as u64;
        if let Some(timer) = self.timers.get(&mode) {
            let min = timer.min_ms.fetch_min(ms, Ordering::Relaxed).min(ms);
            let max = timer.max_ms.fetch_max(ms, Ordering::Relaxed).max(ms);
            let total = timer.total_ms.fetch_add(ms, Ordering::Relaxed) + ms;
            gauge!(format!("{}_min", mode)).set(min as f64);
            gauge!(format!("{}_max", mode)).set(max as f64);
            gauge!(format!("{}_total", mode)).set(total as f64);
        }
    }

    /// Record a failed delivery attempt (`{mode}_fail`)
    pub fn message_failed(&self, mode: DeliveryMode) {
        counter!(format!("{}_fail", mode)).increment(1);
    }

    /// Record a background task dying unexpectedly
    pub fn task_failure(&self) {
        counter!("task_failure").increment(1);
    }

    /// Report this node's master status (0/1). Unknown counts as 0.
    pub fn set_master(&self, is_master: Option<bool>) {
        let value = if is_master == Some(true) { 1.0 } else { 0.0 };
        gauge!("is_master_sender").set(value);
    }

    /// Report the number of live slaves observed in the last tick
    pub fn set_slave_count(&self, count: usize) {
        gauge!("slave_instance_count").set(count as f64);
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}
