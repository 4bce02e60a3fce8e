//! Heartbeat (relational) coordinator election behavior over the
//! in-process election store
//!
//! Timeouts are shrunk to keep each test under a couple of seconds while
//! preserving the ratios of the production defaults.

use herald::coordinator::{
    run_status_updates, ClusterCoordinator, ElectionStore, HeartbeatCoordinator, MemoryCluster,
    MemoryElectionStore, NodeAddress,
};
use herald::metrics::MetricsSink;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TAKEOVER: Duration = Duration::from_millis(300);
const TICK: Duration = Duration::from_millis(50);

fn addr(port: u16) -> NodeAddress {
    NodeAddress::new("10.0.2.1", port)
}

fn sink() -> Arc<MetricsSink> {
    Arc::new(MetricsSink::new())
}

fn coordinator(cluster: &MemoryCluster, port: u16) -> HeartbeatCoordinator {
    HeartbeatCoordinator::new(addr(port), MemoryElectionStore::connect(cluster), sink())
        .with_takeover(TAKEOVER)
        .with_instance_expiry(Duration::from_millis(600))
        .with_cleanup_period(Duration::from_millis(100))
}

/// Tick every coordinator round-robin for roughly `window`
async fn tick_all(coordinators: &[HeartbeatCoordinator], window: Duration) {
    let rounds = (window.as_millis() / TICK.as_millis()).max(1);
    for _ in 0..rounds {
        for coordinator in coordinators {
            coordinator.update_status().await;
        }
        tokio::time::sleep(TICK).await;
    }
}

#[tokio::test]
async fn three_instances_converge_on_one_master() {
    let cluster = MemoryCluster::new();
    let coordinators: Vec<_> = (1..=3).map(|n| coordinator(&cluster, 2320 + n)).collect();

    for c in &coordinators {
        c.join().await.unwrap();
    }
    tick_all(&coordinators, TAKEOVER * 2).await;

    let masters: Vec<_> = coordinators
        .iter()
        .filter(|c| c.am_i_master() == Some(true))
        .collect();
    assert_eq!(
        masters.len(),
        1,
        "Exactly one master after two takeover windows"
    );

    let master_addr = masters[0].get_current_master().await.unwrap();
    for c in &coordinators {
        assert_eq!(
            c.get_current_master().await,
            Some(master_addr.clone()),
            "All instances agree on the anchor address"
        );
    }

    assert_eq!(masters[0].slave_count(), 2, "Master sees both heartbeating slaves");
}

#[tokio::test]
async fn concurrent_status_loops_elect_one_master() {
    let cluster = MemoryCluster::new();
    let coordinators: Vec<Arc<dyn ClusterCoordinator>> = (1..=3)
        .map(|n| Arc::new(coordinator(&cluster, 2320 + n)) as Arc<dyn ClusterCoordinator>)
        .collect();

    let shutdown = CancellationToken::new();
    let mut loops = Vec::new();
    for c in &coordinators {
        c.join().await.unwrap();
        loops.push(tokio::spawn(run_status_updates(
            Arc::clone(c),
            Arc::new(MetricsSink::new()),
            TICK,
            shutdown.clone(),
        )));
    }

    tokio::time::sleep(TAKEOVER * 2).await;

    let masters = coordinators
        .iter()
        .filter(|c| c.am_i_master() == Some(true))
        .count();
    assert_eq!(masters, 1, "Concurrently ticking instances elect exactly one master");

    shutdown.cancel();
    for task in loops {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn master_departure_hands_over_within_two_windows() {
    let cluster = MemoryCluster::new();
    let first = coordinator(&cluster, 2321);
    let second = coordinator(&cluster, 2322);

    first.join().await.unwrap();
    second.join().await.unwrap();
    first.update_status().await;
    second.update_status().await;
    assert_eq!(first.am_i_master(), Some(true));
    assert_eq!(second.am_i_master(), Some(false));

    first.leave_cluster().await;
    first.leave_cluster().await; // idempotent
    assert_eq!(first.am_i_master(), Some(false));

    // Survivor keeps ticking; the stale anchor expires within two windows
    let rounds = (TAKEOVER.as_millis() * 2 / TICK.as_millis()) + 1;
    for _ in 0..rounds {
        second.update_status().await;
        if second.am_i_master() == Some(true) {
            break;
        }
        tokio::time::sleep(TICK).await;
    }

    assert_eq!(second.am_i_master(), Some(true), "Survivor takes over the anchor");
    assert!(
        !second.get_current_slaves().await.contains(&addr(2321)),
        "Departed node's heartbeat is gone from the slave set"
    );
}

#[tokio::test]
async fn slaves_never_contain_the_calling_node() {
    for size in 1..=3u16 {
        let cluster = MemoryCluster::new();
        let coordinators: Vec<_> = (1..=size).map(|n| coordinator(&cluster, 2320 + n)).collect();

        for c in &coordinators {
            c.join().await.unwrap();
        }
        tick_all(&coordinators, TAKEOVER).await;

        for (n, c) in coordinators.iter().enumerate() {
            let own = addr(2321 + n as u16);
            assert!(
                !c.get_current_slaves().await.contains(&own),
                "Cluster of {}: node {} sees itself as a slave",
                size,
                own
            );
        }
    }
}

#[tokio::test]
async fn store_outage_demotes_until_it_recovers() {
    let cluster = MemoryCluster::new();
    let store = MemoryElectionStore::connect(&cluster);
    let coordinator =
        HeartbeatCoordinator::new(addr(2321), store.clone(), sink()).with_takeover(TAKEOVER);

    coordinator.update_status().await;
    assert_eq!(coordinator.am_i_master(), Some(true));

    store.set_failing(true);
    coordinator.update_status().await;
    assert_eq!(
        coordinator.am_i_master(),
        Some(false),
        "Backend trouble demotes for the tick"
    );
    assert_eq!(coordinator.slave_count(), 0);
    assert_eq!(
        coordinator.get_current_master().await,
        None,
        "Status reads degrade to none instead of failing"
    );

    store.set_failing(false);
    coordinator.update_status().await;
    assert_eq!(
        coordinator.am_i_master(),
        Some(true),
        "The loop continues unharmed once the store recovers"
    );
}

#[tokio::test]
async fn cleanup_task_prunes_stale_instances_only_while_master() {
    let cluster = MemoryCluster::new();
    let store = MemoryElectionStore::connect(&cluster);
    let master = HeartbeatCoordinator::new(addr(2321), store.clone(), sink())
        .with_takeover(TAKEOVER)
        .with_instance_expiry(Duration::from_millis(200))
        .with_cleanup_period(Duration::from_millis(100));

    master.update_status().await;
    assert_eq!(master.am_i_master(), Some(true));

    // A peer that heartbeats once and then dies
    store.upsert_heartbeat(&addr(2399)).await.unwrap();
    assert_eq!(cluster.instance_count(), 1);

    // Keep the anchor fresh while the row goes stale and the pruner runs
    for _ in 0..10 {
        master.update_status().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    assert_eq!(
        cluster.instance_count(),
        0,
        "Stale heartbeat row is pruned while master"
    );

    // Demotion cancels the pruner deterministically
    master.leave_cluster().await;
    store.upsert_heartbeat(&addr(2399)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        cluster.instance_count(),
        1,
        "No pruning happens after the cleanup task is cancelled"
    );
}
