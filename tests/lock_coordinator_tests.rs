//! Consensus-lock coordinator election behavior over the in-process
//! lock service

use herald::coordinator::{
    ClusterCoordinator, ConnectionState, LockCoordinator, LockService, MemoryCluster,
    MemoryLockService, NodeAddress,
};
use herald::metrics::MetricsSink;
use std::sync::Arc;
use std::time::Duration;

fn addr(port: u16) -> NodeAddress {
    NodeAddress::new("10.0.1.1", port)
}

fn sink() -> Arc<MetricsSink> {
    Arc::new(MetricsSink::new())
}

fn connect(cluster: &MemoryCluster, port: u16) -> Arc<LockCoordinator> {
    LockCoordinator::new(addr(port), MemoryLockService::connect(cluster), sink())
}

async fn settle() {
    // Give the connectivity-listener task a moment to observe transitions
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn single_node_becomes_master_on_first_tick() {
    let cluster = MemoryCluster::new();
    let coordinator = connect(&cluster, 2321);

    assert_eq!(
        coordinator.am_i_master(),
        None,
        "Status is unknown before the first tick"
    );

    coordinator.join().await.unwrap();
    coordinator.update_status().await;

    assert_eq!(coordinator.am_i_master(), Some(true));
    assert_eq!(coordinator.get_current_master().await, Some(addr(2321)));
    assert!(coordinator.get_current_slaves().await.is_empty());
    assert_eq!(coordinator.next_slave(), None);
}

#[tokio::test]
async fn three_nodes_elect_exactly_one_master() {
    let cluster = MemoryCluster::new();
    let coordinators: Vec<_> = (1..=3).map(|n| connect(&cluster, 2320 + n)).collect();

    for coordinator in &coordinators {
        coordinator.join().await.unwrap();
    }
    for coordinator in &coordinators {
        coordinator.update_status().await;
    }

    let masters: Vec<_> = coordinators
        .iter()
        .filter(|c| c.am_i_master() == Some(true))
        .collect();
    assert_eq!(masters.len(), 1, "Exactly one master expected");

    let master_addr = masters[0].get_current_master().await.unwrap();
    for coordinator in &coordinators {
        assert_eq!(
            coordinator.get_current_master().await,
            Some(master_addr.clone()),
            "All instances agree on the master address"
        );
    }

    assert_eq!(masters[0].slave_count(), 2);
    let slaves = masters[0].get_current_slaves().await;
    assert_eq!(slaves.len(), 2);
    assert!(!slaves.contains(&master_addr), "Slave set never contains the master itself");
}

#[tokio::test]
async fn slave_cycle_covers_peers_fairly_within_a_tick() {
    let cluster = MemoryCluster::new();
    let coordinators: Vec<_> = (1..=3).map(|n| connect(&cluster, 2320 + n)).collect();

    // Everyone joins before the first tick so the master's cycle is built
    // from the complete party
    for coordinator in &coordinators {
        coordinator.join().await.unwrap();
    }
    for coordinator in &coordinators {
        coordinator.update_status().await;
    }

    let master = coordinators
        .iter()
        .find(|c| c.am_i_master() == Some(true))
        .expect("One node should be master");

    let mut seen = std::collections::HashMap::new();
    for _ in 0..4 {
        let slave = master.next_slave().expect("Two slaves are available");
        *seen.entry(slave).or_insert(0) += 1;
    }
    assert_eq!(seen.len(), 2, "Rotation covers both slaves");
    assert!(
        seen.values().all(|count| *count == 2),
        "Rotation is fair within one tick: {:?}",
        seen
    );
}

#[tokio::test]
async fn slaves_never_contain_the_calling_node() {
    for size in 1..=3u16 {
        let cluster = MemoryCluster::new();
        let coordinators: Vec<_> = (1..=size).map(|n| connect(&cluster, 2320 + n)).collect();

        for coordinator in &coordinators {
            coordinator.join().await.unwrap();
        }
        for coordinator in &coordinators {
            coordinator.update_status().await;
        }

        for (n, coordinator) in coordinators.iter().enumerate() {
            let own = addr(2321 + n as u16);
            assert!(
                !coordinator.get_current_slaves().await.contains(&own),
                "Cluster of {}: node {} sees itself as a slave",
                size,
                own
            );
        }
    }
}

#[tokio::test]
async fn slave_lists_never_contain_the_master() {
    let cluster = MemoryCluster::new();
    let coordinators: Vec<_> = (1..=3).map(|n| connect(&cluster, 2320 + n)).collect();

    for coordinator in &coordinators {
        coordinator.join().await.unwrap();
    }
    for coordinator in &coordinators {
        coordinator.update_status().await;
    }

    let master_addr = coordinators[0].get_current_master().await.unwrap();
    for coordinator in &coordinators {
        assert!(
            !coordinator
                .get_current_slaves()
                .await
                .contains(&master_addr),
            "Slave list must not include the master {}",
            master_addr
        );
    }

    let slave = coordinators
        .iter()
        .find(|c| c.am_i_master() == Some(false))
        .expect("Two nodes should be slaves");
    assert_eq!(
        slave.get_current_slaves().await.len(),
        1,
        "A slave sees exactly the other slave"
    );
}

#[tokio::test]
async fn master_departure_triggers_failover() {
    let cluster = MemoryCluster::new();
    let first = connect(&cluster, 2321);
    let second = connect(&cluster, 2322);

    first.join().await.unwrap();
    second.join().await.unwrap();
    first.update_status().await;
    second.update_status().await;

    assert_eq!(first.am_i_master(), Some(true));
    assert_eq!(second.am_i_master(), Some(false));

    first.leave_cluster().await;
    assert_eq!(
        first.am_i_master(),
        Some(false),
        "A departed node never reports as master"
    );
    // Idempotent: a second leave is harmless
    first.leave_cluster().await;

    second.update_status().await;
    assert_eq!(second.am_i_master(), Some(true), "Survivor takes over the lock");
    assert!(
        !second.get_current_slaves().await.contains(&addr(2321)),
        "Departed node is gone from the party"
    );
}

#[tokio::test]
async fn departed_master_stays_demoted_after_more_ticks() {
    let cluster = MemoryCluster::new();
    let coordinator = connect(&cluster, 2321);

    coordinator.join().await.unwrap();
    coordinator.update_status().await;
    assert_eq!(coordinator.am_i_master(), Some(true));

    coordinator.leave_cluster().await;
    coordinator.update_status().await;
    assert_eq!(
        coordinator.am_i_master(),
        Some(false),
        "ShuttingDown is terminal; ticks must not re-elect"
    );
}

#[tokio::test]
async fn disconnect_resets_state_until_reconnected() {
    let cluster = MemoryCluster::new();
    let service = MemoryLockService::connect(&cluster);
    let coordinator = LockCoordinator::new(addr(2321), service.clone(), sink());

    coordinator.join().await.unwrap();
    coordinator.update_status().await;
    assert_eq!(coordinator.am_i_master(), Some(true));

    service.set_connection(ConnectionState::Suspended);
    settle().await;
    assert_eq!(
        coordinator.am_i_master(),
        None,
        "Cached master status is not trusted across a disconnect"
    );

    coordinator.update_status().await;
    assert_eq!(
        coordinator.am_i_master(),
        Some(false),
        "Ticks while disconnected treat the node as non-master"
    );

    service.set_connection(ConnectionState::Connected);
    settle().await;
    coordinator.update_status().await;
    assert_eq!(
        coordinator.am_i_master(),
        Some(true),
        "Clean re-election succeeds after reconnecting"
    );
}

#[tokio::test]
async fn slave_rejoins_party_after_session_loss() {
    let cluster = MemoryCluster::new();
    let master_service = MemoryLockService::connect(&cluster);
    let slave_service = MemoryLockService::connect(&cluster);
    let master = LockCoordinator::new(addr(2321), master_service.clone(), sink());
    let slave = LockCoordinator::new(addr(2322), slave_service.clone(), sink());

    master.join().await.unwrap();
    slave.join().await.unwrap();
    master.update_status().await;
    slave.update_status().await;
    assert_eq!(master.slave_count(), 1);

    // Session loss: backend forgets the slave's registration
    slave_service.set_connection(ConnectionState::Lost);
    cluster.evict(&addr(2322).to_string());
    settle().await;
    master.update_status().await;
    assert_eq!(master.slave_count(), 0, "Evicted slave disappears from the cycle");

    slave_service.set_connection(ConnectionState::Connected);
    settle().await;
    slave.update_status().await;
    master.update_status().await;
    assert_eq!(
        master.get_current_slaves().await,
        vec![addr(2322)],
        "Recovered slave re-joins the party so the master sees it"
    );
}

#[tokio::test]
async fn master_rejoins_party_after_session_loss() {
    let cluster = MemoryCluster::new();
    let service = MemoryLockService::connect(&cluster);
    let coordinator = LockCoordinator::new(addr(2321), service.clone(), sink());

    coordinator.join().await.unwrap();
    coordinator.update_status().await;
    assert_eq!(coordinator.am_i_master(), Some(true));

    // Session loss: the backend forgets both the lock and the registration
    service.set_connection(ConnectionState::Lost);
    cluster.evict(&addr(2321).to_string());
    settle().await;

    service.set_connection(ConnectionState::Connected);
    settle().await;
    coordinator.update_status().await;
    assert_eq!(
        coordinator.am_i_master(),
        Some(true),
        "Clean re-election succeeds after the session loss"
    );

    let observer = MemoryLockService::connect(&cluster);
    assert!(
        observer
            .party_members()
            .await
            .unwrap()
            .contains(&addr(2321).to_string()),
        "A re-elected master must re-register in the party"
    );
}
