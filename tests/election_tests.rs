//! Bootstrap and leader election across a simulated cluster.


use std::collections::BTreeSet;
use std::time::Duration;

use syncmesh::raft::RaftRole;
use test_harness::{assert_eventually, TestCluster, FIRST_EPHEMERAL_ID};

/// Test 1: Nodes started together rank themselves by ephemeral id
#[tokio::test]
async fn test_cluster_self_assigns_ranks() {
    let mut cluster = TestCluster::new(3).await;

    assert_eventually(
        || async { cluster.all_registered().await },
        Duration::from_secs(5),
        "All nodes should get a permanent id",
    )
    .await;

    assert_eq!(cluster.ranks(), BTreeSet::from([1, 2, 3]));
    for (offset, node) in cluster.nodes.iter().enumerate() {
        assert_eq!(node.ephemeral_id(), FIRST_EPHEMERAL_ID + offset as u64);
        assert_eq!(node.rank(), offset as u64 + 1);
    }

    cluster.shutdown().await;
}

/// Test 2: Exactly one leader, and everybody follows it
#[tokio::test]
async fn test_single_leader_elected() {
    let mut cluster = TestCluster::new(3).await;

    let leader = cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle on one leader");

    assert_eq!(cluster.count_leaders().await, 1);
    let leader_term = cluster.get_node(leader).unwrap().current_term().await;
    assert!(leader_term >= 1, "Leader must have won an election");

    for node in &cluster.nodes {
        let status = node.status().await;
        assert_eq!(status.leader_id, Some(leader));
        assert_eq!(status.world, BTreeSet::from([1, 2, 3]));
        assert!(status.term <= leader_term);
        if status.rank != leader {
            assert_eq!(status.role, RaftRole::Follower);
        }
    }

    cluster.shutdown().await;
}

/// Test 3: A node on its own becomes leader without votes
#[tokio::test]
async fn test_lone_node_becomes_leader() {
    let mut cluster = TestCluster::new(1).await;

    let leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Lone node should lead itself");

    assert_eq!(leader, 1);
    let node = cluster.get_node(1).unwrap();
    assert_eq!(node.world().await, BTreeSet::from([1]));
    assert_eq!(node.leader_id().await, Some(1));

    cluster.shutdown().await;
}

/// Test 4: New leader is elected after the leader stops
#[tokio::test]
async fn test_new_leader_after_leader_stops() {
    let mut cluster = TestCluster::new(3).await;

    let initial_leader = cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Initial leader should be elected");
    let initial_term = cluster
        .get_node(initial_leader)
        .unwrap()
        .current_term()
        .await;

    assert!(cluster.stop_node(initial_leader).await);

    let new_leader = cluster
        .wait_for_new_leader(initial_leader, Duration::from_secs(10))
        .await
        .expect("New leader should be elected");
    assert_ne!(new_leader, initial_leader);

    let new_term = cluster.get_node(new_leader).unwrap().current_term().await;
    assert!(new_term > initial_term, "Term should increase after new election");

    // The stopped leader misses confirmations and is evicted
    assert_eventually(
        || async {
            !cluster
                .get_node(new_leader)
                .unwrap()
                .world()
                .await
                .contains(&initial_leader)
        },
        Duration::from_secs(5),
        "Old leader should be evicted from the world",
    )
    .await;

    cluster.shutdown().await;
}

/// Test 5: Terms only move forward on every node
#[tokio::test]
async fn test_terms_never_decrease() {
    let mut cluster = TestCluster::new(3).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let mut last: Vec<u64> = Vec::new();
    for node in &cluster.nodes {
        last.push(node.current_term().await);
    }
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        for (index, node) in cluster.nodes.iter().enumerate() {
            let term = node.current_term().await;
            assert!(term >= last[index]);
            last[index] = term;
        }
    }

    cluster.shutdown().await;
}
