//! Stopping a node releases everything blocked on it.


use std::time::Duration;

use serde_json::json;
use syncmesh::error::NodeError;
use test_harness::TestCluster;

/// Test 1: A pending receive fails with Stopped
#[tokio::test]
async fn test_stop_unblocks_receive() {
    let mut cluster = TestCluster::new(2).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let node = cluster.get_node(1).unwrap();
    let (result, _) = tokio::join!(node.receive_from_sync(2), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        node.stop().await;
    });
    assert_eq!(result, Err(NodeError::Stopped));
    assert!(!node.is_running());

    cluster.shutdown().await;
}

/// Test 2: A pending token request fails with Stopped
#[tokio::test]
async fn test_stop_unblocks_token_request() {
    let mut cluster = TestCluster::new(2).await;
    let leader = cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");
    let follower = cluster.a_follower().await.unwrap();

    // Keep the token away from the follower
    let holder = cluster.get_node(leader).unwrap();
    holder.request_token().await.expect("leader gets the token");

    let node = cluster.get_node(follower).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        let (result, _) = tokio::join!(node.request_token(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            node.stop().await;
        });
        result
    })
    .await
    .expect("stop should unblock the request");
    assert_eq!(result, Err(NodeError::Stopped));

    holder.release_token().await;
    cluster.shutdown().await;
}

/// Test 3: A barrier that cannot complete is released by stop
#[tokio::test]
async fn test_stop_unblocks_barrier() {
    let mut cluster = TestCluster::new(3).await;
    let leader = cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");
    let follower = cluster.a_follower().await.unwrap();
    cluster.isolate_node(leader);

    let node = cluster.get_node(follower).unwrap();
    let (result, _) = tokio::join!(node.synchronize(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        node.stop().await;
    });
    assert_eq!(result, Err(NodeError::Stopped));

    cluster.shutdown().await;
}

/// Test 4: Calls on a stopped node fail right away
#[tokio::test]
async fn test_calls_after_stop_fail() {
    let mut cluster = TestCluster::new(1).await;
    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Lone node should lead");

    let node = cluster.get_node(1).unwrap();
    node.stop().await;

    assert_eq!(node.init(), Err(NodeError::Stopped));
    assert_eq!(node.request_token().await, Err(NodeError::Stopped));
    assert_eq!(node.synchronize().await, Err(NodeError::Stopped));

    cluster.shutdown().await;
}

/// Test 5: A broadcast sender waiting on a silent member is released by
/// stop long before its own timeout
#[tokio::test]
async fn test_stop_unblocks_broadcast_sync() {
    let mut cluster = TestCluster::new(2).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    // Node 2 never calls broadcast_sync, so the round is never acknowledged
    let node = cluster.get_node(1).unwrap();
    let result = tokio::time::timeout(Duration::from_millis(500), async {
        let (result, _) = tokio::join!(node.broadcast_sync(json!("pending"), 1), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            node.stop().await;
        });
        result
    })
    .await
    .expect("stop should unblock the sender");
    assert_eq!(result, Err(NodeError::Stopped));

    cluster.shutdown().await;
}

/// Test 6: A send with no receiver is released by stop long before its
/// own timeout
#[tokio::test]
async fn test_stop_unblocks_send_to_sync() {
    let mut cluster = TestCluster::new(2).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let node = cluster.get_node(1).unwrap();
    let result = tokio::time::timeout(Duration::from_millis(500), async {
        let (result, _) = tokio::join!(node.send_to_sync(json!("unclaimed"), 2), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            node.stop().await;
        });
        result
    })
    .await
    .expect("stop should unblock the sender");
    assert_eq!(result, Err(NodeError::Stopped));

    cluster.shutdown().await;
}
