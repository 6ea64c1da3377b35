//! Barrier, broadcast_sync and send_to_sync / receive_from_sync across a
//! running cluster.


use std::time::Duration;

use serde_json::json;
use syncmesh::error::NodeError;
use test_harness::{test_node_config, TestCluster};
use tokio::sync::oneshot;

/// Test 1: Every node passes the barrier
#[tokio::test]
async fn test_barrier_releases_all_callers() {
    let mut cluster = TestCluster::new(3).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let (a, b, c) = (
        cluster.get_node(1).unwrap(),
        cluster.get_node(2).unwrap(),
        cluster.get_node(3).unwrap(),
    );
    let results = tokio::time::timeout(
        Duration::from_secs(5),
        futures_join(a.synchronize(), b.synchronize(), c.synchronize()),
    )
    .await
    .expect("Barrier should complete");

    assert_eq!(results, (Ok(()), Ok(()), Ok(())));

    cluster.shutdown().await;
}

async fn futures_join<A, B, C>(a: A, b: B, c: C) -> (A::Output, B::Output, C::Output)
where
    A: std::future::Future,
    B: std::future::Future,
    C: std::future::Future,
{
    tokio::join!(a, b, c)
}

/// Test 2: A second local barrier call is rejected while one is in flight
#[tokio::test]
async fn test_reentrant_barrier_is_rejected() {
    let mut cluster = TestCluster::new(3).await;
    let leader = cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");
    let follower = cluster.a_follower().await.unwrap();

    // With the leader cut off the barrier cannot complete
    cluster.isolate_node(leader);
    let node = cluster.get_node(follower).unwrap();

    let (tx, rx) = oneshot::channel();
    node.synchronize_with(Box::new(move |result| {
        let _ = tx.send(result);
    }))
    .await
    .expect("First call should be accepted");

    assert_eq!(node.synchronize().await, Err(NodeError::SyncInProgress));

    node.stop().await;
    assert_eq!(rx.await.unwrap(), Err(NodeError::Stopped));

    cluster.shutdown().await;
}

/// Test 3: Barrier with a completion callback
#[tokio::test]
async fn test_barrier_with_callback() {
    let mut cluster = TestCluster::new(3).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let (tx, rx) = oneshot::channel();
    cluster
        .get_node(2)
        .unwrap()
        .synchronize_with(Box::new(move |result| {
            let _ = tx.send(result);
        }))
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("Callback should fire")
        .unwrap();
    assert_eq!(result, Ok(()));

    cluster.shutdown().await;
}

/// Test 4: broadcast_sync delivers the payload to every receiver and
/// resolves the sender once everyone acknowledged
#[tokio::test]
async fn test_broadcast_sync_reaches_every_member() {
    let mut cluster = TestCluster::new(3).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let payload = json!({"round": 1, "value": "hello"});
    let (sender, r2, r3) = (
        cluster.get_node(1).unwrap(),
        cluster.get_node(2).unwrap(),
        cluster.get_node(3).unwrap(),
    );

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        futures_join(
            sender.broadcast_sync(payload.clone(), 1),
            r2.broadcast_sync(json!(null), 1),
            r3.broadcast_sync(json!(null), 1),
        ),
    )
    .await
    .expect("broadcast_sync should complete");

    assert_eq!(results.0, Ok(payload.clone()));
    assert_eq!(results.1, Ok(payload.clone()));
    assert_eq!(results.2, Ok(payload));

    cluster.shutdown().await;
}

/// Test 5: A receiver that asks after the payload arrived still gets it,
/// and only then is the sender acknowledged
#[tokio::test]
async fn test_broadcast_sync_late_receiver() {
    let mut cluster = TestCluster::new(2).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let (tx, mut rx) = oneshot::channel();
    let sender = cluster.get_node(2).unwrap();
    sender
        .broadcast_sync_with(
            json!(7),
            2,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "Nobody has claimed the payload yet");

    let receiver = cluster.get_node(1).unwrap();
    assert_eq!(receiver.broadcast_sync(json!(null), 2).await, Ok(json!(7)));

    let result = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("Sender should be acknowledged once claimed")
        .unwrap();
    assert_eq!(result, Ok(json!(7)));

    cluster.shutdown().await;
}

/// Test 6: A round nobody received times out and does not leak into the
/// next round
#[tokio::test]
async fn test_broadcast_sync_unreceived_round_is_not_replayed() {
    let config = test_node_config().with_rendezvous_timeout_ms(200);
    let mut cluster = TestCluster::with_config(3, config).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let (a, b, c) = (
        cluster.get_node(1).unwrap(),
        cluster.get_node(2).unwrap(),
        cluster.get_node(3).unwrap(),
    );

    assert_eq!(
        a.broadcast_sync(json!("first"), 1).await,
        Err(NodeError::Timeout(Duration::from_millis(200)))
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        futures_join(
            a.broadcast_sync(json!("second"), 1),
            b.broadcast_sync(json!(null), 1),
            c.broadcast_sync(json!(null), 1),
        ),
    )
    .await
    .expect("Second round should complete");

    assert_eq!(results.0, Ok(json!("second")));
    assert_eq!(results.1, Ok(json!("second")));
    assert_eq!(results.2, Ok(json!("second")));

    cluster.shutdown().await;
}

/// Test 7: send_to_sync pairs with receive_from_sync
#[tokio::test]
async fn test_send_and_receive_rendezvous() {
    let mut cluster = TestCluster::new(2).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let (a, b) = (cluster.get_node(1).unwrap(), cluster.get_node(2).unwrap());
    let (sent, received) = tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(a.send_to_sync(json!([1, 2, 3]), 2), b.receive_from_sync(1)) },
    )
    .await
    .expect("Rendezvous should complete");

    assert_eq!(sent, Ok(()));
    assert_eq!(received, Ok(json!([1, 2, 3])));

    cluster.shutdown().await;
}

/// Test 8: The payload waits for a receiver that shows up later
#[tokio::test]
async fn test_send_before_receive() {
    let mut cluster = TestCluster::new(2).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let (a, b) = (cluster.get_node(1).unwrap(), cluster.get_node(2).unwrap());
    let (tx, rx) = oneshot::channel();
    a.send_to_sync_with(
        json!("parked"),
        2,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.receive_from_sync(1).await, Ok(json!("parked")));

    let sent = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("Sender should be acknowledged")
        .unwrap();
    assert_eq!(sent, Ok(()));

    cluster.shutdown().await;
}

/// Test 9: Without a receiver the sender times out
#[tokio::test]
async fn test_send_without_receiver_times_out() {
    let config = test_node_config().with_rendezvous_timeout_ms(200);
    let mut cluster = TestCluster::with_config(2, config).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    let result = cluster
        .get_node(1)
        .unwrap()
        .send_to_sync(json!("nobody listens"), 2)
        .await;
    assert_eq!(result, Err(NodeError::Timeout(Duration::from_millis(200))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let result = cluster.get_node(2).unwrap().receive_from_sync(1).await;
    assert!(
        matches!(result, Err(NodeError::Timeout(_))),
        "Stale payload must not satisfy a new receive, got {:?}",
        result
    );

    cluster.shutdown().await;
}

/// Test 10: Letters land in the addressed mailbox
#[tokio::test]
async fn test_letters_reach_mailbox() {
    let mut cluster = TestCluster::new(3).await;
    cluster
        .wait_for_stable(Duration::from_secs(10))
        .await
        .expect("Cluster should settle");

    cluster.get_node(1).unwrap().send_to(json!("direct"), 3);
    cluster.get_node(2).unwrap().broadcast(json!("everyone"));

    let node3 = cluster.get_node(3).unwrap();
    test_harness::assert_eventually(
        || async { node3.has_message().await },
        Duration::from_secs(2),
        "Node 3 should receive mail",
    )
    .await;

    let mut payloads = Vec::new();
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(letter) = node3.take_message().await {
        if let syncmesh::message::Body::Letter { payload } = letter.message.body {
            payloads.push(payload);
        }
    }
    payloads.sort_by_key(|p| p.to_string());
    assert_eq!(payloads, vec![json!("direct"), json!("everyone")]);

    cluster.shutdown().await;
}
