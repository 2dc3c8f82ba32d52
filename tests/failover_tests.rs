//! Failover tests for writer loss and self-promotion.
//!
//! Replicas probe a writer address nothing listens on. Only the replica
//! whose identity matches the configured primary may promote itself.


use std::time::Duration;
use test_harness::{bind_local, start_node, unused_address, wait_for, NodeSpec};

/// Matching replica promotes, the other defers and stays a replica
#[tokio::test]
async fn test_primary_identity_replica_takes_over() {
    let writer = unused_address().await;
    let (l1, r1_addr) = bind_local().await;
    let (l2, r2_addr) = bind_local().await;
    let replicas = vec![r1_addr.clone(), r2_addr.clone()];

    let r1 = start_node(l1, r1_addr.clone(), NodeSpec {
        node_id: "node-r1",
        writer: &writer,
        replicas: replicas.clone(),
        primary_identity: "node-r1",
        auto_failover: true,
    })
    .await;
    let r2 = start_node(l2, r2_addr.clone(), NodeSpec {
        node_id: "node-r2",
        writer: &writer,
        replicas,
        primary_identity: "node-r1",
        auto_failover: true,
    })
    .await;

    assert!(
        wait_for(Duration::from_secs(5), || r1.is_writer()).await,
        "node-r1 should promote itself"
    );

    // Give node-r2 several probe rounds of its own
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!r2.is_writer().await, "node-r2 must never promote");

    let r1_view = r1.node.roster().snapshot().await;
    assert_eq!(r1_view.writer_address, r1_addr);
    assert!(!r1_view.election_in_progress);

    let r2_view = r2.node.roster().snapshot().await;
    assert_eq!(r2_view.writer_address, writer);

    r1.shutdown();
    r2.shutdown();
}

/// Status endpoints reflect the promotion
#[tokio::test]
async fn test_promotion_visible_over_http() {
    let writer = unused_address().await;
    let (listener, address) = bind_local().await;

    let node = start_node(listener, address.clone(), NodeSpec {
        node_id: "node-r1",
        writer: &writer,
        replicas: vec![address.clone()],
        primary_identity: "node-r1",
        auto_failover: true,
    })
    .await;

    let client = reqwest::Client::new();
    assert!(wait_for(Duration::from_secs(5), || node.is_writer()).await);

    let nodes: serde_json::Value = client
        .get(format!("{}/nodes", address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nodes["is_writer"], true);
    assert_eq!(nodes["writer"], address.as_str());
    assert_eq!(nodes["election_state"], "PromotedSelf");

    node.shutdown();
}

/// With automatic failover off the node never promotes
#[tokio::test]
async fn test_no_promotion_without_auto_failover() {
    let writer = unused_address().await;
    let (listener, address) = bind_local().await;

    let node = start_node(listener, address.clone(), NodeSpec {
        node_id: "node-r1",
        writer: &writer,
        replicas: vec![address.clone()],
        primary_identity: "node-r1",
        auto_failover: false,
    })
    .await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!node.is_writer().await);

    node.shutdown();
}

/// Healthy writer is never replaced
#[tokio::test]
async fn test_live_writer_keeps_role() {
    let (lw, writer_addr) = bind_local().await;
    let (lr, replica_addr) = bind_local().await;

    let writer = start_node(lw, writer_addr.clone(), NodeSpec {
        node_id: "node-w",
        writer: &writer_addr,
        replicas: vec![replica_addr.clone()],
        primary_identity: "node-r1",
        auto_failover: true,
    })
    .await;
    let replica = start_node(lr, replica_addr.clone(), NodeSpec {
        node_id: "node-r1",
        writer: &writer_addr,
        replicas: vec![replica_addr.clone()],
        primary_identity: "node-r1",
        auto_failover: true,
    })
    .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(writer.is_writer().await);
    assert!(!replica.is_writer().await);
    assert!(!replica.node.roster().election_in_progress());

    writer.shutdown();
    replica.shutdown();
}
