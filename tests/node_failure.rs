//! Node failure tests: quorum operations with stores taken off the network

mod common;

use common::TestCluster;
use quorumkv::{Key, Status};

#[tokio::test]
async fn test_two_nodes_down() {
    let mut cluster = TestCluster::start(5).await;
    let client = cluster.client(0).await;
    let k1 = Key::from("k1");

    assert_eq!(client.put(k1, "v1").await.unwrap().status, Status::Successful);
    cluster.settle().await;

    cluster.stop_store(3).await;
    cluster.stop_store(4).await;

    // Three of five replicas still answer: enough for both quorums
    let res = client.get(k1).await.unwrap();
    assert_eq!(res.status, Status::Successful);
    assert_eq!(&res.value[..], b"v1");

    let res = client.put(k1, "v2").await.unwrap();
    assert_eq!(res.status, Status::Successful);
    cluster.settle().await;

    let res = client.get(k1).await.unwrap();
    assert_eq!(res.status, Status::Successful);
    assert_eq!(&res.value[..], b"v2");
    assert_eq!(res.version, 2);
}

#[tokio::test]
async fn test_failed_rpcs_mark_nodes_unavailable() {
    let mut cluster = TestCluster::start(5).await;
    let client = cluster.client(0).await;
    cluster.stop_store(1).await;
    cluster.stop_store(2).await;

    assert_eq!(
        client.put(Key::from("a"), "1").await.unwrap().status,
        Status::Successful
    );
    // Let the two outstanding calls time out
    tokio::time::sleep(common::RPC_TIMEOUT * 2).await;

    let directory = &cluster.nodes[0].directory;
    assert_eq!(directory.available_count(), 3);
    assert!(!directory.nodes()[1].is_available());
    assert!(!directory.nodes()[2].is_available());

    // Replica sets now come from the three available nodes
    let res = client.get(Key::from("a")).await.unwrap();
    assert_eq!(res.status, Status::Successful);
    assert_eq!(&res.value[..], b"1");

    // Writes too: fewer than N nodes up, but still a write quorum
    let fresh = Key::from("b");
    let res = client.put(fresh, "2").await.unwrap();
    assert_eq!(res.status, Status::Successful);
    cluster.settle().await;

    for i in [0, 3, 4] {
        let entry = cluster.nodes[i].engine.entry(&fresh).unwrap();
        assert_eq!(entry.version, 1, "node {}", i);
        assert_eq!(&entry.value[..], b"2");
    }
    assert_eq!(cluster.nodes[0].metrics.snapshot().placement_failures, 0);
}

#[tokio::test]
async fn test_heartbeat_detects_down_nodes() {
    let mut cluster = TestCluster::start(5).await;
    cluster.stop_store(4).await;

    let reachable = cluster.nodes[2].monitor.probe_all().await;
    assert_eq!(reachable, 4);

    let directory = &cluster.nodes[2].directory;
    assert!(!directory.nodes()[4].is_available());
    assert_eq!(directory.available_count(), 4);
}

#[tokio::test]
async fn test_three_nodes_down_fails_after_timeout() {
    let mut cluster = TestCluster::start(5).await;
    for i in 2..5 {
        cluster.stop_store(i).await;
    }

    // Nodes are still believed available, so the request fans out and the
    // quorum becomes unreachable once the third call times out
    let res = cluster
        .client(0)
        .await
        .put(Key::from("k"), "v")
        .await
        .unwrap();
    assert_eq!(res.status, Status::InternalFailure);
    assert_eq!(cluster.nodes[0].metrics.snapshot().quorum_failures, 1);
}

#[tokio::test]
async fn test_three_nodes_known_down_fails_fast() {
    let mut cluster = TestCluster::start(5).await;
    for i in 2..5 {
        cluster.stop_store(i).await;
    }
    assert_eq!(cluster.nodes[0].monitor.probe_all().await, 2);

    let started = tokio::time::Instant::now();
    let res = cluster.client(0).await.get(Key::from("k")).await.unwrap();
    assert_eq!(res.status, Status::InternalFailure);
    assert!(started.elapsed() < common::RPC_TIMEOUT);
    assert_eq!(cluster.nodes[0].metrics.snapshot().placement_failures, 1);
}

#[tokio::test]
async fn test_read_repair_after_recovery() {
    let mut cluster = TestCluster::start(5).await;
    let client = cluster.client(0).await;
    let key = Key::from("healed");

    client.put(key, "old").await.unwrap();
    cluster.settle().await;

    // Node 4's store misses the second write: simulate by rolling its entry back
    client.put(key, "new").await.unwrap();
    cluster.settle().await;
    cluster.nodes[4]
        .engine
        .put(&key, bytes::Bytes::from_static(b"old"), 1);

    // Stop two others so every read quorum has to include node 4
    cluster.stop_store(0).await;
    cluster.stop_store(1).await;

    let res = client.get(key).await.unwrap();
    assert_eq!(res.status, Status::Successful);
    assert_eq!(&res.value[..], b"new");
    assert_eq!(res.version, 2);
    cluster.settle().await;

    let repaired = cluster.nodes[4].engine.entry(&key).unwrap();
    assert_eq!(repaired.version, 2);
    assert_eq!(&repaired.value[..], b"new");
    assert!(cluster.nodes[0].metrics.snapshot().read_repairs >= 1);
}
