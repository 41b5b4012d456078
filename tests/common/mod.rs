//! In-process cluster over loopback UDP shared by the integration tests

#![allow(dead_code)]

use quorumkv::common::{ClusterConfig, CoordinatorMetrics, HashAlgorithm, NodeConfig, RpcConfig};
use quorumkv::{
    Coordinator, KvClient, Monitor, PeerClient, ReplicaDirectory, StoreEngine, StoreServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const RPC_TIMEOUT: Duration = Duration::from_millis(400);

pub struct TestNode {
    pub coordinator: SocketAddr,
    pub store: SocketAddr,
    pub engine: Arc<StoreEngine>,
    pub directory: Arc<ReplicaDirectory>,
    pub monitor: Monitor,
    pub metrics: Arc<CoordinatorMetrics>,
    pub store_task: JoinHandle<quorumkv::Result<()>>,
    pub coordinator_task: JoinHandle<quorumkv::Result<()>>,
}

pub struct TestCluster {
    pub config: ClusterConfig,
    pub nodes: Vec<TestNode>,
}

pub fn rpc_policy() -> RpcConfig {
    RpcConfig {
        attempts: 3,
        timeout_ms: RPC_TIMEOUT.as_millis() as u64,
        retry_base_ms: 25,
    }
}

impl TestCluster {
    pub async fn start(size: usize) -> Self {
        Self::start_with_capacity(size, None).await
    }

    pub async fn start_with_capacity(size: usize, capacity: Option<usize>) -> Self {
        let mut servers = Vec::new();
        let mut node_configs = Vec::new();
        for _ in 0..size {
            let engine = Arc::new(StoreEngine::with_capacity(capacity));
            let server = StoreServer::bind("127.0.0.1:0".parse().unwrap(), engine.clone())
                .await
                .unwrap();
            let store = server.local_addr().unwrap();
            node_configs.push(NodeConfig {
                address: store.ip(),
                coordinator_port: 0,
                store_port: store.port(),
            });
            servers.push((server, engine, store));
        }

        let config = ClusterConfig {
            nodes: node_configs,
            replication_factor: size,
            hash_algorithm: HashAlgorithm::Sha512,
            rpc: rpc_policy(),
            store_capacity: capacity,
            ..Default::default()
        };

        let mut nodes = Vec::new();
        for (server, engine, store) in servers {
            let store_task = tokio::spawn(server.serve());
            let directory = Arc::new(ReplicaDirectory::from_config(&config));
            let client = PeerClient::bind("127.0.0.1:0".parse().unwrap(), config.rpc)
                .await
                .unwrap();
            let monitor = Monitor::new(directory.clone(), client.clone(), Duration::from_secs(60));
            let coordinator = Coordinator::bind(
                "127.0.0.1:0".parse().unwrap(),
                &config,
                directory.clone(),
                client,
            )
            .await
            .unwrap();
            let coordinator_addr = coordinator.local_addr().unwrap();
            let metrics = coordinator.metrics();
            let coordinator_task = tokio::spawn(coordinator.serve());

            nodes.push(TestNode {
                coordinator: coordinator_addr,
                store,
                engine,
                directory,
                monitor,
                metrics,
                store_task,
                coordinator_task,
            });
        }

        Self { config, nodes }
    }

    /// Client talking to node `i`'s coordinator
    pub async fn client(&self, i: usize) -> KvClient {
        KvClient::connect(self.nodes[i].coordinator)
            .await
            .unwrap()
            .with_retries(1)
            .with_timeout(RPC_TIMEOUT * 4)
    }

    /// Take node `i`'s store off the network
    pub async fn stop_store(&mut self, i: usize) {
        let task = &mut self.nodes[i].store_task;
        task.abort();
        let _ = task.await;
    }

    /// Let fan-out requests that were still in flight after the reply land
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
