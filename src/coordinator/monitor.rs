//! Heartbeat monitor
//!
//! Periodically sends HEARTBEAT to every store and updates the availability
//! flags in the [`ReplicaDirectory`] from the outcome.

use crate::coordinator::peer_client::PeerClient;
use crate::coordinator::placement::{NodeDescriptor, ReplicaDirectory};
use crate::protocol::{ResponseType, StoreRequest, StoreResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Record an RPC outcome against a node, logging up/down transitions.
pub fn record_outcome(node: &NodeDescriptor, reachable: bool) {
    let was = node.set_available(reachable);
    if was != reachable {
        if reachable {
            tracing::info!("Node {} ({}) is available", node.index, node.store_addr());
        } else {
            tracing::warn!("Node {} ({}) is unavailable", node.index, node.store_addr());
        }
    }
}

pub struct Monitor {
    directory: Arc<ReplicaDirectory>,
    client: PeerClient,
    interval: Duration,
}

impl Monitor {
    pub fn new(directory: Arc<ReplicaDirectory>, client: PeerClient, interval: Duration) -> Self {
        Self {
            directory,
            client,
            interval,
        }
    }

    /// One heartbeat round over every node. Returns the number reachable.
    pub async fn probe_all(&self) -> usize {
        let mut probes = JoinSet::new();
        for node in self.directory.nodes() {
            let node = node.clone();
            let client = self.client.clone();
            probes.spawn(async move {
                let ok = probe(&client, &node).await;
                record_outcome(&node, ok);
                ok
            });
        }

        let mut reachable = 0;
        while let Some(result) = probes.join_next().await {
            match result {
                Ok(true) => reachable += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("Heartbeat task failed: {}", e),
            }
        }
        tracing::debug!(
            in_flight = self.client.in_flight(),
            "Heartbeat round: {}/{} nodes reachable",
            reachable,
            self.directory.len()
        );
        reachable
    }

    /// Run heartbeat rounds forever on a background task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.probe_all().await;
            }
        })
    }
}

async fn probe(client: &PeerClient, node: &NodeDescriptor) -> bool {
    let request = StoreRequest::heartbeat();
    match client.call(node.store_addr(), request.encode()).await {
        Ok(raw) => match StoreResponse::decode(&raw) {
            Ok(response) if response.kind == ResponseType::HeartbeatAck => true,
            Ok(response) => {
                tracing::debug!("Node {} answered heartbeat with {:?}", node.index, response.kind);
                true
            }
            Err(e) => {
                tracing::debug!("Bad heartbeat reply from node {}: {}", node.index, e);
                false
            }
        },
        Err(e) => {
            tracing::debug!("Heartbeat to node {} failed: {}", node.index, e);
            false
        }
    }
}
