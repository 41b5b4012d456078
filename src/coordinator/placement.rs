//! Replica placement on a modulo hash ring
//!
//! The cluster is a fixed, ordered list of nodes. A key's home node is
//! `H(key) mod N`; its replicas are found by walking the ring from home,
//! skipping nodes currently marked unavailable.

use crate::common::{ClusterConfig, Error, HashAlgorithm, NodeConfig, Result};
use crate::protocol::Key;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One cluster member: fixed identity plus a liveness flag
#[derive(Debug)]
pub struct NodeDescriptor {
    pub index: usize,
    pub address: IpAddr,
    pub store_port: u16,
    available: AtomicBool,
}

impl NodeDescriptor {
    pub fn new(index: usize, config: &NodeConfig) -> Self {
        Self {
            index,
            address: config.address,
            store_port: config.store_port,
            available: AtomicBool::new(true),
        }
    }

    pub fn store_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.store_port)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Update the flag, returning the previous value
    pub fn set_available(&self, available: bool) -> bool {
        self.available.swap(available, Ordering::AcqRel)
    }
}

/// Fixed node list plus the ring walk over it
#[derive(Debug)]
pub struct ReplicaDirectory {
    nodes: Vec<Arc<NodeDescriptor>>,
    hash: HashAlgorithm,
}

impl ReplicaDirectory {
    pub fn new(nodes: &[NodeConfig], hash: HashAlgorithm) -> Self {
        Self {
            nodes: nodes
                .iter()
                .enumerate()
                .map(|(index, node)| Arc::new(NodeDescriptor::new(index, node)))
                .collect(),
            hash,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(&config.nodes, config.hash_algorithm)
    }

    pub fn nodes(&self) -> &[Arc<NodeDescriptor>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_available()).count()
    }

    /// Ring index of the key's home node
    pub fn home(&self, key: &Key) -> usize {
        self.hash.position(key.as_bytes(), self.nodes.len())
    }

    /// Walk the ring from the key's home until `want` available nodes are seen.
    ///
    /// Returns every visited node in ring order, unavailable ones included.
    /// Visits each node at most once.
    pub fn successors(&self, key: &Key, want: usize) -> Result<Vec<Arc<NodeDescriptor>>> {
        let ring = self.nodes.len();
        if want == 0 || ring == 0 {
            return Err(Error::InsufficientReplicas {
                needed: want,
                available: self.available_count(),
            });
        }

        let home = self.home(key);
        let mut visited = Vec::with_capacity(want);
        let mut available = 0;
        for step in 0..ring {
            let node = &self.nodes[(home + step) % ring];
            visited.push(node.clone());
            if node.is_available() {
                available += 1;
                if available == want {
                    return Ok(visited);
                }
            }
        }

        Err(Error::InsufficientReplicas {
            needed: want,
            available,
        })
    }
}
