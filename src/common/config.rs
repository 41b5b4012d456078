//! Configuration for quorumkv components
//!
//! The cluster layout is static: every process is started with the same ordered
//! node list, and the configuration is passed by value to each component.

use crate::common::hash::HashAlgorithm;
use crate::common::{Error, Result};
use config::builder::{ConfigBuilder, DefaultState};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "QUORUMKV";

/// Write quorum for replication factor `n`: a strict majority.
pub fn write_quorum_for(n: usize) -> usize {
    n / 2 + 1
}

/// Read quorum for replication factor `n`, sized so that `W + R = N + 1`.
pub fn read_quorum_for(n: usize) -> usize {
    n - write_quorum_for(n) + 1
}

/// Cluster-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Ordered, fixed list of cluster members
    pub nodes: Vec<NodeConfig>,

    /// Replication factor (N)
    pub replication_factor: usize,

    /// Write quorum override (derived from N when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_quorum: Option<usize>,

    /// Read quorum override (derived from N when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_quorum: Option<usize>,

    /// Digest used to place keys on the ring
    pub hash_algorithm: HashAlgorithm,

    /// Peer RPC retry policy
    pub rpc: RpcConfig,

    /// Interval between heartbeat rounds
    pub heartbeat_interval_ms: u64,

    /// Maximum number of keys a store node accepts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_capacity: Option<usize>,

    /// Logging level
    pub log_level: String,
}

/// One member of the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub address: IpAddr,
    pub coordinator_port: u16,
    pub store_port: u16,
}

impl NodeConfig {
    pub fn coordinator_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.coordinator_port)
    }

    pub fn store_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.store_port)
    }
}

/// Retry/timeout policy for node-to-node requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Transmissions per request (first one included)
    pub attempts: u32,

    /// Absolute deadline measured from issue time
    pub timeout_ms: u64,

    /// Retry `i` goes out at `retry_base_ms * 2^i`
    pub retry_base_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            timeout_ms: 10_000,
            retry_base_ms: 250,
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay after issue for transmission `attempt` (0 is immediate).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_base_ms.saturating_mul(factor))
    }
}

pub const DEFAULT_COORDINATOR_PORTS: [u16; 5] = [55555, 55556, 55557, 55558, 55559];
pub const DEFAULT_STORE_PORTS: [u16; 5] = [55560, 55561, 55562, 55563, 55564];

impl Default for ClusterConfig {
    fn default() -> Self {
        let nodes = DEFAULT_COORDINATOR_PORTS
            .iter()
            .zip(DEFAULT_STORE_PORTS.iter())
            .map(|(&coordinator_port, &store_port)| NodeConfig {
                address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                coordinator_port,
                store_port,
            })
            .collect();
        Self {
            nodes,
            replication_factor: 5,
            write_quorum: None,
            read_quorum: None,
            hash_algorithm: HashAlgorithm::Sha512,
            rpc: RpcConfig::default(),
            heartbeat_interval_ms: 60_000,
            store_capacity: None,
            log_level: "info".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Load from an optional TOML file, then `QUORUMKV_*` environment overrides.
    ///
    /// Nested fields use a double underscore, e.g. `QUORUMKV_RPC__TIMEOUT_MS`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: ClusterConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.replication_factor;
        if self.nodes.is_empty() {
            return Err(Error::InvalidConfig("node list is empty".into()));
        }
        if n == 0 || n > self.nodes.len() {
            return Err(Error::InvalidConfig(format!(
                "replication factor {} must be between 1 and {}",
                n,
                self.nodes.len()
            )));
        }
        let (w, r) = (self.write_quorum(), self.read_quorum());
        if w == 0 || w > n || r == 0 || r > n {
            return Err(Error::InvalidConfig(format!(
                "quorums must lie in 1..={}: write {}, read {}",
                n, w, r
            )));
        }
        if w + r <= n {
            return Err(Error::InvalidConfig(format!(
                "write quorum {} + read quorum {} must exceed replication factor {}",
                w, r, n
            )));
        }
        if self.rpc.attempts == 0 {
            return Err(Error::InvalidConfig("rpc.attempts must be at least 1".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].iter().any(|other| {
                other.coordinator_addr() == node.coordinator_addr()
                    || other.store_addr() == node.store_addr()
            }) {
                return Err(Error::InvalidConfig(format!(
                    "node {} reuses an address already in the list",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn write_quorum(&self) -> usize {
        self.write_quorum
            .unwrap_or_else(|| write_quorum_for(self.replication_factor))
    }

    pub fn read_quorum(&self) -> usize {
        self.read_quorum
            .unwrap_or_else(|| read_quorum_for(self.replication_factor))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
