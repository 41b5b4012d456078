//! Common utilities and types shared across quorumkv

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod utils;

pub use config::{read_quorum_for, write_quorum_for, ClusterConfig, NodeConfig, RpcConfig};
pub use error::{Error, Result};
pub use hash::HashAlgorithm;
pub use metrics::{CoordinatorMetrics, Counter, RpcMetrics};
pub use utils::{hex_string, parse_duration, retry_with_backoff, short_hex};
