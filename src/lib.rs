//! # quorumkv
//!
//! A replicated in-memory key-value store over UDP with:
//! - Tunable replication factor with majority write and overlapping read quorums
//! - Modulo hash-ring placement with a bounded successor walk
//! - Per-key versions, tombstones and read-repair
//! - Retrying peer RPC with exponential backoff and one absolute timeout
//! - Heartbeat-driven availability tracking
//!
//! ## Architecture
//!
//! ```text
//!          client (quorumkv CLI / KvClient)
//!                     │ client protocol
//!          ┌──────────▼──────────┐
//!          │ Coordinator (any)   │
//!          │  - replica set      │
//!          │  - quorum ballot    │
//!          │  - read-repair      │
//!          └──────────┬──────────┘
//!                     │ peer protocol (PeerClient)
//!   ┌─────────────┬───┴─────────┬─────────────┐
//!   │             │             │             │
//! ┌─▼──────┐  ┌───▼────┐  ┌─────▼──┐  ┌───────▼┐
//! │ Store 0│  │ Store 1│  │ Store 2│  │  ...   │
//! │ k → v@n│  │ k → v@n│  │ k → v@n│  │        │
//! └────────┘  └────────┘  └────────┘  └────────┘
//! ```
//!
//! Every node runs both a coordinator and a store. Any coordinator can serve
//! any key.
//!
//! ## Usage
//!
//! ### Start a local five-node cluster
//! ```bash
//! quorumkv-node --all
//! ```
//!
//! ### Use the CLI
//! ```bash
//! quorumkv put k1 v1 --coordinator 127.0.0.1:55555
//! quorumkv get k1
//! quorumkv remove k1
//! quorumkv shutdown
//! ```

pub mod client;
pub mod common;
pub mod coordinator;
pub mod protocol;
pub mod store;

// Re-export commonly used types
pub use client::KvClient;
pub use common::{ClusterConfig, Error, Result};
pub use coordinator::{Coordinator, Monitor, PeerClient, ReplicaDirectory};
pub use protocol::{Key, RequestId, Status};
pub use store::{StoreEngine, StoreServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
