//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Replica placement (modulo hash ring, bounded successor walk)
//! - Liveness tracking (heartbeat monitor)
//! - Peer RPC with retries and timeouts
//! - Quorum reads and writes with read-repair

pub mod monitor;
pub mod peer_client;
pub mod placement;
pub mod quorum;
pub mod server;

pub use monitor::Monitor;
pub use peer_client::PeerClient;
pub use placement::{NodeDescriptor, ReplicaDirectory};
pub use quorum::{Ballot, Tally, Vote};
pub use server::Coordinator;
