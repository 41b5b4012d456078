//! Store node implementation
//!
//! Every node runs one store: a versioned in-memory map answering the peer
//! protocol over UDP.

pub mod engine;
pub mod server;

pub use engine::{Lookup, StoreEngine, VersionedEntry};
pub use server::StoreServer;
