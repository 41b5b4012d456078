//! Operational counters
//!
//! Lock-free counters bumped on the request path and read for periodic
//! status logging and in tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for tracking event counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Coordinator activity
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub puts: Counter,
    pub gets: Counter,
    pub removes: Counter,
    pub unrecognized: Counter,
    pub quorum_failures: Counter,
    pub placement_failures: Counter,
    pub read_repairs: Counter,
}

impl CoordinatorMetrics {
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            puts: self.puts.get(),
            gets: self.gets.get(),
            removes: self.removes.get(),
            unrecognized: self.unrecognized.get(),
            quorum_failures: self.quorum_failures.get(),
            placement_failures: self.placement_failures.get(),
            read_repairs: self.read_repairs.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorSnapshot {
    pub puts: u64,
    pub gets: u64,
    pub removes: u64,
    pub unrecognized: u64,
    pub quorum_failures: u64,
    pub placement_failures: u64,
    pub read_repairs: u64,
}

/// Peer RPC activity
#[derive(Debug, Default)]
pub struct RpcMetrics {
    pub requests: Counter,
    pub transmissions: Counter,
    pub responses: Counter,
    pub timeouts: Counter,
    pub discarded: Counter,
}
