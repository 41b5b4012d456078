//! Error types for quorumkv

use std::net::SocketAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Errors ===
    #[error("Malformed message: {0}")]
    Malformed(String),

    // === Placement Errors ===
    #[error("Insufficient available replicas: need {needed}, have {available}")]
    InsufficientReplicas { needed: usize, available: usize },

    // === Quorum Errors ===
    #[error("Quorum unreachable: need {needed}, {failed} of {targets} replicas failed")]
    QuorumUnreachable {
        needed: usize,
        failed: usize,
        targets: usize,
    },

    // === Network Errors ===
    #[error("No response from {peer} after {attempts} attempts")]
    PeerTimeout { peer: SocketAddr, attempts: u32 },

    #[error("Peer client stopped")]
    ClientClosed,

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::PeerTimeout { .. }
                | Error::QuorumUnreachable { .. }
                | Error::InsufficientReplicas { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        let peer: SocketAddr = "127.0.0.1:55560".parse().unwrap();
        assert!(Error::PeerTimeout { peer, attempts: 5 }.is_retryable());
        assert!(Error::InsufficientReplicas {
            needed: 3,
            available: 2
        }
        .is_retryable());
        assert!(!Error::Malformed("short".into()).is_retryable());
        assert!(!Error::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::QuorumUnreachable {
            needed: 3,
            failed: 3,
            targets: 5,
        };
        assert_eq!(
            err.to_string(),
            "Quorum unreachable: need 3, 3 of 5 replicas failed"
        );
    }
}
