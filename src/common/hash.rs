//! Hashing utilities for quorumkv
//!
//! Keys are placed on a modulo ring: the configured digest is computed over the
//! raw key bytes, reduced to a non-negative integer, and taken modulo the
//! cluster size.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm used for ring placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-256", alias = "sha256", alias = "sha-256")]
    Sha256,
    #[serde(rename = "SHA-512", alias = "sha512", alias = "sha-512")]
    Sha512,
    #[serde(rename = "BLAKE3", alias = "blake3")]
    Blake3,
}

impl HashAlgorithm {
    /// Full digest of `data`
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
            HashAlgorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        }
    }

    /// Digest reduced to a non-negative integer (low-order 8 bytes, big-endian)
    pub fn reduce(&self, data: &[u8]) -> u64 {
        let digest = self.digest(data);
        let tail: [u8; 8] = digest[digest.len() - 8..]
            .try_into()
            .unwrap_or_default();
        u64::from_be_bytes(tail)
    }

    /// Ring position of `data` on a ring of `ring_size` slots
    pub fn position(&self, data: &[u8], ring_size: usize) -> usize {
        if ring_size == 0 {
            return 0;
        }
        (self.reduce(data) % ring_size as u64) as usize
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "SHA-256"),
            HashAlgorithm::Sha512 => write!(f, "SHA-512"),
            HashAlgorithm::Blake3 => write!(f, "BLAKE3"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "SHA-256" | "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA-512" | "SHA512" => Ok(HashAlgorithm::Sha512),
            "BLAKE3" => Ok(HashAlgorithm::Blake3),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown hash algorithm: {}",
                other
            ))),
        }
    }
}
