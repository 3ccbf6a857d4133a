//! # Core Entities
//!
//! Fixed-width primitives and the node roles that route consensus traffic.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha3::{Digest, Keccak256};
use std::fmt;

/// A 32-byte Keccak-256 hash.
pub type Hash = [u8; 32];

/// A 20-byte Ethereum-style address.
pub type Address = [u8; 20];

/// The all-zero hash, used as "no hash".
pub const EMPTY_HASH: Hash = [0u8; 32];

/// The all-zero address, used as "no account" (e.g. no leader on a
/// broadcast height).
pub const EMPTY_ADDRESS: Address = [0u8; 20];

/// A 65-byte recoverable secp256k1 signature (`r || s || v`).
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde_as(as = "Bytes")] pub [u8; 65]);

impl Signature {
    pub const LEN: usize = 65;

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 65])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}..)", hex::encode(&self.0[..8]))
    }
}

/// Role of a node in the current topology.
///
/// Only `Validator` nodes take part in voting and reelection; `Broadcast`
/// nodes verify quorum-backed blocks without voting; `Miner` nodes receive
/// mining requests once a header reaches quorum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Default,
    Miner,
    Validator,
    BackupValidator,
    Broadcast,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Default => "default",
            Role::Miner => "miner",
            Role::Validator => "validator",
            Role::BackupValidator => "backup_validator",
            Role::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Short hex rendering for log fields (`0x1a2b3c4d`).
pub fn short_hex(bytes: &[u8]) -> String {
    let end = bytes.len().min(4);
    format!("0x{}", hex::encode(&bytes[..end]))
}
