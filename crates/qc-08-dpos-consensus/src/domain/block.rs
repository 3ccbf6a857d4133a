//! Block entities seen by the consensus core
//!
//! Only the header fields that the verification pipeline recomputes or
//! compares are modelled here; sealing fields stay opaque.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use shared_types::{Address, Hash, Role, Signature};

/// Election data carried by a header (validator / miner election result).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionEntry {
    pub account: Address,
    pub stake: u64,
    pub role: Role,
}

/// How a header encodes the network topology.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyKind {
    /// Full topology snapshot.
    All,
    /// Only the positions that changed since the parent.
    #[default]
    Change,
}

/// One position in the network topology.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    pub account: Address,
    pub position: u16,
}

/// Topology field of a header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetTopology {
    pub kind: TopologyKind,
    pub entries: Vec<TopologyEntry>,
}

impl NetTopology {
    /// Keccak digest of the topology, used for byte-exact comparison.
    pub fn digest(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update([matches!(self.kind, TopologyKind::All) as u8]);
        hasher.update((self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            hasher.update(entry.account);
            hasher.update(entry.position.to_le_bytes());
        }
        finalize(hasher)
    }
}

/// Keccak digest of an election list.
pub fn election_digest(entries: &[ElectionEntry]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update((entries.len() as u64).to_le_bytes());
    for entry in entries {
        hasher.update(entry.account);
        hasher.update(entry.stake.to_le_bytes());
        hasher.update([role_tag(entry.role)]);
    }
    finalize(hasher)
}

/// Block header
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: Hash,
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub leader: Address,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub tx_root: Hash,
    pub receipt_root: Hash,
    pub state_root: Hash,
    pub elect: Vec<ElectionEntry>,
    pub net_topology: NetTopology,
    /// Set on super blocks, which reset the leader rotation.
    pub super_block: bool,
    pub extra: Vec<u8>,
    /// DPOS signatures attached once the proposal reaches quorum.
    pub signatures: Vec<Signature>,
    pub nonce: u64,
}

impl BlockHeader {
    /// Proposal fingerprint: hash of the header excluding signatures and
    /// nonce. Votes and cached requests are keyed by it.
    pub fn fingerprint(&self) -> Hash {
        finalize(self.unsealed_hasher())
    }

    /// Full header hash, including signatures and nonce.
    pub fn hash(&self) -> Hash {
        let mut hasher = self.unsealed_hasher();
        hasher.update((self.signatures.len() as u64).to_le_bytes());
        for sig in &self.signatures {
            hasher.update(sig.as_bytes());
        }
        hasher.update(self.nonce.to_le_bytes());
        finalize(hasher)
    }

    fn unsealed_hasher(&self) -> Keccak256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.parent_hash);
        hasher.update(self.number.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.leader);
        hasher.update(self.gas_limit.to_le_bytes());
        hasher.update(self.gas_used.to_le_bytes());
        hasher.update(self.tx_root);
        hasher.update(self.receipt_root);
        hasher.update(self.state_root);
        hasher.update(election_digest(&self.elect));
        hasher.update(self.net_topology.digest());
        hasher.update([self.super_block as u8]);
        hasher.update((self.extra.len() as u64).to_le_bytes());
        hasher.update(&self.extra);
        hasher
    }
}

/// A transaction as delivered by the transaction source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub payload: Vec<u8>,
}

/// Receipt produced by re-execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub gas_used: u64,
    pub success: bool,
}

/// Balance change computed by the reward/slash step before execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    pub account: Address,
    pub delta: i128,
}

/// Result of re-executing a proposal against its parent state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub gas_used: u64,
    pub tx_root: Hash,
    pub receipt_root: Hash,
    pub state_root: Hash,
    pub receipts: Vec<Receipt>,
}

impl ExecutionOutcome {
    /// First header field that disagrees with this outcome, if any.
    pub fn mismatch_with(&self, header: &BlockHeader) -> Option<&'static str> {
        if self.gas_used != header.gas_used {
            Some("gas_used")
        } else if self.tx_root != header.tx_root {
            Some("tx_root")
        } else if self.receipt_root != header.receipt_root {
            Some("receipt_root")
        } else if self.state_root != header.state_root {
            Some("state_root")
        } else {
            None
        }
    }
}

fn role_tag(role: Role) -> u8 {
    match role {
        Role::Default => 0,
        Role::Miner => 1,
        Role::Validator => 2,
        Role::BackupValidator => 3,
        Role::Broadcast => 4,
    }
}

fn finalize(hasher: Keccak256) -> Hash {
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
