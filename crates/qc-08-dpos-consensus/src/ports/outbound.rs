//! Driven ports (Outbound dependencies)
//!
//! The consensus core never owns storage, sockets or keys. Everything it
//! needs from the rest of the node comes through these traits.

use crate::domain::{
    BalanceAdjustment, BlockHeader, BroadcastInterval, ConsensusMessage, ElectionEntry,
    ExecutionOutcome, LeaderTimingConfig, NetTopology, Target, TopologyGraph,
    Transaction,
};
use crate::events::ConsensusEvent;
use async_trait::async_trait;
use shared_types::{Address, Hash, Signature};
use std::sync::Arc;

/// Event bus for fire-and-forget notifications
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: ConsensusEvent) -> Result<(), String>;
}

/// Read access to imported blocks and their states
pub trait ChainReader: Send + Sync {
    fn header_by_hash(&self, hash: &Hash) -> Option<BlockHeader>;

    /// Whether the state produced by block `hash` is available locally.
    fn has_state(&self, hash: &Hash) -> bool;
}

/// Epoch election data, keyed by the parent block hash
pub trait ElectionSource: Send + Sync {
    fn topology_graph(&self, parent_hash: &Hash) -> Result<TopologyGraph, String>;

    /// Election list a header built on `parent_hash` must carry.
    fn election_graph(&self, parent_hash: &Hash) -> Result<Vec<ElectionEntry>, String>;

    /// Topology field a header built on `parent_hash` must carry.
    fn expected_topology(
        &self,
        parent_hash: &Hash,
        header: &BlockHeader,
    ) -> Result<NetTopology, String>;

    fn leader_config(&self, parent_hash: &Hash) -> Result<LeaderTimingConfig, String>;

    fn broadcast_interval(&self, parent_hash: &Hash) -> Result<BroadcastInterval, String>;
}

/// Transaction pool lookups
#[async_trait]
pub trait TxSource: Send + Sync {
    /// Resolves `tx_codes` to full transactions, asking `leader` for
    /// missing ones. `seq` tags the request for the caller.
    async fn resolve(
        &self,
        number: u64,
        tx_codes: Vec<Hash>,
        leader: Address,
        seq: u64,
    ) -> Result<Vec<Transaction>, String>;
}

/// Block re-execution
pub trait ExecutionEngine: Send + Sync {
    /// Reward and slash adjustments applied before the transactions.
    fn reward_and_slash(&self, header: &BlockHeader) -> Result<Vec<BalanceAdjustment>, String>;

    /// Executes `transactions` on a copy of the parent state of `header`.
    fn execute(
        &self,
        header: &BlockHeader,
        transactions: &[Transaction],
        adjustments: &[BalanceAdjustment],
    ) -> Result<ExecutionOutcome, String>;

    /// Header-rule check (gas limit, extra data, difficulty...).
    fn verify_header(&self, header: &BlockHeader) -> Result<(), String>;
}

/// Signature-threshold checks against the validator set of a height
pub trait QuorumChecker: Send + Sync {
    /// Checks the signatures already attached to `header`.
    fn verify_block(&self, header: &BlockHeader) -> Result<(), String>;

    /// Returns the valid subset of `signatures` over `hash` when it reaches
    /// quorum for the validator set built on `parent_hash`.
    fn check_quorum(
        &self,
        hash: &Hash,
        signatures: &[Signature],
        parent_hash: &Hash,
    ) -> Result<Vec<Signature>, String>;

    /// Same check against an already resolved topology graph.
    fn check_quorum_in(
        &self,
        graph: &TopologyGraph,
        hash: &Hash,
        signatures: &[Signature],
    ) -> Result<Vec<Signature>, String>;
}

/// Local signing key
pub trait SignatureService: Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, hash: &Hash) -> Result<Signature, String>;

    /// Recovers the signer address of `signature` over `hash`.
    fn recover(&self, hash: &Hash, signature: &Signature) -> Option<Address>;
}

/// Peer transport. Delivery is best effort.
pub trait Transport: Send + Sync {
    fn send(&self, message: ConsensusMessage, target: Target) -> Result<(), String>;
}

/// Time source for turn windows
pub trait TimeSource: Send + Sync {
    /// Current unix timestamp in seconds
    fn now(&self) -> u64;

    /// Current unix timestamp in milliseconds
    fn now_millis(&self) -> u64 {
        self.now() * 1000
    }
}

/// Default time source using system time
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Collaborators shared by every height instance
#[derive(Clone)]
pub struct ConsensusPorts {
    pub chain: Arc<dyn ChainReader>,
    pub election: Arc<dyn ElectionSource>,
    pub txs: Arc<dyn TxSource>,
    pub execution: Arc<dyn ExecutionEngine>,
    pub quorum: Arc<dyn QuorumChecker>,
    pub signer: Arc<dyn SignatureService>,
    pub transport: Arc<dyn Transport>,
    pub event_bus: Arc<dyn EventBus>,
    pub time: Arc<dyn TimeSource>,
}
