//! Error types for the consensus core

use super::ConsensusTurn;
use shared_types::{Address, Hash};

/// Consensus error types
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Header not found: {0:?}")]
    HeaderNotFound(Hash),

    #[error("Empty validator list at height {0}")]
    EmptyValidatorList(u64),

    #[error("Leader list not computed for height {0}")]
    LeaderListNotReady(u64),

    #[error("Illegal begin time: {requested} <= current {current}")]
    IllegalBeginTime { current: u64, requested: u64 },

    #[error("Timestamp {timestamp} outside turn window ({begin}, {end})")]
    TimestampOutOfWindow { timestamp: u64, begin: u64, end: u64 },

    #[error("Vote has empty hash or signature")]
    EmptyVoteParam,

    #[error("Failed to recover vote signer")]
    SignerRecoveryFailed,

    #[error("Vote signer mismatch: claimed {claimed:?}, recovered {recovered:?}")]
    SignerMismatch { claimed: Address, recovered: Address },

    #[error("Duplicate vote from {signer:?} for {hash:?}")]
    DuplicateVote { signer: Address, hash: Hash },

    #[error("Request turn {turn} older than current turn {current}")]
    StaleRequestTurn {
        turn: ConsensusTurn,
        current: ConsensusTurn,
    },

    #[error("Duplicate request from leader {leader:?} at turn {turn}")]
    DuplicateRequest { leader: Address, turn: ConsensusTurn },

    #[error("Request not found")]
    RequestNotFound,

    #[error("Illegal height {number}, current height is {current}")]
    IllegalNumber { number: u64, current: u64 },

    #[error("State mismatch: expected {expected}, got {actual}")]
    StateMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Local node is not a validator at height {0}")]
    NotValidator(u64),

    #[error("Round mismatch: {0}")]
    RoundMismatch(String),

    #[error("Master mismatch: expected {expected:?}, got {actual:?}")]
    MasterMismatch { expected: Address, actual: Address },

    #[error("Response does not match the pending request")]
    StaleRequestHash,

    #[error("Quorum check failed: {0}")]
    QuorumFailed(String),

    #[error("Election data mismatch")]
    ElectionMismatch,

    #[error("Topology data mismatch")]
    TopologyMismatch,

    #[error("Re-execution mismatch on {0}")]
    ExecutionMismatch(&'static str),

    #[error("Transaction fetch timed out")]
    TxFetchTimeout,

    #[error("Transaction fetch error: {0}")]
    TxFetch(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Election source error: {0}")]
    Election(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Inbox of height {0} is closed")]
    InboxClosed(u64),

    #[error("Inbox of height {0} is full")]
    InboxFull(u64),
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
