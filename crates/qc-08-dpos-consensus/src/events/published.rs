//! Published events (Outgoing)
//!
//! Fire-and-forget notifications for the rest of the node. The service
//! also loops `LeaderChange` back into the block-verification process and
//! `PosFinished` back into the reelection controller.

use crate::domain::{BlockHeader, ConsensusTurn, Receipt, Transaction};
use serde::{Deserialize, Serialize};
use shared_types::Address;

/// Leader view of a height after every controller transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderChangeNotify {
    /// `false` while a reelection is running; the process must not vote.
    pub consensus_state: bool,
    pub pre_leader: Address,
    pub leader: Address,
    pub next_leader: Address,
    pub number: u64,
    pub consensus_turn: ConsensusTurn,
    pub reelect_turn: u32,
    pub turn_begin_time: u64,
    pub turn_end_time: u64,
}

/// A proposal passed local verification.
///
/// Validators publish it as soon as their own vote is cast; broadcast
/// nodes publish it once a quorum-backed header checks out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVerifiedEvent {
    pub header: BlockHeader,
    pub consensus_turn: ConsensusTurn,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
    pub is_broadcast: bool,
}

/// The proposal of a turn reached DPOS quorum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosFinishedNotify {
    pub number: u64,
    pub consensus_turn: ConsensusTurn,
    /// Header with the quorum signatures attached.
    pub header: BlockHeader,
}

/// What the state-recovery subsystem should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryKind {
    /// Adopt a header whose POS finished elsewhere.
    Pos,
    /// Sync a full block the node is missing.
    FullHeader,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStateRequest {
    pub kind: RecoveryKind,
    pub header: BlockHeader,
    pub from: Address,
}

/// Everything the consensus core publishes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusEvent {
    LeaderChange(LeaderChangeNotify),
    BlockVerified(BlockVerifiedEvent),
    PosFinished(PosFinishedNotify),
    RecoveryState(RecoveryStateRequest),
}

impl ConsensusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusEvent::LeaderChange(_) => "leader_change",
            ConsensusEvent::BlockVerified(_) => "block_verified",
            ConsensusEvent::PosFinished(_) => "pos_finished",
            ConsensusEvent::RecoveryState(_) => "recovery_state",
        }
    }
}
