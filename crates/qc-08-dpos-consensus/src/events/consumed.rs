//! Consumed events (Incoming)

use super::{LeaderChangeNotify, PosFinishedNotify};
use crate::domain::{BlockHeader, ConsensusMessage, LocalBlockRequest};
use serde::{Deserialize, Serialize};
use shared_types::{Address, Role};

/// A new chain head was imported; consensus moves to `header.number + 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    /// Role of the local node for the next height.
    pub role: Role,
    pub header: BlockHeader,
}

impl RoleUpdate {
    /// Height consensus runs for.
    pub fn consensus_number(&self) -> u64 {
        self.header.number + 1
    }
}

/// Every input the consensus service accepts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusInput {
    RoleUpdated(RoleUpdate),
    LeaderChange(LeaderChangeNotify),
    PosFinished(PosFinishedNotify),
    LocalRequest(LocalBlockRequest),
    /// Header whose POS finished elsewhere (state recovery).
    Recovery(BlockHeader),
    /// Message received from a peer.
    Network {
        from: Address,
        message: ConsensusMessage,
    },
}

impl ConsensusInput {
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusInput::RoleUpdated(_) => "role_updated",
            ConsensusInput::LeaderChange(_) => "leader_change",
            ConsensusInput::PosFinished(_) => "pos_finished",
            ConsensusInput::LocalRequest(_) => "local_request",
            ConsensusInput::Recovery(_) => "recovery",
            ConsensusInput::Network { message, .. } => message.name(),
        }
    }
}
