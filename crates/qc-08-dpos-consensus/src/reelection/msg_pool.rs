//! Settled facts of one height the controller answers inquiries from.

use crate::domain::{BlockHeader, ConsensusTurn, ReelectConsensus};
use crate::events::PosFinishedNotify;
use shared_types::Address;
use std::collections::BTreeMap;

#[derive(Default)]
pub struct ReelectMsgPool {
    parent_header: Option<BlockHeader>,
    pos_notifies: Vec<PosFinishedNotify>,
    /// Leader-change results keyed by the consensus turn they produced.
    rl_consensus: BTreeMap<ConsensusTurn, ReelectConsensus>,
}

impl ReelectMsgPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_parent_header(&mut self, header: BlockHeader) {
        self.parent_header = Some(header);
    }

    pub fn parent_header(&self) -> Option<&BlockHeader> {
        self.parent_header.as_ref()
    }

    /// Returns `false` when a notify for the same turn and leader exists.
    pub fn save_pos_notify(&mut self, notify: PosFinishedNotify) -> bool {
        let exists = self.pos_notifies.iter().any(|n| {
            n.consensus_turn == notify.consensus_turn && n.header.leader == notify.header.leader
        });
        if exists {
            return false;
        }
        self.pos_notifies.push(notify);
        true
    }

    pub fn pos_notify(&self, turn: ConsensusTurn, leader: &Address) -> Option<&PosFinishedNotify> {
        self.pos_notifies
            .iter()
            .find(|n| n.consensus_turn == turn && &n.header.leader == leader)
    }

    pub fn save_rl_consensus(&mut self, turn: ConsensusTurn, result: ReelectConsensus) {
        self.rl_consensus.insert(turn, result);
    }

    pub fn rl_consensus(&self, turn: ConsensusTurn) -> Option<&ReelectConsensus> {
        self.rl_consensus.get(&turn)
    }
}
