//! # Request Cache
//!
//! Proposals received for one height. A proposal sent by the leader named
//! in its header takes that leader's slot; anything else (forwarded or
//! posed requests) goes to a bounded FIFO.

use crate::domain::{ConsensusError, ConsensusResult, ConsensusTurn, ProposalRecord};
use shared_types::{short_hex, Address, Hash};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

pub struct RequestCache {
    number: u64,
    cur_turn: ConsensusTurn,
    leader_reqs: HashMap<Address, ProposalRecord>,
    other_reqs: VecDeque<ProposalRecord>,
    other_capacity: usize,
}

impl RequestCache {
    pub fn new(number: u64, other_capacity: usize) -> Self {
        Self {
            number,
            cur_turn: ConsensusTurn::default(),
            leader_reqs: HashMap::new(),
            other_reqs: VecDeque::new(),
            other_capacity,
        }
    }

    pub fn cur_turn(&self) -> ConsensusTurn {
        self.cur_turn
    }

    /// Caches `record`. `from` is the peer that delivered it.
    pub fn add_request(&mut self, record: ProposalRecord, from: Address) -> ConsensusResult<()> {
        let turn = record.turn();
        if turn < self.cur_turn {
            return Err(ConsensusError::StaleRequestTurn {
                turn,
                current: self.cur_turn,
            });
        }

        let leader = record.leader();
        if from == leader || record.local {
            if let Some(existing) = self.leader_reqs.get(&leader) {
                if existing.turn() >= turn {
                    return Err(ConsensusError::DuplicateRequest { leader, turn });
                }
            }
            debug!(
                number = self.number,
                leader = %short_hex(&leader),
                turn = %turn,
                "Leader request cached"
            );
            self.leader_reqs.insert(leader, record);
            return Ok(());
        }

        if self
            .other_reqs
            .iter()
            .any(|r| r.fingerprint == record.fingerprint)
        {
            return Err(ConsensusError::DuplicateRequest { leader, turn });
        }
        self.other_reqs.push_back(record);
        while self.other_reqs.len() > self.other_capacity {
            self.other_reqs.pop_front();
        }
        Ok(())
    }

    /// Advances the current turn and drops every request below it.
    /// Lower turns are ignored.
    pub fn set_cur_turn(&mut self, turn: ConsensusTurn) {
        if turn <= self.cur_turn {
            return;
        }
        self.cur_turn = turn;
        self.leader_reqs.retain(|_, r| r.turn() >= turn);
        self.other_reqs.retain(|r| r.turn() >= turn);
    }

    pub fn get_leader_req(&self, leader: &Address, turn: ConsensusTurn) -> Option<&ProposalRecord> {
        self.leader_reqs.get(leader).filter(|r| r.turn() == turn)
    }

    pub fn get_req_by_hash(&self, fingerprint: &Hash) -> Option<&ProposalRecord> {
        self.leader_reqs
            .values()
            .chain(self.other_reqs.iter())
            .find(|r| &r.fingerprint == fingerprint)
    }

    pub fn get_req_by_hash_mut(&mut self, fingerprint: &Hash) -> Option<&mut ProposalRecord> {
        self.leader_reqs
            .values_mut()
            .chain(self.other_reqs.iter_mut())
            .find(|r| &r.fingerprint == fingerprint)
    }

    /// Every cached request, leader slots first.
    pub fn all_requests(&self) -> Vec<&ProposalRecord> {
        self.leader_reqs
            .values()
            .chain(self.other_reqs.iter())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.leader_reqs.len() + self.other_reqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
