//! State of the reelect master's rounds.
//!
//! A master runs at most three rounds per reelect turn, one after the
//! other: inquiry (agree votes), leader-change request (votes) and result
//! broadcast (responses). Each round keeps one signature per signer.

use crate::domain::{ConsensusError, ConsensusResult, InquiryReq, ReelectLeaderReq, ResultBroadcast};
use shared_types::{Address, Hash, Signature};
use std::collections::HashMap;

/// What the master learned from its inquiry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InquiryResult {
    #[default]
    None,
    /// Agree quorum collected; a leader-change request is running.
    Agree,
    /// Someone answered that POS already finished.
    Pos,
    /// Someone answered with a settled leader-change result.
    AlreadyReelected,
}

/// A message and the signatures collected over its hash.
#[derive(Clone, Debug)]
pub struct VoteRound<M> {
    pub hash: Hash,
    pub msg: M,
    votes: HashMap<Address, Signature>,
}

impl<M> VoteRound<M> {
    pub fn new(hash: Hash, msg: M) -> Self {
        Self {
            hash,
            msg,
            votes: HashMap::new(),
        }
    }

    pub fn add_vote(&mut self, signer: Address, signature: Signature) -> ConsensusResult<()> {
        if self.votes.contains_key(&signer) {
            return Err(ConsensusError::DuplicateVote {
                signer,
                hash: self.hash,
            });
        }
        self.votes.insert(signer, signature);
        Ok(())
    }

    pub fn signatures(&self) -> Vec<Signature> {
        self.votes.values().copied().collect()
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }
}

#[derive(Default)]
pub struct MasterCache {
    pub inquiry: Option<VoteRound<InquiryReq>>,
    pub rl_req: Option<VoteRound<ReelectLeaderReq>>,
    pub broadcast: Option<VoteRound<ResultBroadcast>>,
    pub inquiry_result: InquiryResult,
    /// Hash of the last single inquiry sent to a peer that looked ahead.
    pub single_inquiry: Option<Hash>,
    pub last_single_inquiry_at: u64,
}

impl MasterCache {
    /// Drops every round. Single inquiry rate limiting survives.
    pub fn reset_rounds(&mut self) {
        self.inquiry = None;
        self.rl_req = None;
        self.broadcast = None;
        self.inquiry_result = InquiryResult::None;
    }

    /// Whether `hash` answers one of our pending inquiries.
    pub fn matches_inquiry(&self, hash: &Hash) -> bool {
        self.inquiry.as_ref().map(|r| &r.hash) == Some(hash) || self.single_inquiry.as_ref() == Some(hash)
    }
}
