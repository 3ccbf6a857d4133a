//! Peer-to-peer consensus messages
//!
//! Everything a validator exchanges with other nodes during one height:
//! proposals and block votes for verification, and the inquiry /
//! leader-change / result-broadcast rounds of reelection.

use super::{BlockHeader, ConsensusTurn, Receipt, Transaction};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use shared_types::{Address, Hash, Role, Signature};

/// Reelection inquiry sent by the master of `consensus_turn + reelect_turn`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryReq {
    pub master: Address,
    pub number: u64,
    /// Timestamp of the parent header the master is building on.
    pub header_time: u64,
    pub consensus_turn: ConsensusTurn,
    pub reelect_turn: u32,
    pub timestamp: u64,
}

impl InquiryReq {
    pub fn hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(b"inquiry");
        hasher.update(self.master);
        hasher.update(self.number.to_le_bytes());
        hasher.update(self.header_time.to_le_bytes());
        update_turn(&mut hasher, &self.consensus_turn);
        hasher.update(self.reelect_turn.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        finalize(hasher)
    }
}

/// Answer kinds of an inquiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InquiryAnswer {
    /// The responder already has a newer parent; the requester should
    /// recover to this header.
    NewBlockReady { header: BlockHeader },
    /// This turn was already decided by a leader-change round.
    AlreadyReelected { result: ReelectConsensus },
    /// The POS of this turn already reached quorum.
    PosComplete {
        header: BlockHeader,
        consensus_turn: ConsensusTurn,
    },
    /// The responder agrees to replace the leader.
    Agree { signature: Signature },
}

impl InquiryAnswer {
    pub fn name(&self) -> &'static str {
        match self {
            InquiryAnswer::NewBlockReady { .. } => "new_block_ready",
            InquiryAnswer::AlreadyReelected { .. } => "already_reelected",
            InquiryAnswer::PosComplete { .. } => "pos_complete",
            InquiryAnswer::Agree { .. } => "agree",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryRsp {
    pub req_hash: Hash,
    pub from: Address,
    pub number: u64,
    pub answer: InquiryAnswer,
}

/// Leader-change request, backed by a quorum of `Agree` signatures over
/// the inquiry hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelectLeaderReq {
    pub inquiry: InquiryReq,
    pub agree_signs: Vec<Signature>,
    pub timestamp: u64,
}

impl ReelectLeaderReq {
    pub fn hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(b"reelect");
        hasher.update(self.inquiry.hash());
        hasher.update((self.agree_signs.len() as u64).to_le_bytes());
        for sig in &self.agree_signs {
            hasher.update(sig.as_bytes());
        }
        hasher.update(self.timestamp.to_le_bytes());
        finalize(hasher)
    }
}

/// A leader-change request together with the quorum of votes it collected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelectConsensus {
    pub req: ReelectLeaderReq,
    pub votes: Vec<Signature>,
}

/// Signature over a hash: block votes, leader-change votes and broadcast
/// responses all travel in this shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMsg {
    pub sign_hash: Hash,
    pub signature: Signature,
    pub from: Address,
    pub number: u64,
}

/// Outcome announced by a master once its round is settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastResult {
    /// POS of the current turn had already finished.
    Pos {
        header: BlockHeader,
        consensus_turn: ConsensusTurn,
    },
    /// A leader-change round succeeded (or had already succeeded).
    Reelected(ReelectConsensus),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultBroadcast {
    pub from: Address,
    pub number: u64,
    pub result: BroadcastResult,
    pub timestamp: u64,
}

impl ResultBroadcast {
    pub fn hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(b"broadcast");
        hasher.update(self.from);
        hasher.update(self.number.to_le_bytes());
        match &self.result {
            BroadcastResult::Pos {
                header,
                consensus_turn,
            } => {
                hasher.update([0u8]);
                hasher.update(header.hash());
                update_turn(&mut hasher, consensus_turn);
            }
            BroadcastResult::Reelected(rl) => {
                hasher.update([1u8]);
                hasher.update(rl.req.hash());
                for sig in &rl.votes {
                    hasher.update(sig.as_bytes());
                }
            }
        }
        hasher.update(self.timestamp.to_le_bytes());
        finalize(hasher)
    }
}

/// Block proposal of a leader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub header: BlockHeader,
    /// Hashes of the transactions, resolved by the transaction source.
    pub tx_codes: Vec<Hash>,
    pub consensus_turn: ConsensusTurn,
    pub from: Address,
}

impl BlockRequest {
    pub fn fingerprint(&self) -> Hash {
        self.header.fingerprint()
    }

    pub fn leader(&self) -> Address {
        self.header.leader
    }
}

/// Proposal built by the local node; it carries its own execution result
/// and skips verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBlockRequest {
    pub request: BlockRequest,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}

/// Quorum-backed header handed to miners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningRequest {
    pub header: BlockHeader,
    pub tx_codes: Vec<Hash>,
}

/// Every message a consensus node sends to its peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    BlockRequest(BlockRequest),
    BlockVote(VoteMsg),
    MiningRequest(MiningRequest),
    /// Quorum-backed proposal forwarded to broadcast nodes.
    PosedRequest(BlockRequest),
    InquiryReq(InquiryReq),
    InquiryRsp(InquiryRsp),
    ReelectReq(ReelectLeaderReq),
    ReelectVote(VoteMsg),
    ResultBroadcast(ResultBroadcast),
    BroadcastRsp(VoteMsg),
}

impl ConsensusMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusMessage::BlockRequest(_) => "block_request",
            ConsensusMessage::BlockVote(_) => "block_vote",
            ConsensusMessage::MiningRequest(_) => "mining_request",
            ConsensusMessage::PosedRequest(_) => "posed_request",
            ConsensusMessage::InquiryReq(_) => "inquiry_req",
            ConsensusMessage::InquiryRsp(_) => "inquiry_rsp",
            ConsensusMessage::ReelectReq(_) => "reelect_req",
            ConsensusMessage::ReelectVote(_) => "reelect_vote",
            ConsensusMessage::ResultBroadcast(_) => "result_broadcast",
            ConsensusMessage::BroadcastRsp(_) => "broadcast_rsp",
        }
    }

    /// Height the message belongs to.
    pub fn number(&self) -> u64 {
        match self {
            ConsensusMessage::BlockRequest(req) | ConsensusMessage::PosedRequest(req) => {
                req.header.number
            }
            ConsensusMessage::BlockVote(vote)
            | ConsensusMessage::ReelectVote(vote)
            | ConsensusMessage::BroadcastRsp(vote) => vote.number,
            ConsensusMessage::MiningRequest(req) => req.header.number,
            ConsensusMessage::InquiryReq(req) => req.number,
            ConsensusMessage::InquiryRsp(rsp) => rsp.number,
            ConsensusMessage::ReelectReq(req) => req.inquiry.number,
            ConsensusMessage::ResultBroadcast(msg) => msg.number,
        }
    }
}

/// Destination of an outgoing message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Every node holding one of these roles.
    Roles(Vec<Role>),
    /// A single peer.
    Peer(Address),
}

impl Target {
    pub fn role(role: Role) -> Self {
        Target::Roles(vec![role])
    }
}

fn update_turn(hasher: &mut Keccak256, turn: &ConsensusTurn) {
    hasher.update(turn.pre_consensus_turn.to_le_bytes());
    hasher.update(turn.used_reelect_turn.to_le_bytes());
}

fn finalize(hasher: Keccak256) -> Hash {
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
