//! Proposal records kept by the block-verification process

use super::{BlockRequest, ConsensusTurn, LocalBlockRequest, Receipt, Transaction};
use shared_types::{Address, Hash, Signature};
use std::collections::HashMap;
use std::fmt;

/// Outcome of local verification of a proposal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerifyResult {
    #[default]
    Processing,
    Success,
    /// Verification failed in a way a new leader can fix (reelection).
    FailedRecoverable,
    /// Local state disagrees with the proposal.
    StateFailed,
}

impl VerifyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyResult::Processing => "processing",
            VerifyResult::Success => "success",
            VerifyResult::FailedRecoverable => "failed_recoverable",
            VerifyResult::StateFailed => "state_failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, VerifyResult::Processing)
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached proposal and everything learned about it so far.
#[derive(Clone, Debug)]
pub struct ProposalRecord {
    pub request: BlockRequest,
    pub fingerprint: Hash,
    /// Built by the local node; verification is skipped.
    pub local: bool,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
    pub verify_result: VerifyResult,
    /// Verified block votes by signer. They outlive pauses of the process.
    pub votes: HashMap<Address, Signature>,
}

impl ProposalRecord {
    pub fn from_request(request: BlockRequest) -> Self {
        Self {
            fingerprint: request.fingerprint(),
            request,
            local: false,
            transactions: Vec::new(),
            receipts: Vec::new(),
            verify_result: VerifyResult::Processing,
            votes: HashMap::new(),
        }
    }

    pub fn from_local(local: LocalBlockRequest) -> Self {
        Self {
            fingerprint: local.request.fingerprint(),
            request: local.request,
            local: true,
            transactions: local.transactions,
            receipts: local.receipts,
            verify_result: VerifyResult::Success,
            votes: HashMap::new(),
        }
    }

    pub fn turn(&self) -> ConsensusTurn {
        self.request.consensus_turn
    }

    pub fn leader(&self) -> Address {
        self.request.header.leader
    }

    pub fn number(&self) -> u64 {
        self.request.header.number
    }
}
