//! # Block-Verification Process
//!
//! Per-height pipeline that verifies the current leader's proposal and
//! collects DPOS votes for it.
//!
//! ```text
//! Idle → Start → ReqVerify → TxsVerify → DposVerify → End
//!          ↑________________________________|
//!            leader change / failed broadcast verification
//! ```
//!
//! Transaction fetch and re-execution run on a detached worker that posts
//! its outcome back into the inbox tagged with a sequence number; outcomes
//! of superseded runs are dropped.

mod dpos;
mod verify;

use super::request_cache::RequestCache;
use super::retry_sender::RetrySender;
use super::vote_pool::VotePool;
use crate::domain::{
    BlockHeader, BlockRequest, ConsensusConfig, ConsensusError, ConsensusMessage,
    ConsensusResult, ExecutionOutcome, LocalBlockRequest, ProposalRecord, Target, Transaction,
    VoteMsg,
};
use crate::events::{ConsensusEvent, LeaderChangeNotify};
use crate::ports::ConsensusPorts;
use shared_types::{short_hex, Address, Hash, Role};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inputs of a process.
#[derive(Debug)]
pub enum ProcessInput {
    /// Local role for this height is known.
    StartRunning(Role),
    LeaderChange(LeaderChangeNotify),
    Request {
        from: Address,
        request: BlockRequest,
    },
    LocalRequest(LocalBlockRequest),
    Vote(VoteMsg),
    /// Header whose POS finished elsewhere.
    Recovery(BlockHeader),
    /// Worker outcome for the run tagged `seq`.
    TxsVerified {
        seq: u64,
        fingerprint: Hash,
        result: ConsensusResult<(Vec<Transaction>, ExecutionOutcome)>,
    },
}

impl ProcessInput {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessInput::StartRunning(_) => "start_running",
            ProcessInput::LeaderChange(_) => "leader_change",
            ProcessInput::Request { .. } => "request",
            ProcessInput::LocalRequest(_) => "local_request",
            ProcessInput::Vote(_) => "vote",
            ProcessInput::Recovery(_) => "recovery",
            ProcessInput::TxsVerified { .. } => "txs_verified",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Start,
    ReqVerify,
    TxsVerify,
    DposVerify,
    End,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Idle => "idle",
            ProcessState::Start => "start",
            ProcessState::ReqVerify => "req_verify",
            ProcessState::TxsVerify => "txs_verify",
            ProcessState::DposVerify => "dpos_verify",
            ProcessState::End => "end",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Process {
    number: u64,
    role: Role,
    state: ProcessState,
    /// Leader view while consensus is running (not reelecting).
    leader: Option<LeaderChangeNotify>,
    /// Fingerprint of the proposal being verified.
    current: Option<Hash>,
    req_cache: RequestCache,
    pos_finished: bool,
    tx_seq: u64,
    worker: Option<JoinHandle<()>>,
    vote_sender: Option<RetrySender>,
    mining_sender: Option<RetrySender>,
    posed_sender: Option<RetrySender>,
    /// Proposals a broadcast node already handled.
    broadcast_done: HashSet<Hash>,
    vote_pool: Arc<VotePool>,
    ports: ConsensusPorts,
    config: Arc<ConsensusConfig>,
    inbox: mpsc::Sender<ProcessInput>,
}

impl Process {
    pub fn new(
        number: u64,
        ports: ConsensusPorts,
        config: Arc<ConsensusConfig>,
        vote_pool: Arc<VotePool>,
        inbox: mpsc::Sender<ProcessInput>,
    ) -> Self {
        Self {
            number,
            role: Role::Default,
            state: ProcessState::Idle,
            leader: None,
            current: None,
            req_cache: RequestCache::new(number, config.other_req_capacity),
            pos_finished: false,
            tx_seq: 0,
            worker: None,
            vote_sender: None,
            mining_sender: None,
            posed_sender: None,
            broadcast_done: HashSet::new(),
            vote_pool,
            ports,
            config,
            inbox,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current(&self) -> Option<Hash> {
        self.current
    }

    pub fn record(&self, fingerprint: &Hash) -> Option<&ProposalRecord> {
        self.req_cache.get_req_by_hash(fingerprint)
    }

    /// Votes collected for the proposal being verified.
    pub fn vote_count(&self) -> usize {
        self.current
            .and_then(|hash| self.req_cache.get_req_by_hash(&hash))
            .map_or(0, |record| record.votes.len())
    }

    /// Processes inputs until the inbox closes or the task is aborted.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<ProcessInput>) {
        while let Some(input) = inbox.recv().await {
            let name = input.name();
            if let Err(e) = self.handle(input).await {
                debug!(
                    number = self.number,
                    state = %self.state,
                    input = name,
                    error = %e,
                    "Process dropped input"
                );
            }
        }
    }

    pub async fn handle(&mut self, input: ProcessInput) -> ConsensusResult<()> {
        match input {
            ProcessInput::StartRunning(role) => self.start_running(role).await?,
            ProcessInput::LeaderChange(notify) => self.set_leader_info(notify).await?,
            ProcessInput::Request { from, request } => self.handle_request(from, request).await?,
            ProcessInput::LocalRequest(local) => self.handle_local_request(local).await?,
            ProcessInput::Vote(vote) => self.handle_vote(vote).await?,
            ProcessInput::Recovery(header) => self.handle_recovery(header).await?,
            ProcessInput::TxsVerified {
                seq,
                fingerprint,
                result,
            } => self.handle_txs_verified(seq, fingerprint, result).await?,
        }
        // Broadcast nodes work through every quorum-backed request in turn
        if self.role == Role::Broadcast {
            self.start_req_verify_broadcast().await?;
        }
        Ok(())
    }

    async fn start_running(&mut self, role: Role) -> ConsensusResult<()> {
        if self.state != ProcessState::Idle && self.role == role {
            return Ok(());
        }
        info!(number = self.number, role = %role, "Process running");
        self.stop_process();
        self.role = role;
        self.state = ProcessState::Start;
        if role == Role::Validator {
            self.start_req_verify_common().await?;
        }
        Ok(())
    }

    async fn set_leader_info(&mut self, notify: LeaderChangeNotify) -> ConsensusResult<()> {
        if notify.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: notify.number,
                current: self.number,
            });
        }
        if !notify.consensus_state {
            if self.leader.is_some() {
                info!(number = self.number, "Reelection running, verification paused");
            }
            self.stop_process();
            self.leader = None;
            return Ok(());
        }
        if let Some(current) = &self.leader {
            if current.leader == notify.leader && current.consensus_turn == notify.consensus_turn {
                return Ok(());
            }
        }

        debug!(
            number = self.number,
            leader = %short_hex(&notify.leader),
            turn = %notify.consensus_turn,
            "Leader set"
        );
        self.stop_process();
        self.req_cache.set_cur_turn(notify.consensus_turn);
        self.leader = Some(notify);
        self.start_req_verify_common().await
    }

    async fn handle_request(&mut self, from: Address, request: BlockRequest) -> ConsensusResult<()> {
        if request.header.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: request.header.number,
                current: self.number,
            });
        }
        self.req_cache
            .add_request(ProposalRecord::from_request(request), from)?;
        self.start_req_verify_common().await
    }

    async fn handle_local_request(&mut self, local: LocalBlockRequest) -> ConsensusResult<()> {
        if local.request.header.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: local.request.header.number,
                current: self.number,
            });
        }
        let self_address = self.ports.signer.address();
        self.req_cache
            .add_request(ProposalRecord::from_local(local), self_address)?;
        self.start_req_verify_common().await
    }

    /// Replaces the votes of a cached proposal with the signatures of a
    /// header whose POS finished elsewhere, then resumes verification.
    async fn handle_recovery(&mut self, header: BlockHeader) -> ConsensusResult<()> {
        if header.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: header.number,
                current: self.number,
            });
        }
        let fingerprint = header.fingerprint();
        let mut votes = HashMap::new();
        for sig in &header.signatures {
            match self.ports.signer.recover(&fingerprint, sig) {
                Some(signer) => {
                    votes.insert(signer, *sig);
                }
                None => debug!(number = self.number, "Recovered signature unreadable"),
            }
        }
        let record = self
            .req_cache
            .get_req_by_hash_mut(&fingerprint)
            .ok_or(ConsensusError::RequestNotFound)?;
        info!(
            number = self.number,
            hash = %short_hex(&fingerprint),
            votes = votes.len(),
            "Votes reset from a finished header"
        );
        record.votes = votes;

        if self.current == Some(fingerprint) {
            self.process_dpos_once().await
        } else {
            self.start_req_verify_common().await
        }
    }

    /// Abandons the current proposal and every pending send.
    fn stop_process(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.tx_seq += 1;
        self.vote_sender = None;
        self.mining_sender = None;
        self.posed_sender = None;
        self.current = None;
        self.pos_finished = false;
        if self.state != ProcessState::Idle {
            self.state = ProcessState::Start;
        }
    }

    async fn publish(&self, event: ConsensusEvent) {
        let name = event.name();
        if let Err(e) = self.ports.event_bus.publish(event).await {
            warn!(number = self.number, event = name, error = %e, "Failed to publish event");
        }
    }

    /// Sends `message` to `target` now and then every `interval`.
    fn start_sender(
        &self,
        name: &'static str,
        message: ConsensusMessage,
        target: Target,
        interval: std::time::Duration,
        max_times: u32,
    ) -> RetrySender {
        let transport = self.ports.transport.clone();
        let number = self.number;
        RetrySender::start(
            name,
            message,
            move |msg, times| {
                if let Err(e) = transport.send(msg.clone(), target.clone()) {
                    warn!(number, sender = name, times, error = %e, "Resend failed");
                }
            },
            interval,
            max_times,
        )
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
