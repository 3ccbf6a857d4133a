//! # Reelection Controller
//!
//! Per-height state machine that decides who may lead the current turn.
//!
//! ```text
//! Idle ──start──→ Pos ──POS finished──→ Mining
//!   │              │                      │
//!   │              └──timeout──→ Reelect ←┘ (timeout)
//!   │                              │
//!   │              ←── leader-change result (new consensus turn)
//!   └──start on broadcast/election height──→ Waiting
//! ```
//!
//! All inputs (messages, notifications and its own timers) arrive through
//! one inbox, so the controller never needs a lock.

mod inquiry;
mod rounds;

use super::cdc::ConsensusDataContext;
use super::master_cache::{MasterCache, VoteRound};
use super::msg_pool::ReelectMsgPool;
use crate::domain::{
    BlockHeader, ConsensusConfig, ConsensusError, ConsensusMessage, ConsensusResult, InquiryReq,
    Target, TurnState, TurnStateInfo,
};
use crate::events::{ConsensusEvent, PosFinishedNotify};
use crate::metrics;
use crate::ports::ConsensusPorts;
use shared_types::{short_hex, Address, Hash, Role, Signature};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inputs of a controller.
#[derive(Clone, Debug)]
pub enum ControllerInput {
    /// Parent header of this height; starts (or restarts) the height.
    Start(BlockHeader),
    PosFinished(PosFinishedNotify),
    /// Turn timer fired (timer generation).
    Timeout(u64),
    /// Master re-drive timer fired (timer generation).
    ReelectTimeout(u64),
    Network {
        from: Address,
        message: ConsensusMessage,
    },
}

impl ControllerInput {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerInput::Start(_) => "start",
            ControllerInput::PosFinished(_) => "pos_finished",
            ControllerInput::Timeout(_) => "timeout",
            ControllerInput::ReelectTimeout(_) => "reelect_timeout",
            ControllerInput::Network { message, .. } => message.name(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    /// Broadcast or election height, no rotating leader.
    Waiting,
    Pos,
    Mining,
    Reelect,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Waiting => "waiting",
            ControllerState::Pos => "pos",
            ControllerState::Mining => "mining",
            ControllerState::Reelect => "reelect",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Clears `slot` if it holds the timer of `generation`.
fn take_fired(slot: &mut Option<ArmedTimer>, generation: u64) -> bool {
    if slot.as_ref().map(|t| t.generation) == Some(generation) {
        *slot = None;
        true
    } else {
        false
    }
}

pub struct Controller {
    number: u64,
    state: ControllerState,
    cdc: ConsensusDataContext,
    msg_pool: ReelectMsgPool,
    master: MasterCache,
    ports: ConsensusPorts,
    inbox: mpsc::Sender<ControllerInput>,
    timer: Option<ArmedTimer>,
    reelect_timer: Option<ArmedTimer>,
    generation: u64,
}

impl Controller {
    /// `inbox` is the sender side of the channel this controller reads;
    /// timers post into it.
    pub fn new(
        number: u64,
        ports: ConsensusPorts,
        config: Arc<ConsensusConfig>,
        inbox: mpsc::Sender<ControllerInput>,
    ) -> Self {
        let cdc = ConsensusDataContext::new(
            number,
            ports.signer.address(),
            config.default_leader_timing,
        );
        Self {
            number,
            state: ControllerState::Idle,
            cdc,
            msg_pool: ReelectMsgPool::new(),
            master: MasterCache::default(),
            ports,
            inbox,
            timer: None,
            reelect_timer: None,
            generation: 0,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn cdc(&self) -> &ConsensusDataContext {
        &self.cdc
    }

    /// Processes inputs until the inbox closes or the task is aborted.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<ControllerInput>) {
        while let Some(input) = inbox.recv().await {
            let name = input.name();
            if let Err(e) = self.handle(input).await {
                debug!(
                    number = self.number,
                    state = %self.state,
                    input = name,
                    error = %e,
                    "Controller dropped input"
                );
            }
        }
    }

    pub async fn handle(&mut self, input: ControllerInput) -> ConsensusResult<()> {
        match input {
            ControllerInput::Start(parent) => self.handle_start(parent).await,
            ControllerInput::PosFinished(notify) => self.handle_pos_finished(notify),
            ControllerInput::Timeout(generation) => self.handle_timeout(generation).await,
            ControllerInput::ReelectTimeout(generation) => self.handle_reelect_timeout(generation),
            ControllerInput::Network { from, message } => match message {
                ConsensusMessage::InquiryReq(req) => self.handle_inquiry_req(from, req),
                ConsensusMessage::InquiryRsp(rsp) => self.handle_inquiry_rsp(from, rsp).await,
                ConsensusMessage::ReelectReq(req) => self.handle_rl_req(from, req),
                ConsensusMessage::ReelectVote(vote) => self.handle_rl_vote(from, vote),
                ConsensusMessage::ResultBroadcast(msg) => self.handle_broadcast(from, msg).await,
                ConsensusMessage::BroadcastRsp(vote) => self.handle_broadcast_rsp(from, vote).await,
                other => Err(ConsensusError::RoundMismatch(format!(
                    "controller does not handle {}",
                    other.name()
                ))),
            },
        }
    }

    async fn handle_start(&mut self, parent: BlockHeader) -> ConsensusResult<()> {
        if parent.number.saturating_add(1) != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: parent.number.saturating_add(1),
                current: self.number,
            });
        }
        if let Some(cached) = self.msg_pool.parent_header() {
            if cached.hash() == parent.hash() {
                return Ok(());
            }
            if parent.timestamp <= cached.timestamp {
                return Err(ConsensusError::IllegalBeginTime {
                    current: cached.timestamp,
                    requested: parent.timestamp,
                });
            }
        }

        // A newer parent for the same height restarts everything
        self.timer = None;
        self.reelect_timer = None;
        self.master.reset_rounds();
        self.msg_pool = ReelectMsgPool::new();
        self.state = ControllerState::Idle;

        self.cdc
            .analysis_state(&parent, self.ports.chain.as_ref(), self.ports.election.as_ref())?;
        self.cdc.set_begin_time(parent.timestamp)?;
        self.msg_pool.save_parent_header(parent);

        if self.cdc.role() != Role::Validator {
            debug!(number = self.number, role = %self.cdc.role(), "Not a validator, controller idle");
            return Ok(());
        }
        if self.cdc.is_special_number() {
            self.state = ControllerState::Waiting;
            info!(number = self.number, "Special height, no leader rotation");
            return self.publish_leader_msg().await;
        }

        let info = self.cdc.cal_state(self.now());
        self.enter_turn(info).await
    }

    /// Enters the current consensus turn at the point `info` describes.
    async fn enter_turn(&mut self, info: TurnStateInfo) -> ConsensusResult<()> {
        self.arm_timer(info.remain);
        match info.state {
            TurnState::PosWait => {
                self.state = ControllerState::Pos;
                self.process_pos_state();
                self.publish_leader_msg().await
            }
            TurnState::ReelectWait => self.start_reelect(info.reelect_turn).await,
        }
    }

    fn handle_pos_finished(&mut self, notify: PosFinishedNotify) -> ConsensusResult<()> {
        if notify.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: notify.number,
                current: self.number,
            });
        }
        if !self.msg_pool.save_pos_notify(notify) {
            return Ok(());
        }
        self.process_pos_state();
        Ok(())
    }

    fn process_pos_state(&mut self) {
        if self.state != ControllerState::Pos {
            return;
        }
        let turn = self.cdc.consensus_turn();
        let leader = self.cdc.consensus_leader();
        if self.msg_pool.pos_notify(turn, &leader).is_some() {
            self.state = ControllerState::Mining;
            info!(
                number = self.number,
                turn = %turn,
                leader = %short_hex(&leader),
                "POS finished, waiting for the block"
            );
        }
    }

    async fn handle_timeout(&mut self, generation: u64) -> ConsensusResult<()> {
        if !take_fired(&mut self.timer, generation) {
            return Ok(());
        }
        if !matches!(
            self.state,
            ControllerState::Pos | ControllerState::Mining | ControllerState::Reelect
        ) {
            return Ok(());
        }

        let info = self.cdc.cal_state(self.now());
        self.arm_timer(info.remain);
        match info.state {
            TurnState::PosWait => {
                debug!(number = self.number, remain = info.remain, "Turn timer fired early");
                Ok(())
            }
            TurnState::ReelectWait => {
                info!(
                    number = self.number,
                    state = %self.state,
                    turn = %self.cdc.consensus_turn(),
                    reelect_turn = info.reelect_turn,
                    "Turn timed out"
                );
                self.start_reelect(info.reelect_turn).await
            }
        }
    }

    async fn start_reelect(&mut self, reelect_turn: u32) -> ConsensusResult<()> {
        if self.state == ControllerState::Reelect && self.cdc.reelect_turn() == reelect_turn {
            return Ok(());
        }
        self.state = ControllerState::Reelect;
        self.cdc.set_reelect_turn(reelect_turn)?;
        self.master.reset_rounds();
        self.reelect_timer = None;
        metrics::record_reelection("started");

        info!(
            number = self.number,
            turn = %self.cdc.consensus_turn(),
            reelect_turn,
            master = %short_hex(&self.cdc.reelect_master()),
            "Reelection started"
        );

        if self.cdc.is_self_master() {
            self.arm_reelect_timer();
            self.send_inquiry_req()?;
        }
        self.publish_leader_msg().await
    }

    fn handle_reelect_timeout(&mut self, generation: u64) -> ConsensusResult<()> {
        if !take_fired(&mut self.reelect_timer, generation) {
            return Ok(());
        }
        if self.state != ControllerState::Reelect || !self.cdc.is_self_master() {
            return Ok(());
        }
        self.arm_reelect_timer();

        // Re-drive whichever round is furthest along
        if let Some(round) = &self.master.broadcast {
            self.send(
                ConsensusMessage::ResultBroadcast(round.msg.clone()),
                Target::role(Role::Validator),
            );
            Ok(())
        } else if let Some(round) = &self.master.rl_req {
            self.send(
                ConsensusMessage::ReelectReq(round.msg.clone()),
                Target::role(Role::Validator),
            );
            Ok(())
        } else {
            self.send_inquiry_req()
        }
    }

    /// Starts a fresh inquiry round as master.
    fn send_inquiry_req(&mut self) -> ConsensusResult<()> {
        let req = self.build_inquiry();
        let hash = req.hash();
        let mut round = VoteRound::new(hash, req.clone());
        round.add_vote(self.cdc.self_address(), self.sign(&hash)?)?;
        self.master.inquiry = Some(round);

        debug!(
            number = self.number,
            reelect_turn = req.reelect_turn,
            hash = %short_hex(&hash),
            "Inquiry sent"
        );
        self.send(ConsensusMessage::InquiryReq(req), Target::role(Role::Validator));
        Ok(())
    }

    fn build_inquiry(&self) -> InquiryReq {
        InquiryReq {
            master: self.cdc.self_address(),
            number: self.number,
            header_time: self
                .msg_pool
                .parent_header()
                .map(|h| h.timestamp)
                .unwrap_or_default(),
            consensus_turn: self.cdc.consensus_turn(),
            reelect_turn: self.cdc.reelect_turn(),
            timestamp: self.now(),
        }
    }

    async fn publish_leader_msg(&self) -> ConsensusResult<()> {
        let msg = self
            .cdc
            .prepare_leader_msg(self.state != ControllerState::Reelect)?;
        info!(
            number = msg.number,
            consensus_state = msg.consensus_state,
            leader = %short_hex(&msg.leader),
            next_leader = %short_hex(&msg.next_leader),
            turn = %msg.consensus_turn,
            reelect_turn = msg.reelect_turn,
            "Leader change"
        );
        metrics::record_leader_change();
        self.publish(ConsensusEvent::LeaderChange(msg)).await;
        Ok(())
    }

    async fn publish(&self, event: ConsensusEvent) {
        let name = event.name();
        if let Err(e) = self.ports.event_bus.publish(event).await {
            warn!(number = self.number, event = name, error = %e, "Failed to publish event");
        }
    }

    fn send(&self, message: ConsensusMessage, target: Target) {
        let name = message.name();
        if let Err(e) = self.ports.transport.send(message, target) {
            warn!(number = self.number, message = name, error = %e, "Failed to send message");
        }
    }

    fn sign(&self, hash: &Hash) -> ConsensusResult<Signature> {
        self.ports.signer.sign(hash).map_err(ConsensusError::Signer)
    }

    /// Checks that `signature` over `hash` was made by `from`.
    fn verify_signer(&self, hash: &Hash, signature: &Signature, from: &Address) -> ConsensusResult<()> {
        let signer = self
            .ports
            .signer
            .recover(hash, signature)
            .ok_or(ConsensusError::SignerRecoveryFailed)?;
        if &signer != from {
            return Err(ConsensusError::SignerMismatch {
                claimed: *from,
                recovered: signer,
            });
        }
        Ok(())
    }

    fn check_quorum(&self, hash: &Hash, signatures: &[Signature]) -> ConsensusResult<Vec<Signature>> {
        self.cdc
            .check_quorum(self.ports.quorum.as_ref(), hash, signatures)
    }

    fn now(&self) -> u64 {
        self.ports.time.now()
    }

    fn arm_timer(&mut self, secs: u64) {
        self.timer = Some(self.spawn_timer(secs, ControllerInput::Timeout));
    }

    fn arm_reelect_timer(&mut self) {
        let secs = self.cdc.timing().reelect_handle_interval;
        self.reelect_timer = Some(self.spawn_timer(secs, ControllerInput::ReelectTimeout));
    }

    /// Timers wait at least one second.
    fn spawn_timer(&mut self, secs: u64, input: fn(u64) -> ControllerInput) -> ArmedTimer {
        self.generation += 1;
        let generation = self.generation;
        let inbox = self.inbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs.max(1))).await;
            let _ = inbox.send(input(generation)).await;
        });
        ArmedTimer { generation, handle }
    }
}
