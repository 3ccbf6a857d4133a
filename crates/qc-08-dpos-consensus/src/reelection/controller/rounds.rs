//! Leader-change request, result broadcast and adoption of settled results.

use super::{Controller, ControllerState};
use crate::domain::{
    BlockHeader, BroadcastResult, ConsensusError, ConsensusMessage, ConsensusResult,
    ConsensusTurn, InquiryReq, ReelectConsensus, ReelectLeaderReq, ResultBroadcast, Target,
    VoteMsg,
};
use crate::events::{ConsensusEvent, RecoveryKind, RecoveryStateRequest};
use crate::metrics;
use crate::reelection::master_cache::VoteRound;
use shared_types::{short_hex, Address, Role, Signature};
use tracing::{debug, info};

impl Controller {
    pub(super) fn send_rl_req(&mut self, inquiry: InquiryReq, agree_signs: Vec<Signature>) -> ConsensusResult<()> {
        let req = ReelectLeaderReq {
            inquiry,
            agree_signs,
            timestamp: self.now(),
        };
        let hash = req.hash();
        let mut round = VoteRound::new(hash, req.clone());
        round.add_vote(self.cdc.self_address(), self.sign(&hash)?)?;
        self.master.rl_req = Some(round);
        self.send(ConsensusMessage::ReelectReq(req), Target::role(Role::Validator));
        Ok(())
    }

    pub(super) fn handle_rl_req(&mut self, from: Address, req: ReelectLeaderReq) -> ConsensusResult<()> {
        if self.state != ControllerState::Reelect {
            return Err(ConsensusError::StateMismatch {
                expected: "reelect",
                actual: self.state.as_str(),
            });
        }
        let inquiry = &req.inquiry;
        if inquiry.master != from || self.cdc.reelect_master() != from {
            return Err(ConsensusError::MasterMismatch {
                expected: self.cdc.reelect_master(),
                actual: from,
            });
        }
        if inquiry.number != self.number
            || inquiry.consensus_turn != self.cdc.consensus_turn()
            || inquiry.reelect_turn != self.cdc.reelect_turn()
        {
            return Err(ConsensusError::RoundMismatch(format!(
                "request for turn {} reelect {} at height {}",
                inquiry.consensus_turn, inquiry.reelect_turn, inquiry.number
            )));
        }
        if req.timestamp < inquiry.timestamp {
            return Err(ConsensusError::RoundMismatch(
                "leader-change request older than its inquiry".to_string(),
            ));
        }
        self.cdc.check_time_legal(inquiry.reelect_turn, req.timestamp)?;
        self.check_quorum(&inquiry.hash(), &req.agree_signs)?;

        let hash = req.hash();
        let vote = VoteMsg {
            sign_hash: hash,
            signature: self.sign(&hash)?,
            from: self.cdc.self_address(),
            number: self.number,
        };
        debug!(number = self.number, master = %short_hex(&from), "Voting for leader change");
        self.send(ConsensusMessage::ReelectVote(vote), Target::Peer(from));
        Ok(())
    }

    pub(super) fn handle_rl_vote(&mut self, from: Address, vote: VoteMsg) -> ConsensusResult<()> {
        if self.state != ControllerState::Reelect || !self.cdc.is_self_master() {
            return Err(ConsensusError::StateMismatch {
                expected: "reelect master",
                actual: self.state.as_str(),
            });
        }
        if self.master.broadcast.is_some() {
            return Ok(());
        }
        self.verify_signer(&vote.sign_hash, &vote.signature, &from)?;

        let Some(round) = self
            .master
            .rl_req
            .as_mut()
            .filter(|r| r.hash == vote.sign_hash)
        else {
            return Err(ConsensusError::StaleRequestHash);
        };
        round.add_vote(from, vote.signature)?;
        let signatures = round.signatures();
        let req = round.msg.clone();

        let votes = match self.check_quorum(&vote.sign_hash, &signatures) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(number = self.number, votes = signatures.len(), reason = %e, "Waiting for leader-change votes");
                return Ok(());
            }
        };
        info!(number = self.number, votes = votes.len(), "Leader-change votes reached quorum");
        self.start_result_broadcast(BroadcastResult::Reelected(ReelectConsensus { req, votes }))
    }

    pub(super) fn start_result_broadcast(&mut self, result: BroadcastResult) -> ConsensusResult<()> {
        let msg = ResultBroadcast {
            from: self.cdc.self_address(),
            number: self.number,
            result,
            timestamp: self.now(),
        };
        let hash = msg.hash();
        let mut round = VoteRound::new(hash, msg.clone());
        round.add_vote(self.cdc.self_address(), self.sign(&hash)?)?;
        self.master.broadcast = Some(round);
        self.send(ConsensusMessage::ResultBroadcast(msg), Target::role(Role::Validator));
        Ok(())
    }

    pub(super) async fn handle_broadcast(&mut self, from: Address, msg: ResultBroadcast) -> ConsensusResult<()> {
        if matches!(self.state, ControllerState::Idle | ControllerState::Waiting) {
            return Err(ConsensusError::StateMismatch {
                expected: "running",
                actual: self.state.as_str(),
            });
        }
        if msg.from != from {
            return Err(ConsensusError::MasterMismatch {
                expected: from,
                actual: msg.from,
            });
        }
        if msg.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: msg.number,
                current: self.number,
            });
        }
        let hash = msg.hash();
        self.process_result(msg.result, from).await?;

        let rsp = VoteMsg {
            sign_hash: hash,
            signature: self.sign(&hash)?,
            from: self.cdc.self_address(),
            number: self.number,
        };
        self.send(ConsensusMessage::BroadcastRsp(rsp), Target::Peer(from));
        Ok(())
    }

    pub(super) async fn handle_broadcast_rsp(&mut self, from: Address, vote: VoteMsg) -> ConsensusResult<()> {
        if self.state != ControllerState::Reelect || !self.cdc.is_self_master() {
            return Err(ConsensusError::StateMismatch {
                expected: "reelect master",
                actual: self.state.as_str(),
            });
        }
        self.verify_signer(&vote.sign_hash, &vote.signature, &from)?;

        let Some(round) = self
            .master
            .broadcast
            .as_mut()
            .filter(|r| r.hash == vote.sign_hash)
        else {
            return Err(ConsensusError::StaleRequestHash);
        };
        round.add_vote(from, vote.signature)?;
        let signatures = round.signatures();
        let result = round.msg.result.clone();

        if let Err(e) = self.check_quorum(&vote.sign_hash, &signatures) {
            debug!(number = self.number, votes = signatures.len(), reason = %e, "Waiting for broadcast responses");
            return Ok(());
        }
        let self_address = self.cdc.self_address();
        self.process_result(result, self_address).await
    }

    /// Applies a settled result. Results already adopted are accepted
    /// without effect.
    async fn process_result(&mut self, result: BroadcastResult, from: Address) -> ConsensusResult<()> {
        match result {
            BroadcastResult::Pos {
                header,
                consensus_turn,
            } => {
                self.check_pos_result(&header, consensus_turn)?;
                self.finish_reelect_with_pos(header, from).await
            }
            BroadcastResult::Reelected(result) => {
                if self.check_rl_result(&result)? {
                    self.finish_reelect_with_rl_consensus(result).await?;
                }
                Ok(())
            }
        }
    }

    /// Validates a leader-change result. Returns whether it moves this
    /// height to a newer consensus turn.
    pub(super) fn check_rl_result(&self, result: &ReelectConsensus) -> ConsensusResult<bool> {
        let inquiry = &result.req.inquiry;
        if inquiry.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: inquiry.number,
                current: self.number,
            });
        }
        if inquiry.reelect_turn == 0 {
            return Err(ConsensusError::RoundMismatch(
                "leader-change result without reelect turn".to_string(),
            ));
        }
        let new_turn = inquiry.consensus_turn.after_reelection(inquiry.reelect_turn);
        let local = self.cdc.consensus_turn();
        if new_turn < local {
            return Err(ConsensusError::RoundMismatch(format!(
                "stale leader-change result {new_turn} < {local}"
            )));
        }

        let expected = self
            .cdc
            .get_leader(inquiry.consensus_turn.total().saturating_add(inquiry.reelect_turn))?
            .leader;
        if expected != inquiry.master {
            return Err(ConsensusError::MasterMismatch {
                expected,
                actual: inquiry.master,
            });
        }
        self.check_quorum(&inquiry.hash(), &result.req.agree_signs)?;
        self.check_quorum(&result.req.hash(), &result.votes)?;
        Ok(new_turn > local)
    }

    /// Validates a finished POS of the current turn.
    pub(super) fn check_pos_result(&self, header: &BlockHeader, turn: ConsensusTurn) -> ConsensusResult<()> {
        if header.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: header.number,
                current: self.number,
            });
        }
        if turn != self.cdc.consensus_turn() {
            return Err(ConsensusError::RoundMismatch(format!(
                "POS result for turn {turn}, local turn {}",
                self.cdc.consensus_turn()
            )));
        }
        if header.parent_hash != self.cdc.parent_hash() {
            return Err(ConsensusError::RoundMismatch(
                "POS result built on another parent".to_string(),
            ));
        }
        let expected = self.cdc.consensus_leader();
        if header.leader != expected {
            return Err(ConsensusError::MasterMismatch {
                expected,
                actual: header.leader,
            });
        }
        self.check_quorum(&header.fingerprint(), &header.signatures)
            .map(|_| ())
    }

    pub(super) async fn finish_reelect_with_pos(&mut self, header: BlockHeader, from: Address) -> ConsensusResult<()> {
        if self.state == ControllerState::Mining {
            return Ok(());
        }
        info!(
            number = self.number,
            turn = %self.cdc.consensus_turn(),
            from = %short_hex(&from),
            "Reelection settled by a finished POS"
        );
        metrics::record_reelection("pos");

        self.reelect_timer = None;
        self.master.reset_rounds();
        self.cdc.set_reelect_turn(0)?;
        self.state = ControllerState::Mining;

        self.publish(ConsensusEvent::RecoveryState(RecoveryStateRequest {
            kind: RecoveryKind::Pos,
            header,
            from,
        }))
        .await;
        self.publish_leader_msg().await
    }

    pub(super) async fn finish_reelect_with_rl_consensus(&mut self, result: ReelectConsensus) -> ConsensusResult<()> {
        let inquiry = &result.req.inquiry;
        let new_turn = inquiry.consensus_turn.after_reelection(inquiry.reelect_turn);
        info!(
            number = self.number,
            from_turn = %self.cdc.consensus_turn(),
            to_turn = %new_turn,
            leader = %short_hex(&inquiry.master),
            "Leader changed by reelection"
        );
        metrics::record_reelection("reelected");

        self.reelect_timer = None;
        self.master.reset_rounds();
        self.cdc.set_consensus_turn(new_turn)?;
        self.msg_pool.save_rl_consensus(new_turn, result);

        let info = self.cdc.cal_state(self.now());
        self.enter_turn(info).await
    }
}
