//! Inquiry handling.
//!
//! A node only answers an inquiry that matches its own view (height,
//! parent time and consensus turn). A requester that is behind is told
//! what it missed; a requester that is ahead gets a single inquiry back so
//! this node can catch up.

use super::{Controller, ControllerState};
use crate::domain::{
    BroadcastResult, ConsensusError, ConsensusMessage, ConsensusResult, InquiryAnswer,
    InquiryReq, InquiryRsp, Target,
};
use crate::events::{ConsensusEvent, RecoveryKind, RecoveryStateRequest};
use crate::reelection::master_cache::InquiryResult;
use shared_types::{short_hex, Address, Hash, Signature};
use std::cmp::Ordering;
use tracing::{debug, info};

impl Controller {
    pub(super) fn handle_inquiry_req(&mut self, from: Address, req: InquiryReq) -> ConsensusResult<()> {
        if self.state == ControllerState::Idle {
            return Err(ConsensusError::StateMismatch {
                expected: "running",
                actual: self.state.as_str(),
            });
        }
        if req.master != from {
            return Err(ConsensusError::MasterMismatch {
                expected: from,
                actual: req.master,
            });
        }
        let Some(parent) = self.msg_pool.parent_header().cloned() else {
            return Err(ConsensusError::StateMismatch {
                expected: "started",
                actual: self.state.as_str(),
            });
        };
        let req_hash = req.hash();

        match req.number.cmp(&self.number) {
            Ordering::Less => {
                self.answer_inquiry(from, req_hash, InquiryAnswer::NewBlockReady { header: parent });
                return Ok(());
            }
            Ordering::Greater => return self.send_single_inquiry(from),
            Ordering::Equal => {}
        }
        match req.header_time.cmp(&parent.timestamp) {
            Ordering::Less => {
                self.answer_inquiry(from, req_hash, InquiryAnswer::NewBlockReady { header: parent });
                return Ok(());
            }
            Ordering::Greater => return self.send_single_inquiry(from),
            Ordering::Equal => {}
        }
        if self.state == ControllerState::Waiting {
            return Err(ConsensusError::StateMismatch {
                expected: "pos or reelect",
                actual: self.state.as_str(),
            });
        }

        let turn = self.cdc.consensus_turn();
        match req.consensus_turn.cmp(&turn) {
            Ordering::Less => {
                let result = self.msg_pool.rl_consensus(turn).cloned().ok_or_else(|| {
                    ConsensusError::RoundMismatch(format!("no leader-change result for turn {turn}"))
                })?;
                self.answer_inquiry(from, req_hash, InquiryAnswer::AlreadyReelected { result });
                return Ok(());
            }
            Ordering::Greater => return self.send_single_inquiry(from),
            Ordering::Equal => {}
        }

        let expected = self
            .cdc
            .get_leader(turn.total().saturating_add(req.reelect_turn))?
            .leader;
        if expected != req.master {
            return Err(ConsensusError::MasterMismatch {
                expected,
                actual: req.master,
            });
        }

        let leader = self.cdc.consensus_leader();
        if let Some(notify) = self.msg_pool.pos_notify(turn, &leader) {
            let answer = InquiryAnswer::PosComplete {
                header: notify.header.clone(),
                consensus_turn: turn,
            };
            self.answer_inquiry(from, req_hash, answer);
            return Ok(());
        }

        if self.state != ControllerState::Reelect {
            return Err(ConsensusError::StateMismatch {
                expected: "reelect",
                actual: self.state.as_str(),
            });
        }
        if req.reelect_turn != self.cdc.reelect_turn() {
            return Err(ConsensusError::RoundMismatch(format!(
                "reelect turn {} != local {}",
                req.reelect_turn,
                self.cdc.reelect_turn()
            )));
        }
        self.cdc.check_time_legal(req.reelect_turn, req.timestamp)?;

        let signature = self.sign(&req_hash)?;
        self.answer_inquiry(from, req_hash, InquiryAnswer::Agree { signature });
        Ok(())
    }

    fn answer_inquiry(&self, to: Address, req_hash: Hash, answer: InquiryAnswer) {
        debug!(
            number = self.number,
            to = %short_hex(&to),
            answer = answer.name(),
            "Answering inquiry"
        );
        let rsp = InquiryRsp {
            req_hash,
            from: self.cdc.self_address(),
            number: self.number,
            answer,
        };
        self.send(ConsensusMessage::InquiryRsp(rsp), Target::Peer(to));
    }

    /// Asks a peer that looks ahead of us for its view, at most once per
    /// reelect handle interval.
    pub(super) fn send_single_inquiry(&mut self, to: Address) -> ConsensusResult<()> {
        if self.cdc.is_self_master() {
            return Ok(());
        }
        let now = self.now();
        let interval = self.cdc.timing().reelect_handle_interval;
        let last = self.master.last_single_inquiry_at;
        if last != 0 && now < last.saturating_add(interval) {
            debug!(number = self.number, to = %short_hex(&to), "Single inquiry rate limited");
            return Ok(());
        }

        let req = self.build_inquiry();
        self.master.single_inquiry = Some(req.hash());
        self.master.last_single_inquiry_at = now;
        info!(number = self.number, to = %short_hex(&to), "Peer looks ahead, sending single inquiry");
        self.send(ConsensusMessage::InquiryReq(req), Target::Peer(to));
        Ok(())
    }

    pub(super) async fn handle_inquiry_rsp(&mut self, from: Address, rsp: InquiryRsp) -> ConsensusResult<()> {
        if self.state == ControllerState::Idle {
            return Err(ConsensusError::StateMismatch {
                expected: "running",
                actual: self.state.as_str(),
            });
        }
        if rsp.from != from {
            return Err(ConsensusError::SignerMismatch {
                claimed: rsp.from,
                recovered: from,
            });
        }
        if !self.master.matches_inquiry(&rsp.req_hash) {
            return Err(ConsensusError::StaleRequestHash);
        }
        let master_round = self.cdc.is_self_master()
            && self.master.inquiry.as_ref().map(|r| r.hash) == Some(rsp.req_hash);

        match rsp.answer {
            InquiryAnswer::NewBlockReady { header } => {
                if header.number.saturating_add(1) < self.number {
                    return Err(ConsensusError::IllegalNumber {
                        number: header.number,
                        current: self.number,
                    });
                }
                self.ports
                    .quorum
                    .verify_block(&header)
                    .map_err(ConsensusError::QuorumFailed)?;
                info!(
                    number = self.number,
                    from = %short_hex(&from),
                    header_number = header.number,
                    "Peer has a newer block, requesting recovery"
                );
                self.publish(ConsensusEvent::RecoveryState(RecoveryStateRequest {
                    kind: RecoveryKind::FullHeader,
                    header,
                    from,
                }))
                .await;
                Ok(())
            }
            InquiryAnswer::AlreadyReelected { result } => {
                if master_round && self.master.inquiry_result != InquiryResult::None {
                    return Ok(());
                }
                let newer = self.check_rl_result(&result)?;
                if master_round {
                    self.master.inquiry_result = InquiryResult::AlreadyReelected;
                    return self.start_result_broadcast(BroadcastResult::Reelected(result));
                }
                if newer {
                    self.finish_reelect_with_rl_consensus(result).await?;
                }
                Ok(())
            }
            InquiryAnswer::PosComplete {
                header,
                consensus_turn,
            } => {
                if master_round && self.master.inquiry_result != InquiryResult::None {
                    return Ok(());
                }
                self.check_pos_result(&header, consensus_turn)?;
                if master_round {
                    self.master.inquiry_result = InquiryResult::Pos;
                    return self.start_result_broadcast(BroadcastResult::Pos {
                        header,
                        consensus_turn,
                    });
                }
                self.finish_reelect_with_pos(header, from).await
            }
            InquiryAnswer::Agree { signature } => {
                if !master_round {
                    return Err(ConsensusError::StaleRequestHash);
                }
                self.handle_agree(from, rsp.req_hash, signature)
            }
        }
    }

    fn handle_agree(&mut self, from: Address, req_hash: Hash, signature: Signature) -> ConsensusResult<()> {
        if self.state != ControllerState::Reelect {
            return Err(ConsensusError::StateMismatch {
                expected: "reelect",
                actual: self.state.as_str(),
            });
        }
        if self.master.inquiry_result != InquiryResult::None {
            return Ok(());
        }
        self.verify_signer(&req_hash, &signature, &from)?;

        let Some(round) = self.master.inquiry.as_mut() else {
            return Err(ConsensusError::StaleRequestHash);
        };
        round.add_vote(from, signature)?;
        let signatures = round.signatures();
        let inquiry = round.msg.clone();

        let agree_signs = match self.check_quorum(&req_hash, &signatures) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(number = self.number, votes = signatures.len(), reason = %e, "Waiting for agree votes");
                return Ok(());
            }
        };

        self.master.inquiry_result = InquiryResult::Agree;
        info!(
            number = self.number,
            reelect_turn = inquiry.reelect_turn,
            votes = agree_signs.len(),
            "Agree quorum reached, requesting leader change"
        );
        self.send_rl_req(inquiry, agree_signs)
    }
}
