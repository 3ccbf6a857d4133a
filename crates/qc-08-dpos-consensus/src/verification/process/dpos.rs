//! Vote collection and the end of a verification round.

use super::{Process, ProcessState};
use crate::domain::{
    BlockHeader, BlockRequest, ConsensusError, ConsensusMessage, ConsensusResult, ConsensusTurn, MiningRequest,
    Target, VerifyResult, VoteMsg,
};
use crate::events::{BlockVerifiedEvent, ConsensusEvent, PosFinishedNotify};
use crate::metrics;
use shared_types::{short_hex, Hash, Role, Signature};
use tracing::{debug, error, info, warn};

impl Process {
    /// Records the local verdict; on success signs, votes and announces
    /// the verified block, then waits for quorum.
    pub(super) async fn start_dpos_verify(&mut self, result: VerifyResult) -> ConsensusResult<()> {
        let Some(fingerprint) = self.current else {
            return Ok(());
        };
        let record = self
            .req_cache
            .get_req_by_hash_mut(&fingerprint)
            .ok_or(ConsensusError::RequestNotFound)?;
        record.verify_result = result;
        let record = record.clone();

        metrics::record_proposal_verified(result.as_str());
        info!(
            number = self.number,
            hash = %short_hex(&fingerprint),
            %result,
            "Local verification finished"
        );

        if self.role == Role::Broadcast {
            if result == VerifyResult::Success {
                self.publish(ConsensusEvent::BlockVerified(BlockVerifiedEvent {
                    header: record.request.header.clone(),
                    consensus_turn: record.request.consensus_turn,
                    transactions: record.transactions,
                    receipts: record.receipts,
                    is_broadcast: true,
                }))
                .await;
            }
            self.bc_finished(
                fingerprint,
                result,
                record.request.header,
                record.request.consensus_turn,
            )
            .await;
            return Ok(());
        }

        if result == VerifyResult::Success {
            let self_address = self.ports.signer.address();
            let signature = self
                .ports
                .signer
                .sign(&fingerprint)
                .map_err(ConsensusError::Signer)?;
            if let Some(record) = self.req_cache.get_req_by_hash_mut(&fingerprint) {
                record.votes.insert(self_address, signature);
            }

            let vote = VoteMsg {
                sign_hash: fingerprint,
                signature,
                from: self_address,
                number: self.number,
            };
            self.vote_sender = Some(self.start_sender(
                "block_vote",
                ConsensusMessage::BlockVote(vote),
                Target::role(Role::Validator),
                self.config.vote_send_interval,
                self.config.vote_send_times,
            ));

            self.publish(ConsensusEvent::BlockVerified(BlockVerifiedEvent {
                header: record.request.header.clone(),
                consensus_turn: record.request.consensus_turn,
                transactions: record.transactions,
                receipts: record.receipts,
                is_broadcast: false,
            }))
            .await;
        }

        self.state = ProcessState::DposVerify;
        let pooled = self.vote_pool.get_votes(&fingerprint);
        if let Some(record) = self.req_cache.get_req_by_hash_mut(&fingerprint) {
            for vote in pooled {
                record.votes.entry(vote.signer).or_insert(vote.signature);
            }
        }
        self.process_dpos_once().await
    }

    pub(super) async fn handle_vote(&mut self, vote: VoteMsg) -> ConsensusResult<()> {
        if vote.number != self.number {
            return Err(ConsensusError::IllegalNumber {
                number: vote.number,
                current: self.number,
            });
        }

        let in_round = self.current == Some(vote.sign_hash);
        match self.state {
            ProcessState::DposVerify if in_round => {
                if let Err(e) = self.accept_vote(&vote) {
                    metrics::record_vote("rejected");
                    return Err(e);
                }
                metrics::record_vote("accepted");
                self.process_dpos_once().await
            }
            ProcessState::End if in_round => Ok(()),
            // Another proposal, or local verification still running: park it
            _ => {
                let pooled = self.vote_pool.add_vote(
                    vote.sign_hash,
                    vote.signature,
                    vote.from,
                    vote.number,
                    true,
                );
                metrics::record_vote(if pooled.is_ok() { "pooled" } else { "rejected" });
                pooled.map(|_| ())
            }
        }
    }

    fn accept_vote(&mut self, vote: &VoteMsg) -> ConsensusResult<()> {
        let signer = self
            .ports
            .signer
            .recover(&vote.sign_hash, &vote.signature)
            .ok_or(ConsensusError::SignerRecoveryFailed)?;
        if signer != vote.from {
            return Err(ConsensusError::SignerMismatch {
                claimed: vote.from,
                recovered: signer,
            });
        }
        let record = self
            .req_cache
            .get_req_by_hash_mut(&vote.sign_hash)
            .ok_or(ConsensusError::RequestNotFound)?;
        if record.votes.contains_key(&signer) {
            return Err(ConsensusError::DuplicateVote {
                signer,
                hash: vote.sign_hash,
            });
        }
        record.votes.insert(signer, vote.signature);
        Ok(())
    }

    /// Checks quorum over the collected votes.
    pub(super) async fn process_dpos_once(&mut self) -> ConsensusResult<()> {
        if self.state != ProcessState::DposVerify || self.pos_finished {
            return Ok(());
        }
        let Some(fingerprint) = self.current else {
            return Ok(());
        };
        let record = self
            .req_cache
            .get_req_by_hash(&fingerprint)
            .ok_or(ConsensusError::RequestNotFound)?;
        let parent_hash = record.request.header.parent_hash;
        let signatures: Vec<Signature> = record.votes.values().copied().collect();
        match self
            .ports
            .quorum
            .check_quorum(&fingerprint, &signatures, &parent_hash)
        {
            Ok(valid) => {
                self.pos_finished = true;
                self.finish_pos(fingerprint, valid).await
            }
            Err(reason) => {
                debug!(
                    number = self.number,
                    votes = signatures.len(),
                    %reason,
                    "Waiting for more votes"
                );
                Ok(())
            }
        }
    }

    async fn finish_pos(&mut self, fingerprint: Hash, signatures: Vec<Signature>) -> ConsensusResult<()> {
        let record = self
            .req_cache
            .get_req_by_hash(&fingerprint)
            .ok_or(ConsensusError::RequestNotFound)?
            .clone();

        match record.verify_result {
            VerifyResult::Processing => {
                error!(
                    number = self.number,
                    hash = %short_hex(&fingerprint),
                    "Quorum reached before local verification finished"
                );
                return Ok(());
            }
            VerifyResult::StateFailed => {
                metrics::record_possible_fork();
                error!(
                    number = self.number,
                    hash = %short_hex(&fingerprint),
                    "Quorum reached for a proposal local state rejects, possible fork"
                );
                return Ok(());
            }
            VerifyResult::FailedRecoverable | VerifyResult::Success => {}
        }

        let mut header = record.request.header.clone();
        header.signatures = signatures;
        if record.verify_result == VerifyResult::Success {
            info!(
                number = self.number,
                hash = %short_hex(&fingerprint),
                turn = %record.turn(),
                signatures = header.signatures.len(),
                "POS finished"
            );
            metrics::record_pos_finished();
            self.publish(ConsensusEvent::PosFinished(PosFinishedNotify {
                number: self.number,
                consensus_turn: record.turn(),
                header: header.clone(),
            }))
            .await;
        } else {
            // The quorum is relayed, only the local POS notification is withheld
            warn!(
                number = self.number,
                hash = %short_hex(&fingerprint),
                signatures = header.signatures.len(),
                "Quorum reached for a proposal not verified locally"
            );
        }

        self.mining_sender = Some(self.start_sender(
            "mining_request",
            ConsensusMessage::MiningRequest(MiningRequest {
                header: header.clone(),
                tx_codes: record.request.tx_codes.clone(),
            }),
            Target::role(Role::Miner),
            self.config.miner_req_send_interval,
            0,
        ));
        self.posed_sender = Some(self.start_sender(
            "posed_request",
            ConsensusMessage::PosedRequest(BlockRequest {
                header,
                tx_codes: record.request.tx_codes,
                consensus_turn: record.request.consensus_turn,
                from: self.ports.signer.address(),
            }),
            Target::role(Role::Broadcast),
            self.config.posed_req_send_interval,
            0,
        ));

        self.state = ProcessState::End;
        self.vote_pool.del_votes(&fingerprint);
        Ok(())
    }

    /// Ends a broadcast node's verification of one request. A verified
    /// quorum-backed header counts as a finished POS.
    async fn bc_finished(
        &mut self,
        fingerprint: Hash,
        result: VerifyResult,
        header: BlockHeader,
        consensus_turn: ConsensusTurn,
    ) {
        self.broadcast_done.insert(fingerprint);
        self.current = None;
        self.state = ProcessState::Start;

        if result != VerifyResult::Success {
            warn!(
                number = self.number,
                hash = %short_hex(&fingerprint),
                %result,
                "Quorum-backed request failed local verification"
            );
            return;
        }
        self.publish(ConsensusEvent::PosFinished(PosFinishedNotify {
            number: self.number,
            consensus_turn,
            header,
        }))
        .await;
    }
}
