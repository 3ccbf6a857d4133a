//! Request and transaction verification stages.

use super::{Process, ProcessInput, ProcessState};
use crate::domain::{
    election_digest, BlockHeader, ConsensusError, ConsensusResult, ExecutionOutcome, Transaction,
    VerifyResult,
};
use crate::metrics;
use crate::ports::{ExecutionEngine, TxSource};
use shared_types::{short_hex, Address, Hash, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl Process {
    /// Picks up the current leader's request if it is cached.
    pub(super) async fn start_req_verify_common(&mut self) -> ConsensusResult<()> {
        if self.role != Role::Validator || self.state != ProcessState::Start {
            return Ok(());
        }
        let Some(leader) = &self.leader else {
            return Ok(());
        };
        let Some(record) = self
            .req_cache
            .get_leader_req(&leader.leader, leader.consensus_turn)
        else {
            debug!(
                number = self.number,
                leader = %short_hex(&leader.leader),
                "Waiting for the leader's request"
            );
            return Ok(());
        };

        let fingerprint = record.fingerprint;
        info!(
            number = self.number,
            hash = %short_hex(&fingerprint),
            turn = %record.turn(),
            "Verifying leader request"
        );
        self.current = Some(fingerprint);
        self.pos_finished = false;
        self.state = ProcessState::ReqVerify;
        self.process_req_once().await
    }

    /// Verifies quorum-backed requests one at a time on broadcast nodes.
    pub(super) async fn start_req_verify_broadcast(&mut self) -> ConsensusResult<()> {
        loop {
            if self.role != Role::Broadcast || self.state != ProcessState::Start {
                return Ok(());
            }
            let candidate = self
                .req_cache
                .all_requests()
                .into_iter()
                .filter(|r| !self.broadcast_done.contains(&r.fingerprint))
                .find(|r| self.ports.quorum.verify_block(&r.request.header).is_ok())
                .map(|r| r.fingerprint);
            let Some(fingerprint) = candidate else {
                return Ok(());
            };

            info!(
                number = self.number,
                hash = %short_hex(&fingerprint),
                "Verifying quorum-backed request"
            );
            self.current = Some(fingerprint);
            self.state = ProcessState::ReqVerify;
            self.process_req_once().await?;
        }
    }

    pub(super) async fn process_req_once(&mut self) -> ConsensusResult<()> {
        let Some(fingerprint) = self.current else {
            return Ok(());
        };
        let Some(record) = self.req_cache.get_req_by_hash(&fingerprint) else {
            warn!(number = self.number, hash = %short_hex(&fingerprint), "Request vanished");
            self.current = None;
            self.state = ProcessState::Start;
            return Err(ConsensusError::RequestNotFound);
        };

        // Local proposals carry their own execution result
        if record.verify_result.is_final() {
            let result = record.verify_result;
            return self.start_dpos_verify(result).await;
        }

        let header = record.request.header.clone();
        match self.check_request(&header) {
            Some(result) => self.start_dpos_verify(result).await,
            None => {
                self.start_txs_verify();
                Ok(())
            }
        }
    }

    /// Header-level checks. `None` means the header passed and the
    /// transactions are next.
    fn check_request(&self, header: &BlockHeader) -> Option<VerifyResult> {
        let hash = short_hex(&header.fingerprint());

        if self.role == Role::Validator {
            if let Some(leader) = &self.leader {
                if header.timestamp < leader.turn_begin_time
                    || header.timestamp > leader.turn_end_time
                {
                    warn!(
                        number = self.number,
                        %hash,
                        timestamp = header.timestamp,
                        begin = leader.turn_begin_time,
                        end = leader.turn_end_time,
                        "Proposal timestamp outside the leader's turn"
                    );
                    return Some(VerifyResult::FailedRecoverable);
                }
            }
        }

        let parent = self
            .ports
            .chain
            .header_by_hash(&header.parent_hash)
            .filter(|_| self.ports.chain.has_state(&header.parent_hash));
        match parent {
            Some(parent) if parent.number + 1 == header.number => {}
            _ => {
                warn!(number = self.number, %hash, "Parent block or state missing");
                return Some(VerifyResult::StateFailed);
            }
        }

        if let Err(e) = self.ports.execution.verify_header(header) {
            warn!(number = self.number, %hash, error = %e, "Header rules violated");
            return Some(VerifyResult::StateFailed);
        }

        match self.ports.election.election_graph(&header.parent_hash) {
            Ok(entries) if election_digest(&entries) == election_digest(&header.elect) => {}
            Ok(_) => {
                warn!(number = self.number, %hash, error = %ConsensusError::ElectionMismatch, "Election check failed");
                return Some(VerifyResult::StateFailed);
            }
            Err(e) => {
                warn!(number = self.number, %hash, error = %e, "Election graph unavailable");
                return Some(VerifyResult::StateFailed);
            }
        }

        match self
            .ports
            .election
            .expected_topology(&header.parent_hash, header)
        {
            Ok(expected) if expected.digest() == header.net_topology.digest() => None,
            Ok(_) => {
                warn!(number = self.number, %hash, error = %ConsensusError::TopologyMismatch, "Topology check failed");
                Some(VerifyResult::FailedRecoverable)
            }
            Err(e) => {
                warn!(number = self.number, %hash, error = %e, "Topology unavailable");
                Some(VerifyResult::FailedRecoverable)
            }
        }
    }

    /// Hands transaction fetch and re-execution to a worker task.
    pub(super) fn start_txs_verify(&mut self) {
        let Some(fingerprint) = self.current else {
            return;
        };
        let Some(record) = self.req_cache.get_req_by_hash(&fingerprint) else {
            return;
        };

        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.tx_seq += 1;
        let seq = self.tx_seq;
        self.state = ProcessState::TxsVerify;

        let header = record.request.header.clone();
        let tx_codes = record.request.tx_codes.clone();
        let leader = record.leader();
        let txs = self.ports.txs.clone();
        let execution = self.ports.execution.clone();
        let fetch_timeout = self.config.tx_fetch_timeout;
        let inbox = self.inbox.clone();
        debug!(
            number = self.number,
            hash = %short_hex(&fingerprint),
            txs = tx_codes.len(),
            seq,
            "Transaction verification started"
        );

        self.worker = Some(tokio::spawn(async move {
            let started = Instant::now();
            let result =
                fetch_and_execute(txs, execution, header, tx_codes, leader, seq, fetch_timeout)
                    .await;
            metrics::record_verify_latency(started.elapsed().as_secs_f64());
            let _ = inbox
                .send(ProcessInput::TxsVerified {
                    seq,
                    fingerprint,
                    result,
                })
                .await;
        }));
    }

    pub(super) async fn handle_txs_verified(
        &mut self,
        seq: u64,
        fingerprint: Hash,
        result: ConsensusResult<(Vec<Transaction>, ExecutionOutcome)>,
    ) -> ConsensusResult<()> {
        if seq != self.tx_seq
            || self.state != ProcessState::TxsVerify
            || self.current != Some(fingerprint)
        {
            debug!(number = self.number, seq, current_seq = self.tx_seq, "Stale verification result");
            return Ok(());
        }
        self.worker = None;

        let number = self.number;
        let record = self
            .req_cache
            .get_req_by_hash_mut(&fingerprint)
            .ok_or(ConsensusError::RequestNotFound)?;
        let verdict = match result {
            Err(e) => {
                warn!(number, hash = %short_hex(&fingerprint), error = %e, "Transactions could not be verified");
                VerifyResult::FailedRecoverable
            }
            Ok((transactions, outcome)) => match outcome.mismatch_with(&record.request.header) {
                Some(field) => {
                    error!(
                        number,
                        hash = %short_hex(&fingerprint),
                        error = %ConsensusError::ExecutionMismatch(field),
                        "Re-execution disagrees with the proposal"
                    );
                    VerifyResult::StateFailed
                }
                None => {
                    record.transactions = transactions;
                    record.receipts = outcome.receipts;
                    VerifyResult::Success
                }
            },
        };
        self.start_dpos_verify(verdict).await
    }
}

async fn fetch_and_execute(
    txs: Arc<dyn TxSource>,
    execution: Arc<dyn ExecutionEngine>,
    header: BlockHeader,
    tx_codes: Vec<Hash>,
    leader: Address,
    seq: u64,
    fetch_timeout: Duration,
) -> ConsensusResult<(Vec<Transaction>, ExecutionOutcome)> {
    let transactions = if tx_codes.is_empty() {
        Vec::new()
    } else {
        tokio::time::timeout(fetch_timeout, txs.resolve(header.number, tx_codes, leader, seq))
            .await
            .map_err(|_| ConsensusError::TxFetchTimeout)?
            .map_err(ConsensusError::TxFetch)?
    };

    let adjustments = execution
        .reward_and_slash(&header)
        .map_err(ConsensusError::Execution)?;
    let outcome = execution
        .execute(&header, &transactions, &adjustments)
        .map_err(ConsensusError::Execution)?;
    Ok((transactions, outcome))
}
