//! # Vote Pool
//!
//! Caches block votes by proposal fingerprint until the proposal they sign
//! is being verified locally. Votes often arrive before the proposal does.
//!
//! ## Bounds
//!
//! - At most one vote per (signer, fingerprint).
//! - Votes older than `timeout_ms` (relative to the newest insertion) are
//!   evicted on every insertion and never returned by lookups.
//! - Each signer keeps at most `count_limit` votes; the oldest go first.

use crate::domain::{ConsensusError, ConsensusResult};
use crate::ports::{SignatureService, TimeSource};
use parking_lot::RwLock;
use shared_types::{short_hex, Address, Hash, Signature, EMPTY_HASH};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// A cached vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PooledVote {
    pub sign_hash: Hash,
    pub signature: Signature,
    /// Recovered signer.
    pub signer: Address,
    pub number: u64,
    /// Arrival time in milliseconds.
    pub received_at: u64,
}

/// A pooled vote tagged with its insertion sequence.
struct Slot {
    seq: u64,
    vote: PooledVote,
}

#[derive(Default)]
struct PoolInner {
    votes: HashMap<Address, HashMap<Hash, Slot>>,
    /// Arrival order: (seq, time, signer, hash).
    time_index: VecDeque<(u64, u64, Address, Hash)>,
    next_seq: u64,
}

impl PoolInner {
    fn remove_if_seq(&mut self, signer: &Address, hash: &Hash, seq: u64) {
        if let Some(by_hash) = self.votes.get_mut(signer) {
            if by_hash.get(hash).map(|slot| slot.seq) == Some(seq) {
                by_hash.remove(hash);
            }
            if by_hash.is_empty() {
                self.votes.remove(signer);
            }
        }
    }

    fn fix_by_timeout(&mut self, deadline: u64) {
        while let Some(&(seq, time, signer, hash)) = self.time_index.front() {
            if time >= deadline {
                break;
            }
            self.time_index.pop_front();
            self.remove_if_seq(&signer, &hash, seq);
        }
    }

    fn fix_by_count(&mut self, signer: &Address, limit: usize) {
        loop {
            let Some(by_hash) = self.votes.get_mut(signer) else {
                return;
            };
            if by_hash.len() <= limit {
                return;
            }
            // Arrival times tie within a millisecond, the sequence does not
            let oldest = by_hash
                .values()
                .min_by_key(|slot| slot.seq)
                .map(|slot| slot.vote.sign_hash);
            match oldest {
                Some(hash) => {
                    by_hash.remove(&hash);
                }
                None => return,
            }
        }
    }
}

/// Pool-wide locked vote cache shared by every height.
pub struct VotePool {
    inner: RwLock<PoolInner>,
    timeout_ms: u64,
    count_limit: usize,
    signer: Arc<dyn SignatureService>,
    time: Arc<dyn TimeSource>,
}

impl VotePool {
    pub fn new(
        timeout_ms: u64,
        count_limit: usize,
        signer: Arc<dyn SignatureService>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            inner: RwLock::new(PoolInner::default()),
            timeout_ms,
            count_limit,
            signer,
            time,
        }
    }

    /// Adds a vote after recovering its signer.
    ///
    /// With `verify_from`, the recovered signer must equal `from`.
    pub fn add_vote(
        &self,
        sign_hash: Hash,
        signature: Signature,
        from: Address,
        number: u64,
        verify_from: bool,
    ) -> ConsensusResult<Address> {
        if sign_hash == EMPTY_HASH || signature.is_empty() {
            return Err(ConsensusError::EmptyVoteParam);
        }

        let signer = self
            .signer
            .recover(&sign_hash, &signature)
            .ok_or(ConsensusError::SignerRecoveryFailed)?;
        if verify_from && signer != from {
            return Err(ConsensusError::SignerMismatch {
                claimed: from,
                recovered: signer,
            });
        }

        let now = self.time.now_millis();
        let mut inner = self.inner.write();

        let duplicate = inner
            .votes
            .get(&signer)
            .is_some_and(|by_hash| by_hash.contains_key(&sign_hash));
        if duplicate {
            return Err(ConsensusError::DuplicateVote {
                signer,
                hash: sign_hash,
            });
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.votes.entry(signer).or_default().insert(
            sign_hash,
            Slot {
                seq,
                vote: PooledVote {
                    sign_hash,
                    signature,
                    signer,
                    number,
                    received_at: now,
                },
            },
        );
        inner.time_index.push_back((seq, now, signer, sign_hash));

        inner.fix_by_timeout(now.saturating_sub(self.timeout_ms));
        inner.fix_by_count(&signer, self.count_limit);

        debug!(
            number,
            signer = %short_hex(&signer),
            hash = %short_hex(&sign_hash),
            "Vote pooled"
        );
        Ok(signer)
    }

    /// Unexpired votes for `sign_hash`.
    pub fn get_votes(&self, sign_hash: &Hash) -> Vec<PooledVote> {
        let deadline = self.time.now_millis().saturating_sub(self.timeout_ms);
        let inner = self.inner.read();
        let mut slots: Vec<&Slot> = inner
            .votes
            .values()
            .filter_map(|by_hash| by_hash.get(sign_hash))
            .filter(|slot| slot.vote.received_at >= deadline)
            .collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.vote.clone()).collect()
    }

    pub fn del_votes(&self, sign_hash: &Hash) {
        let mut inner = self.inner.write();
        inner.votes.retain(|_, by_hash| {
            by_hash.remove(sign_hash);
            !by_hash.is_empty()
        });
        inner.time_index.retain(|(_, _, _, hash)| hash != sign_hash);
    }

    /// Number of stored votes, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.read().votes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
