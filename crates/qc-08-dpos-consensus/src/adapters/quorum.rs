//! Stake-weighted quorum checker
//!
//! Recovers each signer, drops signers outside the validator set built on
//! the parent block (and repeated signers), then requires the remaining
//! stake to reach the configured percentage.

use crate::domain::{BlockHeader, TopologyGraph};
use crate::ports::{ElectionSource, QuorumChecker, SignatureService};
use shared_types::{Address, Hash, Signature};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

pub struct StakeQuorum {
    election: Arc<dyn ElectionSource>,
    signer: Arc<dyn SignatureService>,
    quorum_percent: u8,
}

impl StakeQuorum {
    pub fn new(
        election: Arc<dyn ElectionSource>,
        signer: Arc<dyn SignatureService>,
        quorum_percent: u8,
    ) -> Self {
        Self {
            election,
            signer,
            quorum_percent,
        }
    }
}

impl QuorumChecker for StakeQuorum {
    fn verify_block(&self, header: &BlockHeader) -> Result<(), String> {
        self.check_quorum(&header.fingerprint(), &header.signatures, &header.parent_hash)
            .map(|_| ())
    }

    fn check_quorum(
        &self,
        hash: &Hash,
        signatures: &[Signature],
        parent_hash: &Hash,
    ) -> Result<Vec<Signature>, String> {
        let graph = self.election.topology_graph(parent_hash)?;
        self.check_quorum_in(&graph, hash, signatures)
    }

    fn check_quorum_in(
        &self,
        graph: &TopologyGraph,
        hash: &Hash,
        signatures: &[Signature],
    ) -> Result<Vec<Signature>, String> {
        let validators = graph.validator_set();
        if validators.is_empty() {
            return Err("empty validator set".to_string());
        }

        let mut seen: HashSet<Address> = HashSet::new();
        let mut valid = Vec::new();
        let mut voted_stake: u128 = 0;
        for sig in signatures {
            let Some(signer) = self.signer.recover(hash, sig) else {
                continue;
            };
            let Some(info) = validators.get(&signer) else {
                continue;
            };
            if !seen.insert(signer) {
                continue;
            }
            voted_stake += info.stake as u128;
            valid.push(*sig);
        }

        trace!(
            signers = valid.len(),
            voted_stake,
            total_stake = validators.total_stake,
            "Quorum check"
        );
        if validators.reaches_threshold(voted_stake, self.quorum_percent) {
            Ok(valid)
        } else {
            Err(format!(
                "{} of {} stake signed, {}% required",
                voted_stake, validators.total_stake, self.quorum_percent
            ))
        }
    }
}
