//! Leader rotation
//!
//! For every height the validators are rotated once, starting right after
//! the previous real leader. `leader_list[turn % n]` is the leader of a
//! turn; the list never changes for the lifetime of the height.

use super::{BlockHeader, BroadcastInterval, ConsensusError, ConsensusResult};
use shared_types::{short_hex, Address, Hash, EMPTY_ADDRESS};
use tracing::{debug, warn};

/// Leader and next leader of one turn. Empty addresses mean "none".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeaderPair {
    pub leader: Address,
    pub next_leader: Address,
}

/// Walks back from `parent` over broadcast and super blocks to the last
/// block that was produced by a rotating leader.
///
/// Returns that block's leader and whether a super block was crossed (or
/// is the parent itself).
pub fn real_pre_leader<F>(
    parent: &BlockHeader,
    interval: &BroadcastInterval,
    header_by_hash: F,
) -> ConsensusResult<(Address, bool)>
where
    F: Fn(&Hash) -> Option<BlockHeader>,
{
    let mut header = parent.clone();
    let mut pre_is_super = false;

    loop {
        let special = header.super_block || interval.is_broadcast_number(header.number);
        if header.super_block {
            pre_is_super = true;
        }
        if !special || header.number == 0 {
            break;
        }
        header = header_by_hash(&header.parent_hash)
            .ok_or(ConsensusError::HeaderNotFound(header.parent_hash))?;
    }

    Ok((header.leader, pre_is_super))
}

/// Deterministic leader rotation of one height.
#[derive(Clone, Debug)]
pub struct LeaderCalculator {
    number: u64,
    interval: BroadcastInterval,
    validators: Vec<Address>,
    pre_leader: Address,
    leader_list: Vec<Address>,
}

impl LeaderCalculator {
    pub fn new(number: u64, validators: Vec<Address>, interval: BroadcastInterval) -> Self {
        Self {
            number,
            interval,
            validators,
            pre_leader: EMPTY_ADDRESS,
            leader_list: Vec::new(),
        }
    }

    /// Builds the rotation from the previous real leader.
    pub fn set_pre_leader(&mut self, pre_leader: Address, pre_is_super: bool) -> ConsensusResult<()> {
        if self.validators.is_empty() {
            return Err(ConsensusError::EmptyValidatorList(self.number));
        }

        let count = self.validators.len();
        let reset = pre_is_super
            || self
                .interval
                .is_reelection_number(self.number.saturating_sub(1))
            || self.interval.is_reelection_number(self.number);

        let start = if reset {
            0
        } else {
            match self.validators.iter().position(|v| v == &pre_leader) {
                Some(idx) => (idx + 1) % count,
                None => {
                    warn!(
                        number = self.number,
                        pre_leader = %short_hex(&pre_leader),
                        "Previous leader not in validator list, rotation starts at 0"
                    );
                    0
                }
            }
        };

        self.leader_list = (0..count)
            .map(|i| self.validators[(start + i) % count])
            .collect();
        self.pre_leader = pre_leader;

        debug!(number = self.number, start, count, "Leader list computed");
        Ok(())
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn pre_leader(&self) -> Address {
        self.pre_leader
    }

    pub fn leader_list(&self) -> &[Address] {
        &self.leader_list
    }

    /// Leader of `turn` (a total consensus turn, reelect turns included).
    pub fn get_leader(&self, turn: u32) -> ConsensusResult<LeaderPair> {
        let count = self.leader_list.len();
        if count == 0 {
            return Err(ConsensusError::LeaderListNotReady(self.number));
        }

        let current = self.leader_list[turn as usize % count];
        let next = self.leader_list[(turn as usize + 1) % count];

        if self.interval.is_reelection_number(self.number) {
            return Ok(LeaderPair::default());
        }
        if self.interval.is_broadcast_number(self.number) {
            return Ok(LeaderPair {
                leader: EMPTY_ADDRESS,
                next_leader: current,
            });
        }

        let next_leader = if self.interval.is_broadcast_number(self.number + 1) {
            EMPTY_ADDRESS
        } else {
            next
        };
        Ok(LeaderPair {
            leader: current,
            next_leader,
        })
    }
}
