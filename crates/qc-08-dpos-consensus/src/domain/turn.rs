//! Consensus turn bookkeeping
//!
//! A consensus turn is the agreed leader slot of a height. Each successful
//! reelection folds the reelect turns it consumed into the next consensus
//! turn, so the pair `(pre_consensus_turn, used_reelect_turn)` keeps the
//! history while `total()` is the slot index used against the leader list.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Agreed leader slot of a height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsensusTurn {
    /// Total turn of the previous consensus turn.
    pub pre_consensus_turn: u32,
    /// Reelect turns consumed to reach this consensus turn.
    pub used_reelect_turn: u32,
}

impl ConsensusTurn {
    pub fn new(pre_consensus_turn: u32, used_reelect_turn: u32) -> Self {
        Self {
            pre_consensus_turn,
            used_reelect_turn,
        }
    }

    /// Slot index into the leader list.
    pub fn total(&self) -> u32 {
        self.pre_consensus_turn
            .saturating_add(self.used_reelect_turn)
    }

    /// Consensus turn reached after a successful reelection at `reelect_turn`.
    pub fn after_reelection(&self, reelect_turn: u32) -> Self {
        Self::new(self.total(), reelect_turn)
    }

    pub fn is_first(&self) -> bool {
        self.total() == 0
    }
}

impl Ord for ConsensusTurn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total()
            .cmp(&other.total())
            .then(self.pre_consensus_turn.cmp(&other.pre_consensus_turn))
    }
}

impl PartialOrd for ConsensusTurn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ConsensusTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}+{})",
            self.total(),
            self.pre_consensus_turn,
            self.used_reelect_turn
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_and_next() {
        let turn = ConsensusTurn::default();
        assert!(turn.is_first());

        let next = turn.after_reelection(2);
        assert_eq!(next.total(), 2);
        assert_eq!(next.pre_consensus_turn, 0);

        let again = next.after_reelection(1);
        assert_eq!(again, ConsensusTurn::new(2, 1));
        assert_eq!(again.total(), 3);
    }

    #[test]
    fn test_ordering_uses_total_then_pre() {
        let a = ConsensusTurn::new(0, 3);
        let b = ConsensusTurn::new(2, 1);
        let c = ConsensusTurn::new(1, 1);
        assert!(a < b);
        assert!(c < a);
        assert_eq!(a.total(), b.total());
    }
}
