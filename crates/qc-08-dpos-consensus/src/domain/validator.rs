//! Validator and topology entities
//!
//! The epoch election produces a topology graph; the consensus core only
//! reads it. Validators are taken from the graph in position order, which
//! is the order the leader rotation walks.

use serde::{Deserialize, Serialize};
use shared_types::{Address, Role};
use std::collections::HashMap;

/// One node of the topology graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub account: Address,
    pub role: Role,
    pub position: u16,
    pub stake: u64,
}

/// Topology graph valid at a given height.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyGraph {
    pub number: u64,
    pub nodes: Vec<TopologyNode>,
}

impl TopologyGraph {
    pub fn new(number: u64, nodes: Vec<TopologyNode>) -> Self {
        Self { number, nodes }
    }

    /// Role of `account` in this graph (`Role::Default` when absent).
    pub fn role_of(&self, account: &Address) -> Role {
        self.nodes
            .iter()
            .find(|n| &n.account == account)
            .map(|n| n.role)
            .unwrap_or_default()
    }

    /// Accounts holding `role`, ordered by topology position.
    pub fn accounts_with_role(&self, role: Role) -> Vec<Address> {
        let mut nodes: Vec<&TopologyNode> = self.nodes.iter().filter(|n| n.role == role).collect();
        nodes.sort_by_key(|n| n.position);
        nodes.into_iter().map(|n| n.account).collect()
    }

    /// Validator set derived from the graph.
    pub fn validator_set(&self) -> ValidatorSet {
        let mut nodes: Vec<&TopologyNode> = self
            .nodes
            .iter()
            .filter(|n| n.role == Role::Validator)
            .collect();
        nodes.sort_by_key(|n| n.position);
        ValidatorSet::new(
            self.number,
            nodes
                .into_iter()
                .map(|n| ValidatorInfo::new(n.account, n.stake))
                .collect(),
        )
    }
}

/// Validator set with stake information
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub number: u64,
    pub validators: Vec<ValidatorInfo>,
    pub total_stake: u128,
    /// Quick lookup by address
    #[serde(skip)]
    lookup: HashMap<Address, usize>,
}

impl ValidatorSet {
    pub fn new(number: u64, validators: Vec<ValidatorInfo>) -> Self {
        let total_stake = validators.iter().map(|v| v.stake as u128).sum();
        let lookup = validators
            .iter()
            .enumerate()
            .map(|(i, v)| (v.address, i))
            .collect();
        Self {
            number,
            validators,
            total_stake,
            lookup,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.lookup.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&ValidatorInfo> {
        self.lookup.get(address).map(|&idx| &self.validators[idx])
    }

    /// Position of `address` in rotation order.
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.lookup.get(address).copied()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.validators.iter().map(|v| v.address).collect()
    }

    /// Whether `voted_stake` reaches `percent` of the total stake.
    pub fn reaches_threshold(&self, voted_stake: u128, percent: u8) -> bool {
        if self.total_stake == 0 {
            return false;
        }
        voted_stake * 100 >= self.total_stake * percent as u128
    }

    /// Rebuild the lookup table (after deserialization)
    pub fn rebuild_lookup(&mut self) {
        self.lookup = self
            .validators
            .iter()
            .enumerate()
            .map(|(i, v)| (v.address, i))
            .collect();
    }
}

/// Individual validator information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: Address,
    pub stake: u64,
}

impl ValidatorInfo {
    pub fn new(address: Address, stake: u64) -> Self {
        Self { address, stake }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u8, role: Role, position: u16) -> TopologyNode {
        TopologyNode {
            account: [id; 20],
            role,
            position,
            stake: 100,
        }
    }

    #[test]
    fn test_validator_set_follows_position_order() {
        let graph = TopologyGraph::new(
            5,
            vec![
                node(3, Role::Validator, 2),
                node(9, Role::Broadcast, 0),
                node(1, Role::Validator, 0),
                node(2, Role::Validator, 1),
                node(7, Role::Miner, 0),
            ],
        );

        let set = graph.validator_set();
        assert_eq!(set.addresses(), vec![[1u8; 20], [2u8; 20], [3u8; 20]]);
        assert_eq!(set.total_stake, 300);
        assert_eq!(set.index_of(&[3u8; 20]), Some(2));
        assert_eq!(graph.role_of(&[9u8; 20]), Role::Broadcast);
        assert_eq!(graph.role_of(&[4u8; 20]), Role::Default);
    }

    #[test]
    fn test_threshold() {
        let set = ValidatorSet::new(
            1,
            (0..4).map(|i| ValidatorInfo::new([i; 20], 100)).collect(),
        );

        // 3 of 4 equal-stake validators reach 67%, 2 of 4 do not
        assert!(set.reaches_threshold(300, 67));
        assert!(!set.reaches_threshold(200, 67));
        assert!(!ValidatorSet::default().reaches_threshold(0, 67));
    }
}
