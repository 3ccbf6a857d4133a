//! Configuration for the consensus core

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Leader timing, read per height from the election source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderTimingConfig {
    /// Seconds granted to the first leader on top of the POS window.
    pub parent_mining_time: u64,
    /// Width in seconds of one POS / reelect turn.
    pub pos_out_time: u64,
    /// Seconds between master re-drives and single inquiries.
    pub reelect_handle_interval: u64,
}

impl Default for LeaderTimingConfig {
    fn default() -> Self {
        Self {
            parent_mining_time: 20,
            pos_out_time: 40,
            reelect_handle_interval: 3,
        }
    }
}

/// Special-height layout, read per height from the election source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastInterval {
    /// Every `broadcast_interval`-th height is a broadcast height.
    pub broadcast_interval: u64,
    /// Every `election_interval`-th height is an election height.
    pub election_interval: u64,
}

impl BroadcastInterval {
    pub fn is_broadcast_number(&self, number: u64) -> bool {
        self.broadcast_interval != 0 && number % self.broadcast_interval == 0
    }

    pub fn is_reelection_number(&self, number: u64) -> bool {
        self.election_interval != 0 && number % self.election_interval == 0
    }
}

impl Default for BroadcastInterval {
    fn default() -> Self {
        Self {
            broadcast_interval: 100,
            election_interval: 300,
        }
    }
}

/// Configuration for consensus
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// Vote pool age limit (milliseconds)
    pub vote_pool_timeout_ms: u64,
    /// Votes kept per signer in the vote pool
    pub vote_pool_count_limit: usize,
    /// Transaction fetch timeout
    pub tx_fetch_timeout: Duration,
    /// Resend interval of the mining request (unbounded)
    pub miner_req_send_interval: Duration,
    /// Resend interval of the posed request to broadcast nodes (unbounded)
    pub posed_req_send_interval: Duration,
    /// Resend interval of the local vote
    pub vote_send_interval: Duration,
    /// Attempts of the local vote sender
    pub vote_send_times: u32,
    /// Capacity of the non-leader request FIFO
    pub other_req_capacity: usize,
    /// Capacity of each per-height inbox
    pub inbox_capacity: usize,
    /// Heights above the current one that may already hold an instance
    pub legal_number_window: u64,
    /// Stake percentage required by the quorum check
    pub quorum_percent: u8,
    /// Fallback leader timing when the election source has none
    pub default_leader_timing: LeaderTimingConfig,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            vote_pool_timeout_ms: 55 * 1000,
            vote_pool_count_limit: 5,
            tx_fetch_timeout: Duration::from_secs(5),
            miner_req_send_interval: Duration::from_secs(3),
            posed_req_send_interval: Duration::from_secs(10),
            vote_send_interval: Duration::from_secs(3),
            vote_send_times: 8,
            other_req_capacity: 50,
            inbox_capacity: 256,
            legal_number_window: 2,
            quorum_percent: 67,
            default_leader_timing: LeaderTimingConfig::default(),
        }
    }
}
