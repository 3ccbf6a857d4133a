//! # Consensus Data Context
//!
//! Per-height snapshot of everything the controller derives from the
//! parent block: topology, local role, leader rotation and turn windows.
//! It is captured once in [`ConsensusDataContext::analysis_state`] and only
//! the turn fields move afterwards. Quorum checks of the height run against
//! the captured topology through [`ConsensusDataContext::check_quorum`].

use crate::domain::{
    real_pre_leader, BlockHeader, BroadcastInterval, ConsensusError, ConsensusResult,
    ConsensusTurn, LeaderCalculator, LeaderPair, LeaderTimingConfig, TopologyGraph,
    TurnStateInfo, TurnTimer,
};
use crate::events::LeaderChangeNotify;
use crate::ports::{ChainReader, ElectionSource, QuorumChecker};
use shared_types::{short_hex, Address, Hash, Role, Signature, EMPTY_ADDRESS, EMPTY_HASH};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ConsensusDataContext {
    number: u64,
    self_address: Address,
    role: Role,
    parent_hash: Hash,
    graph: Arc<TopologyGraph>,
    interval: BroadcastInterval,
    leader_calc: LeaderCalculator,
    turn_timer: TurnTimer,
    consensus_turn: ConsensusTurn,
    reelect_turn: u32,
    consensus_leader: Address,
    reelect_master: Address,
}

impl ConsensusDataContext {
    pub fn new(number: u64, self_address: Address, timing: LeaderTimingConfig) -> Self {
        let interval = BroadcastInterval::default();
        Self {
            number,
            self_address,
            role: Role::Default,
            parent_hash: EMPTY_HASH,
            graph: Arc::new(TopologyGraph::default()),
            interval,
            leader_calc: LeaderCalculator::new(number, Vec::new(), interval),
            turn_timer: TurnTimer::new(timing),
            consensus_turn: ConsensusTurn::default(),
            reelect_turn: 0,
            consensus_leader: EMPTY_ADDRESS,
            reelect_master: EMPTY_ADDRESS,
        }
    }

    /// Captures the height snapshot from `parent`.
    pub fn analysis_state(
        &mut self,
        parent: &BlockHeader,
        chain: &dyn ChainReader,
        election: &dyn ElectionSource,
    ) -> ConsensusResult<()> {
        let parent_hash = parent.hash();
        let graph = election
            .topology_graph(&parent_hash)
            .map_err(ConsensusError::Election)?;
        let timing = match election.leader_config(&parent_hash) {
            Ok(timing) => timing,
            Err(e) => {
                warn!(number = self.number, error = %e, "Leader config unavailable, keeping defaults");
                *self.turn_timer.timing()
            }
        };
        let interval = election
            .broadcast_interval(&parent_hash)
            .map_err(ConsensusError::Election)?;

        let role = graph.role_of(&self.self_address);
        let validators = graph.accounts_with_role(Role::Validator);

        let (pre_leader, pre_is_super) =
            real_pre_leader(parent, &interval, |h| chain.header_by_hash(h))?;
        let mut leader_calc = LeaderCalculator::new(self.number, validators, interval);
        leader_calc.set_pre_leader(pre_leader, pre_is_super)?;

        self.role = role;
        self.parent_hash = parent_hash;
        self.graph = Arc::new(graph);
        self.interval = interval;
        self.leader_calc = leader_calc;
        self.turn_timer.set_timing(timing);
        self.consensus_turn = ConsensusTurn::default();
        self.reelect_turn = 0;
        self.refresh_leaders()?;

        info!(
            number = self.number,
            role = %self.role,
            leader = %short_hex(&self.consensus_leader),
            pre_leader = %short_hex(&pre_leader),
            "Consensus data analysed"
        );
        Ok(())
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn self_address(&self) -> Address {
        self.self_address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn parent_hash(&self) -> Hash {
        self.parent_hash
    }

    pub fn is_broadcast_number(&self) -> bool {
        self.interval.is_broadcast_number(self.number)
    }

    /// Broadcast and election heights have no rotating leader.
    pub fn is_special_number(&self) -> bool {
        self.interval.is_broadcast_number(self.number)
            || self.interval.is_reelection_number(self.number)
    }

    pub fn consensus_turn(&self) -> ConsensusTurn {
        self.consensus_turn
    }

    pub fn reelect_turn(&self) -> u32 {
        self.reelect_turn
    }

    pub fn consensus_leader(&self) -> Address {
        self.consensus_leader
    }

    pub fn reelect_master(&self) -> Address {
        self.reelect_master
    }

    pub fn is_self_master(&self) -> bool {
        self.reelect_turn != 0 && self.reelect_master == self.self_address
    }

    pub fn pre_leader(&self) -> Address {
        self.leader_calc.pre_leader()
    }

    pub fn leader_list(&self) -> &[Address] {
        self.leader_calc.leader_list()
    }

    pub fn get_leader(&self, turn: u32) -> ConsensusResult<LeaderPair> {
        self.leader_calc.get_leader(turn)
    }

    pub fn set_begin_time(&mut self, begin_time: u64) -> ConsensusResult<()> {
        self.turn_timer.set_begin_time(begin_time)
    }

    pub fn timing(&self) -> &LeaderTimingConfig {
        self.turn_timer.timing()
    }

    /// Moves to a new consensus turn; the reelection round is reset.
    pub fn set_consensus_turn(&mut self, turn: ConsensusTurn) -> ConsensusResult<()> {
        self.consensus_turn = turn;
        self.reelect_turn = 0;
        self.refresh_leaders()
    }

    /// Sets the reelect turn; 0 ends the round.
    pub fn set_reelect_turn(&mut self, reelect_turn: u32) -> ConsensusResult<()> {
        self.reelect_turn = reelect_turn;
        self.refresh_leaders()
    }

    fn refresh_leaders(&mut self) -> ConsensusResult<()> {
        let total = self.consensus_turn.total();
        self.consensus_leader = self.leader_calc.get_leader(total)?.leader;
        self.reelect_master = if self.reelect_turn == 0 {
            EMPTY_ADDRESS
        } else {
            self.leader_calc
                .get_leader(total.saturating_add(self.reelect_turn))?
                .leader
        };
        debug!(
            number = self.number,
            turn = %self.consensus_turn,
            reelect_turn = self.reelect_turn,
            leader = %short_hex(&self.consensus_leader),
            master = %short_hex(&self.reelect_master),
            "Leaders refreshed"
        );
        Ok(())
    }

    /// Classifies `now` for the current consensus turn.
    pub fn cal_state(&self, now: u64) -> TurnStateInfo {
        self.turn_timer.cal_state(self.consensus_turn.total(), now)
    }

    /// Window of the current (consensus turn, reelect turn).
    pub fn cal_turn_time(&self) -> (u64, u64) {
        self.turn_timer
            .cal_turn_time(self.consensus_turn.total(), self.reelect_turn)
    }

    /// Rejects `timestamp` outside the window of `reelect_turn` within the
    /// current consensus turn.
    pub fn check_time_legal(&self, reelect_turn: u32, timestamp: u64) -> ConsensusResult<()> {
        self.turn_timer
            .check_time_legal(self.consensus_turn.total(), reelect_turn, timestamp)
    }

    /// Leader notification for the current view. `consensus_state` is
    /// `false` while a reelection is running.
    pub fn prepare_leader_msg(&self, consensus_state: bool) -> ConsensusResult<LeaderChangeNotify> {
        let total = self.consensus_turn.total();
        let leaders = self
            .leader_calc
            .get_leader(total.saturating_add(self.reelect_turn))?;
        let (turn_begin_time, turn_end_time) = self.cal_turn_time();
        Ok(LeaderChangeNotify {
            consensus_state,
            pre_leader: self.pre_leader(),
            leader: leaders.leader,
            next_leader: leaders.next_leader,
            number: self.number,
            consensus_turn: self.consensus_turn,
            reelect_turn: self.reelect_turn,
            turn_begin_time,
            turn_end_time,
        })
    }

    /// Valid subset of `signatures` over `hash` when it reaches quorum for
    /// the validators of this height.
    pub fn check_quorum(
        &self,
        quorum: &dyn QuorumChecker,
        hash: &Hash,
        signatures: &[Signature],
    ) -> ConsensusResult<Vec<Signature>> {
        quorum
            .check_quorum_in(&self.graph, hash, signatures)
            .map_err(ConsensusError::QuorumFailed)
    }
}
