//! Turn windows
//!
//! All times are unix seconds. The first turn of a height gets
//! `parent_mining_time + pos_out_time`; every later turn (consensus or
//! reelect) is `pos_out_time` wide:
//!
//! ```text
//! begin        begin+pmt+pot   +pot        +pot
//!   |---- turn 0 ----|-- turn 1 --|-- turn 2 --| ...
//! ```

use super::{ConsensusError, ConsensusResult, LeaderTimingConfig};

/// Classification of "now" within a consensus turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    /// Still inside the POS window of the consensus turn.
    PosWait,
    /// The POS window elapsed; a reelection is due.
    ReelectWait,
}

/// Result of [`TurnTimer::cal_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnStateInfo {
    pub state: TurnState,
    /// Seconds until the current window closes.
    pub remain: u64,
    /// Reelect turn whose window contains "now" (0 while POS-waiting).
    pub reelect_turn: u32,
}

/// Turn window calculator of one height.
#[derive(Clone, Debug)]
pub struct TurnTimer {
    begin_time: u64,
    timing: LeaderTimingConfig,
}

impl TurnTimer {
    pub fn new(timing: LeaderTimingConfig) -> Self {
        Self {
            begin_time: 0,
            timing,
        }
    }

    /// Sets the reference time (parent header time). Only strictly
    /// increasing updates are accepted.
    pub fn set_begin_time(&mut self, begin_time: u64) -> ConsensusResult<()> {
        if begin_time <= self.begin_time {
            return Err(ConsensusError::IllegalBeginTime {
                current: self.begin_time,
                requested: begin_time,
            });
        }
        self.begin_time = begin_time;
        Ok(())
    }

    pub fn set_timing(&mut self, timing: LeaderTimingConfig) {
        self.timing = timing;
    }

    pub fn begin_time(&self) -> u64 {
        self.begin_time
    }

    pub fn timing(&self) -> &LeaderTimingConfig {
        &self.timing
    }

    /// `[begin, end)` window of `consensus_turn + reelect_turn`.
    pub fn cal_turn_time(&self, consensus_turn: u32, reelect_turn: u32) -> (u64, u64) {
        let total = consensus_turn as u64 + reelect_turn as u64;
        let pmt = self.timing.parent_mining_time;
        let pot = self.timing.pos_out_time;
        if total == 0 {
            return (self.begin_time, self.begin_time + pmt + pot);
        }
        let begin = self.begin_time + pmt + pot * total;
        (begin, begin + pot)
    }

    /// Classifies `now` for `consensus_turn`.
    pub fn cal_state(&self, consensus_turn: u32, now: u64) -> TurnStateInfo {
        let pot = self.timing.pos_out_time;
        let pos_time = self.timing.parent_mining_time + pot * (consensus_turn as u64 + 1);
        let elapsed = now.saturating_sub(self.begin_time);

        if elapsed < pos_time {
            return TurnStateInfo {
                state: TurnState::PosWait,
                remain: pos_time - elapsed,
                reelect_turn: 0,
            };
        }

        let overdue = elapsed - pos_time;
        let reelect_turn = if pot == 0 {
            1
        } else {
            overdue.div_ceil(pot).max(1)
        };
        let reelect_turn = u32::try_from(reelect_turn).unwrap_or(u32::MAX);
        let (_, end) = self.cal_turn_time(consensus_turn, reelect_turn);

        TurnStateInfo {
            state: TurnState::ReelectWait,
            remain: end.saturating_sub(now),
            reelect_turn,
        }
    }

    /// Rejects `timestamp` unless it lies strictly inside the window of
    /// `consensus_turn + reelect_turn`.
    pub fn check_time_legal(
        &self,
        consensus_turn: u32,
        reelect_turn: u32,
        timestamp: u64,
    ) -> ConsensusResult<()> {
        let (begin, end) = self.cal_turn_time(consensus_turn, reelect_turn);
        if timestamp <= begin || timestamp >= end {
            return Err(ConsensusError::TimestampOutOfWindow {
                timestamp,
                begin,
                end,
            });
        }
        Ok(())
    }
}
