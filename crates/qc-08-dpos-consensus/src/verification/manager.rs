//! # Process Manager
//!
//! Owns one block-verification process per live height. Every process
//! shares the vote pool, so votes that arrive early survive until their
//! proposal is verified.

use super::process::{Process, ProcessInput};
use super::vote_pool::VotePool;
use crate::domain::{ConsensusConfig, ConsensusResult};
use crate::height_arena::HeightArena;
use crate::ports::ConsensusPorts;
use shared_types::Role;
use std::sync::Arc;

pub struct ProcessManager {
    arena: HeightArena<ProcessInput>,
    vote_pool: Arc<VotePool>,
    ports: ConsensusPorts,
    config: Arc<ConsensusConfig>,
}

impl ProcessManager {
    pub fn new(ports: ConsensusPorts, config: Arc<ConsensusConfig>) -> Self {
        let vote_pool = Arc::new(VotePool::new(
            config.vote_pool_timeout_ms,
            config.vote_pool_count_limit,
            ports.signer.clone(),
            ports.time.clone(),
        ));
        Self {
            arena: HeightArena::new(
                "verification",
                config.legal_number_window,
                config.inbox_capacity,
            ),
            vote_pool,
            ports,
            config,
        }
    }

    pub fn cur_number(&self) -> u64 {
        self.arena.cur_number()
    }

    pub fn is_legal(&self, number: u64) -> bool {
        self.arena.is_legal(number)
    }

    pub fn live_numbers(&self) -> Vec<u64> {
        self.arena.live_numbers()
    }

    pub fn vote_pool(&self) -> &Arc<VotePool> {
        &self.vote_pool
    }

    /// Closes every process below `number`.
    pub fn set_cur_number(&mut self, number: u64) {
        self.arena.set_cur_number(number);
    }

    /// Moves to `number` and tells its process the local role.
    pub fn start(&mut self, number: u64, role: Role) -> ConsensusResult<()> {
        self.set_cur_number(number);
        self.dispatch(number, ProcessInput::StartRunning(role))
    }

    pub fn dispatch(&mut self, number: u64, input: ProcessInput) -> ConsensusResult<()> {
        let ports = self.ports.clone();
        let config = self.config.clone();
        let vote_pool = self.vote_pool.clone();
        self.arena.dispatch(number, input, move |inbox, rx| {
            tokio::spawn(Process::new(number, ports, config, vote_pool, inbox).run(rx))
        })
    }
}
