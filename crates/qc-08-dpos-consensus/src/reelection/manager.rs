//! # Controller Manager
//!
//! Owns one reelection controller task per live height.

use super::controller::{Controller, ControllerInput};
use crate::domain::{BlockHeader, ConsensusConfig, ConsensusResult};
use crate::height_arena::HeightArena;
use crate::ports::ConsensusPorts;
use std::sync::Arc;

pub struct ControllerManager {
    arena: HeightArena<ControllerInput>,
    ports: ConsensusPorts,
    config: Arc<ConsensusConfig>,
}

impl ControllerManager {
    pub fn new(ports: ConsensusPorts, config: Arc<ConsensusConfig>) -> Self {
        Self {
            arena: HeightArena::new(
                "reelection",
                config.legal_number_window,
                config.inbox_capacity,
            ),
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

    /// Closes every controller below `number`.
    pub fn set_cur_number(&mut self, number: u64) {
        self.arena.set_cur_number(number);
    }

    /// Starts consensus for the child of `parent`.
    pub fn new_block_start(&mut self, parent: BlockHeader) -> ConsensusResult<()> {
        let number = parent.number + 1;
        self.set_cur_number(number);
        self.dispatch(number, ControllerInput::Start(parent))
    }

    pub fn dispatch(&mut self, number: u64, input: ControllerInput) -> ConsensusResult<()> {
        let ports = self.ports.clone();
        let config = self.config.clone();
        self.arena.dispatch(number, input, move |inbox, rx| {
            tokio::spawn(Controller::new(number, ports, config, inbox).run(rx))
        })
    }
}
