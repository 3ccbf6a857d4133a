//! Reelection: per-height leader tracking, turn timing and the leader
//! reelection protocol.

mod cdc;
mod controller;
mod manager;
mod master_cache;
mod msg_pool;

pub use cdc::ConsensusDataContext;
pub use controller::{Controller, ControllerInput, ControllerState};
pub use manager::ControllerManager;
