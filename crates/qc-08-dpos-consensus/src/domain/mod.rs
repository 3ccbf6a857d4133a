//! Domain layer for the DPOS consensus core
//!
//! Pure types and algorithms: turns, turn windows, leader rotation, block
//! and message entities. Nothing here performs I/O.

mod block;
mod config;
mod error;
mod leader_calc;
mod messages;
mod proposal;
mod turn;
mod turn_timer;
mod validator;

pub use block::*;
pub use config::*;
pub use error::*;
pub use leader_calc::*;
pub use messages::*;
pub use proposal::*;
pub use turn::*;
pub use turn_timer::*;
pub use validator::*;
