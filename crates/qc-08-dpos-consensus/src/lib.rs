//! # qc-08-dpos-consensus
//!
//! Leader-based DPOS consensus core for Quantum-Chain.
//!
//! ## Architecture
//!
//! Consensus runs one height at a time. For each height the node keeps two
//! cooperating instances:
//!
//! - a **reelection controller** that decides who the leader is, tracks the
//!   turn window and, when the leader stays silent, drives the leader
//!   reelection protocol (inquiry → agree → reelect request → vote →
//!   result broadcast);
//! - a **block-verification process** that verifies the leader's proposal,
//!   signs it and collects votes until a stake quorum is reached.
//!
//! ```text
//!                  ┌──────────────── DposConsensusService ────────────────┐
//!  RoleUpdated ───→│ ControllerManager            ProcessManager          │
//!  Network msgs ──→│   Controller(n) ─LeaderChange─→ Process(n)           │
//!                  │   Controller(n) ←─PosFinished── Process(n)           │
//!                  └──────────────────────────────────────────────────────┘
//!                           │ events                  │ messages
//!                           ↓                         ↓
//!                      [EventBus]                [Transport]
//! ```
//!
//! Every instance is a tokio task reading a bounded inbox; timers and
//! transaction verification post their results back into that inbox, so
//! an instance never shares mutable state with another task.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qc_08_dpos_consensus::{ConsensusConfig, ConsensusInput, DposConsensusService, RoleUpdate};
//! use qc_08_dpos_consensus::ports::ConsensusApi;
//!
//! let service = DposConsensusService::new(ports, ConsensusConfig::default());
//! service
//!     .handle(ConsensusInput::RoleUpdated(RoleUpdate { role, header: head }))
//!     .await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod events;
pub mod height_arena;
pub mod metrics;
pub mod ports;
pub mod reelection;
pub mod service;
pub mod verification;

#[cfg(test)]
mod test_utils;

// Re-export main types
pub use adapters::{InMemoryEventBus, InMemoryTransport, K256Signer, StakeQuorum};
pub use domain::{
    BlockHeader, BlockRequest, ConsensusConfig, ConsensusError, ConsensusMessage,
    ConsensusResult, ConsensusTurn, LeaderCalculator, LeaderTimingConfig, TurnTimer,
    VerifyResult,
};
pub use events::{
    ConsensusEvent, ConsensusInput, LeaderChangeNotify, PosFinishedNotify, RoleUpdate,
};
pub use ports::{ConsensusApi, ConsensusPorts, EventBus};
pub use reelection::{ControllerManager, ControllerState};
pub use service::DposConsensusService;
pub use verification::{ProcessManager, ProcessState, VotePool};
