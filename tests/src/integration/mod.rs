//! # Integration Flows
//!
//! Multi-node scenarios run on [`crate::network::TestNetwork`] with paused
//! tokio time.

pub mod dpos_flows;
