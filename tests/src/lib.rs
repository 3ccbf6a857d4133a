//! # Quantum-Chain DPOS Test Suite
//!
//! Unified test crate for the consensus workspace.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── network.rs        # In-memory multi-node network (real keys, hub transport)
//! │   └── integration/      # Cross-node consensus flows
//! └── benches/
//!     └── consensus_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # Integration flows only, with consensus logs
//! RUST_LOG=qc_08_dpos_consensus=debug cargo test -p qc-tests integration::
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

#![allow(dead_code)]

pub mod integration;
pub mod network;
