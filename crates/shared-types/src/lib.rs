//! # Shared Types Crate
//!
//! Primitive types used across the DPOS consensus workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: hashes, addresses and signatures are defined
//!   once here so that every crate agrees on their width.
//! - **Keccak Everywhere**: every fingerprint in the system is a Keccak-256
//!   digest produced with [`keccak256`].

pub mod entities;

pub use entities::*;
