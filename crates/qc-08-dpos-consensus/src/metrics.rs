//! # Consensus Metrics
//!
//! Prometheus metrics for the DPOS consensus core.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-08-dpos-consensus = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `dpos_leader_changes_total` - Counter of leader notifications published
//! - `dpos_reelections_total` - Counter of reelections, by outcome
//! - `dpos_proposals_verified_total` - Counter of local verifications, by result
//! - `dpos_votes_total` - Counter of block votes received, by outcome
//! - `dpos_pos_finished_total` - Counter of proposals that reached quorum
//! - `dpos_possible_forks_total` - Counter of quorums reached against a failed local verification
//! - `dpos_verify_latency_seconds` - Histogram of re-execution times

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, CounterVec, Histogram,
    IntCounter,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref LEADER_CHANGES: IntCounter = register_int_counter!(
        "dpos_leader_changes_total",
        "Total number of leader notifications published"
    )
    .expect("Failed to create LEADER_CHANGES metric");

    /// Reelections, labeled by outcome (started, reelected, pos)
    pub static ref REELECTIONS: CounterVec = register_counter_vec!(
        "dpos_reelections_total",
        "Total number of reelection events",
        &["outcome"]
    )
    .expect("Failed to create REELECTIONS metric");

    pub static ref PROPOSALS_VERIFIED: CounterVec = register_counter_vec!(
        "dpos_proposals_verified_total",
        "Total number of locally verified proposals",
        &["result"]
    )
    .expect("Failed to create PROPOSALS_VERIFIED metric");

    /// Block votes, labeled by outcome (accepted, pooled, rejected)
    pub static ref VOTES: CounterVec = register_counter_vec!(
        "dpos_votes_total",
        "Total number of block votes received",
        &["outcome"]
    )
    .expect("Failed to create VOTES metric");

    pub static ref POS_FINISHED: IntCounter = register_int_counter!(
        "dpos_pos_finished_total",
        "Total number of proposals that reached DPOS quorum"
    )
    .expect("Failed to create POS_FINISHED metric");

    pub static ref POSSIBLE_FORKS: IntCounter = register_int_counter!(
        "dpos_possible_forks_total",
        "Quorums reached for proposals that failed local verification"
    )
    .expect("Failed to create POSSIBLE_FORKS metric");

    pub static ref VERIFY_LATENCY: Histogram = register_histogram!(
        "dpos_verify_latency_seconds",
        "Time taken to fetch and re-execute a proposal in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to create VERIFY_LATENCY metric");
}

#[cfg(feature = "metrics")]
pub fn record_leader_change() {
    LEADER_CHANGES.inc();
}

#[cfg(feature = "metrics")]
pub fn record_reelection(outcome: &str) {
    REELECTIONS.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_proposal_verified(result: &str) {
    PROPOSALS_VERIFIED.with_label_values(&[result]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_vote(outcome: &str) {
    VOTES.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_pos_finished() {
    POS_FINISHED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_possible_fork() {
    POSSIBLE_FORKS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_verify_latency(seconds: f64) {
    VERIFY_LATENCY.observe(seconds);
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_leader_change() {}

#[cfg(not(feature = "metrics"))]
pub fn record_reelection(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_proposal_verified(_result: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_vote(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_pos_finished() {}

#[cfg(not(feature = "metrics"))]
pub fn record_possible_fork() {}

#[cfg(not(feature = "metrics"))]
pub fn record_verify_latency(_seconds: f64) {}
