//! Driving ports (Inbound API)

use crate::domain::ConsensusResult;
use crate::events::ConsensusInput;
use async_trait::async_trait;

/// Primary consensus API
#[async_trait]
pub trait ConsensusApi: Send + Sync {
    /// Routes one input to the controller and/or process of its height.
    ///
    /// Inputs for heights outside the legal window are rejected; protocol
    /// errors inside a height are logged there and never returned here.
    async fn handle(&self, input: ConsensusInput) -> ConsensusResult<()>;

    /// Height consensus is currently running for.
    fn current_number(&self) -> u64;
}
