//! Event bus seen by the per-height instances.
//!
//! Every event goes out to the node's bus. Leader changes, finished POS
//! notifications and POS recoveries are also queued for the service
//! router, which feeds them to the process and controller of their height.

use crate::events::{ConsensusEvent, RecoveryKind};
use crate::ports::EventBus;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(super) struct LoopbackBus {
    external: Arc<dyn EventBus>,
    loopback: mpsc::UnboundedSender<ConsensusEvent>,
}

impl LoopbackBus {
    pub(super) fn new(
        external: Arc<dyn EventBus>,
        loopback: mpsc::UnboundedSender<ConsensusEvent>,
    ) -> Self {
        Self { external, loopback }
    }
}

#[async_trait]
impl EventBus for LoopbackBus {
    async fn publish(&self, event: ConsensusEvent) -> Result<(), String> {
        let internal = match &event {
            ConsensusEvent::LeaderChange(_) | ConsensusEvent::PosFinished(_) => true,
            ConsensusEvent::RecoveryState(request) => request.kind == RecoveryKind::Pos,
            ConsensusEvent::BlockVerified(_) => false,
        };
        if internal {
            // Router gone means the service is shutting down
            let _ = self.loopback.send(event.clone());
        }
        self.external.publish(event).await
    }
}
