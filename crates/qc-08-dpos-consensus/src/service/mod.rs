//! # DPOS Consensus Service
//!
//! Entry point of the consensus core. It owns the controller manager and
//! the process manager and routes every input to the instance of its
//! height:
//!
//! ```text
//!  RoleUpdated ──→ ProcessManager.start + ControllerManager.new_block_start
//!  BlockRequest / PosedRequest / BlockVote / LocalRequest / Recovery ──→ Process
//!  InquiryReq ──→ Controller of the current height
//!  InquiryRsp / ReelectReq / ReelectVote / ResultBroadcast / BroadcastRsp ──→ Controller
//!
//!  Controller ──LeaderChange──→ Process        (loopback)
//!  Controller ──RecoveryState(Pos)──→ Process   (loopback)
//!  Process ──PosFinished──→ Controller          (loopback)
//! ```
//!
//! Errors inside a height are logged by the instance; `handle` only
//! reports routing failures (height outside the window, full inbox).

mod loopback;

use crate::domain::{ConsensusConfig, ConsensusMessage, ConsensusResult};
use crate::events::{ConsensusEvent, ConsensusInput, RecoveryKind, RoleUpdate};
use crate::ports::{ConsensusApi, ConsensusPorts};
use crate::reelection::{ControllerInput, ControllerManager};
use crate::verification::{ProcessInput, ProcessManager};
use async_trait::async_trait;
use loopback::LoopbackBus;
use parking_lot::Mutex;
use shared_types::{short_hex, Address};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct DposConsensusService {
    controllers: Mutex<ControllerManager>,
    processes: Mutex<ProcessManager>,
    config: Arc<ConsensusConfig>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl DposConsensusService {
    /// Creates the service and its loopback router.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ports: ConsensusPorts, config: ConsensusConfig) -> Arc<Self> {
        let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();
        let external = ports.event_bus.clone();
        let ports = ConsensusPorts {
            event_bus: Arc::new(LoopbackBus::new(external, loopback_tx)),
            ..ports
        };
        let config = Arc::new(config);

        let service = Arc::new(Self {
            controllers: Mutex::new(ControllerManager::new(ports.clone(), config.clone())),
            processes: Mutex::new(ProcessManager::new(ports, config.clone())),
            config,
            router: Mutex::new(None),
        });
        let router = tokio::spawn(route_loopback(Arc::downgrade(&service), loopback_rx));
        *service.router.lock() = Some(router);
        service
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Heights with a running controller.
    pub fn live_heights(&self) -> Vec<u64> {
        self.controllers.lock().live_numbers()
    }

    fn on_role_updated(&self, update: RoleUpdate) -> ConsensusResult<()> {
        let number = update.consensus_number();
        info!(
            number,
            role = %update.role,
            parent = %short_hex(&update.header.hash()),
            "New chain head"
        );
        self.processes.lock().start(number, update.role)?;
        self.controllers.lock().new_block_start(update.header)
    }

    fn route_message(&self, from: Address, message: ConsensusMessage) -> ConsensusResult<()> {
        let number = message.number();
        match message {
            ConsensusMessage::BlockRequest(request) | ConsensusMessage::PosedRequest(request) => self
                .processes
                .lock()
                .dispatch(number, ProcessInput::Request { from, request }),
            ConsensusMessage::BlockVote(vote) => {
                self.processes.lock().dispatch(number, ProcessInput::Vote(vote))
            }
            ConsensusMessage::MiningRequest(_) => {
                debug!(number, from = %short_hex(&from), "Mining request ignored");
                Ok(())
            }
            // Answered by the current height whatever height it names
            message @ ConsensusMessage::InquiryReq(_) => {
                let mut controllers = self.controllers.lock();
                let current = controllers.cur_number();
                controllers.dispatch(current, ControllerInput::Network { from, message })
            }
            message => self
                .controllers
                .lock()
                .dispatch(number, ControllerInput::Network { from, message }),
        }
    }

    /// Delivers an event published by one instance to its counterpart.
    fn route_internal(&self, event: ConsensusEvent) {
        let name = event.name();
        let result = match event {
            ConsensusEvent::LeaderChange(notify) => self
                .processes
                .lock()
                .dispatch(notify.number, ProcessInput::LeaderChange(notify)),
            ConsensusEvent::PosFinished(notify) => self
                .controllers
                .lock()
                .dispatch(notify.number, ControllerInput::PosFinished(notify)),
            ConsensusEvent::RecoveryState(request) if request.kind == RecoveryKind::Pos => self
                .processes
                .lock()
                .dispatch(request.header.number, ProcessInput::Recovery(request.header)),
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!(event = name, error = %e, "Loopback event dropped");
        }
    }
}

async fn route_loopback(
    service: Weak<DposConsensusService>,
    mut events: mpsc::UnboundedReceiver<ConsensusEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(service) = service.upgrade() else {
            break;
        };
        service.route_internal(event);
    }
}

#[async_trait]
impl ConsensusApi for DposConsensusService {
    async fn handle(&self, input: ConsensusInput) -> ConsensusResult<()> {
        match input {
            ConsensusInput::RoleUpdated(update) => self.on_role_updated(update),
            ConsensusInput::LeaderChange(notify) => self
                .processes
                .lock()
                .dispatch(notify.number, ProcessInput::LeaderChange(notify)),
            ConsensusInput::PosFinished(notify) => self
                .controllers
                .lock()
                .dispatch(notify.number, ControllerInput::PosFinished(notify)),
            ConsensusInput::LocalRequest(local) => self
                .processes
                .lock()
                .dispatch(local.request.header.number, ProcessInput::LocalRequest(local)),
            ConsensusInput::Recovery(header) => self
                .processes
                .lock()
                .dispatch(header.number, ProcessInput::Recovery(header)),
            ConsensusInput::Network { from, message } => self.route_message(from, message),
        }
    }

    fn current_number(&self) -> u64 {
        self.controllers.lock().cur_number()
    }
}

impl Drop for DposConsensusService {
    fn drop(&mut self) {
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
    }
}
