//! Transport adapter
//!
//! Records outgoing messages instead of putting them on the wire.

use crate::domain::{ConsensusMessage, Target};
use crate::ports::Transport;
use parking_lot::Mutex;

#[derive(Default)]
pub struct InMemoryTransport {
    sent: Mutex<Vec<(ConsensusMessage, Target)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(ConsensusMessage, Target)> {
        self.sent.lock().clone()
    }

    /// Drains the recorded messages.
    pub fn take(&self) -> Vec<(ConsensusMessage, Target)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Messages of kind `name` (see [`ConsensusMessage::name`]).
    pub fn sent_of(&self, name: &str) -> Vec<(ConsensusMessage, Target)> {
        self.sent
            .lock()
            .iter()
            .filter(|(m, _)| m.name() == name)
            .cloned()
            .collect()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, message: ConsensusMessage, target: Target) -> Result<(), String> {
        self.sent.lock().push((message, target));
        Ok(())
    }
}
