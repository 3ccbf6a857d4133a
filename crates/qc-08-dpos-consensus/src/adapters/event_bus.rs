//! Event Bus adapter
//!
//! Implements the EventBus port by recording every published event.

use crate::events::{ConsensusEvent, LeaderChangeNotify};
use crate::ports::EventBus;
use async_trait::async_trait;

/// In-memory event bus adapter for testing
pub struct InMemoryEventBus {
    events: parking_lot::RwLock<Vec<ConsensusEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            events: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn get_events(&self) -> Vec<ConsensusEvent> {
        self.events.read().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Leader notifications in publication order.
    pub fn leader_changes(&self) -> Vec<LeaderChangeNotify> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                ConsensusEvent::LeaderChange(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_of(&self, name: &str) -> usize {
        self.events.read().iter().filter(|e| e.name() == name).count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: ConsensusEvent) -> Result<(), String> {
        self.events.write().push(event);
        Ok(())
    }
}
