use serde::{Deserialize, Serialize};

use homeflow_core::EventId;

use crate::event::Event;

/// One broker message: key = entity id, value = the serialized event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    key: String,
    event_id: EventId,
    value: String,
}

impl StreamRecord {
    /// Serialize a kept event into its broker representation.
    pub fn from_event(event: &Event) -> Result<Self, serde_json::Error> {
        Ok(Self {
            key: event.entity_id().as_str().to_string(),
            event_id: event.id(),
            value: serde_json::to_string(event)?,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn decode(&self) -> Result<Event, serde_json::Error> {
        serde_json::from_str(&self.value)
    }
}
