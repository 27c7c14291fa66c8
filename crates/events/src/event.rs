//! State-change events received from a connected hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use homeflow_core::{ConnectionId, EntityId, EventId};

/// An ingested hub event.
///
/// Immutable once constructed: there are no setters, only consuming
/// `with_*` builders used at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    connection_id: ConnectionId,
    timestamp: DateTime<Utc>,
    event_type: String,
    entity_id: EntityId,
    old_state: Option<String>,
    new_state: Option<String>,
    #[serde(default)]
    attributes: Map<String, JsonValue>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("payload does not match the hub event shape: {0}")]
    Shape(String),

    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),
}

impl Event {
    pub fn new(
        connection_id: ConnectionId,
        entity_id: EntityId,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            connection_id,
            timestamp,
            event_type: event_type.into(),
            entity_id,
            old_state: None,
            new_state: None,
            attributes: Map::new(),
        }
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    pub fn with_states(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_state = old;
        self.new_state = new;
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, JsonValue>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Parse a raw hub payload.
    ///
    /// Accepts either a bare event object or the websocket wrapper
    /// `{"type": "event", "event": {...}}`. A missing `time_fired` falls back
    /// to `received_at`.
    pub fn from_hub_payload(
        connection_id: ConnectionId,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Self, IngestError> {
        let value: JsonValue =
            serde_json::from_str(raw).map_err(|e| IngestError::NotJson(e.to_string()))?;

        let event_value = match value {
            JsonValue::Object(mut obj)
                if obj.get("type").and_then(JsonValue::as_str) == Some("event") =>
            {
                obj.remove("event").ok_or(IngestError::MissingField("event"))?
            }
            other => other,
        };

        let hub: HubEvent =
            serde_json::from_value(event_value).map_err(|e| IngestError::Shape(e.to_string()))?;

        let entity_id = hub
            .data
            .entity_id
            .filter(|s| !s.trim().is_empty())
            .ok_or(IngestError::MissingField("entity_id"))?;

        let attributes = hub
            .data
            .new_state
            .as_ref()
            .or(hub.data.old_state.as_ref())
            .map(|s| s.attributes.clone())
            .unwrap_or_default();

        Ok(Event::new(
            connection_id,
            EntityId::new(entity_id),
            hub.event_type,
            hub.time_fired.unwrap_or(received_at),
        )
        .with_states(
            hub.data.old_state.map(|s| s.state),
            hub.data.new_state.map(|s| s.state),
        )
        .with_attributes(attributes))
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn old_state(&self) -> Option<&str> {
        self.old_state.as_deref()
    }

    pub fn new_state(&self) -> Option<&str> {
        self.new_state.as_deref()
    }

    pub fn attributes(&self) -> &Map<String, JsonValue> {
        &self.attributes
    }

    /// `attributes.device_class`, when present as a string.
    pub fn device_class(&self) -> Option<&str> {
        self.attributes.get("device_class").and_then(JsonValue::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct HubEvent {
    event_type: String,
    #[serde(default)]
    time_fired: Option<DateTime<Utc>>,
    #[serde(default)]
    data: HubEventData,
}

#[derive(Debug, Default, Deserialize)]
struct HubEventData {
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    old_state: Option<HubState>,
    #[serde(default)]
    new_state: Option<HubState>,
}

#[derive(Debug, Deserialize)]
struct HubState {
    state: String,
    #[serde(default)]
    attributes: Map<String, JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn parses_bare_state_changed_event() {
        let raw = json!({
            "event_type": "state_changed",
            "time_fired": "2026-03-01T10:00:00Z",
            "data": {
                "entity_id": "light.kitchen",
                "old_state": {"state": "off", "attributes": {}},
                "new_state": {"state": "on", "attributes": {"brightness": 200}}
            }
        })
        .to_string();

        let conn = ConnectionId::new();
        let ev = Event::from_hub_payload(conn, &raw, now()).unwrap();

        assert_eq!(ev.connection_id(), conn);
        assert_eq!(ev.entity_id().as_str(), "light.kitchen");
        assert_eq!(ev.old_state(), Some("off"));
        assert_eq!(ev.new_state(), Some("on"));
        assert_eq!(ev.attributes()["brightness"], json!(200));
        assert_eq!(ev.timestamp().to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }

    #[test]
    fn unwraps_websocket_envelope_and_defaults_time() {
        let raw = json!({
            "type": "event",
            "event": {
                "event_type": "state_changed",
                "data": {"entity_id": "switch.fan", "new_state": {"state": "on"}}
            }
        })
        .to_string();

        let received = now();
        let ev = Event::from_hub_payload(ConnectionId::new(), &raw, received).unwrap();
        assert_eq!(ev.timestamp(), received);
        assert_eq!(ev.old_state(), None);
    }

    #[test]
    fn rejects_non_json() {
        let err = Event::from_hub_payload(ConnectionId::new(), "{not json", now()).unwrap_err();
        assert!(matches!(err, IngestError::NotJson(_)));
    }

    #[test]
    fn rejects_missing_entity_id() {
        let raw = json!({"event_type": "state_changed", "data": {}}).to_string();
        let err = Event::from_hub_payload(ConnectionId::new(), &raw, now()).unwrap_err();
        assert_eq!(err, IngestError::MissingField("entity_id"));
    }

    #[test]
    fn rejects_wrong_shape() {
        let err = Event::from_hub_payload(ConnectionId::new(), "[1,2,3]", now()).unwrap_err();
        assert!(matches!(err, IngestError::Shape(_)));
    }
}
