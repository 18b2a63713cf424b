//! # Domain Event Types
//!
//! The wire shape is shared with every other service on the exchange:
//! `{ entity, type, body, timestamp }` with an RFC3339 timestamp and a
//! base64-encoded body, tagged `application/json`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl EventType {
    /// Routing key for this event type.
    ///
    /// Stable by construction: producers and consumers derive it
    /// independently and must agree without coordination.
    pub fn routing_key(&self) -> &'static str {
        match self {
            EventType::Created => "event.created",
            EventType::Updated => "event.updated",
            EventType::Deleted => "event.deleted",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event as published to and consumed from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Entity the event concerns (e.g. "article")
    pub entity: String,

    /// Kind of change
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Opaque payload; base64 on the wire
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,

    /// When the event occurred, RFC3339
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(entity: impl Into<String>, event_type: EventType, body: Vec<u8>) -> Self {
        Self {
            entity: entity.into(),
            event_type,
            body,
            timestamp: Utc::now(),
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn routing_keys_are_stable() {
        assert_eq!(EventType::Created.routing_key(), "event.created");
        assert_eq!(EventType::Updated.routing_key(), "event.updated");
        assert_eq!(EventType::Deleted.routing_key(), "event.deleted");
    }

    #[test]
    fn wire_shape_matches_the_contract() {
        let event = Event {
            entity: "article".to_string(),
            event_type: EventType::Created,
            body: b"payload".to_vec(),
            timestamp: "2024-05-01T12:30:45Z".parse().unwrap(),
        };

        let wire: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["entity"], "article");
        assert_eq!(wire["type"], "created");
        assert_eq!(wire["body"], BASE64.encode(b"payload"));
        assert_eq!(wire["timestamp"], "2024-05-01T12:30:45Z");
    }

    #[test]
    fn unknown_event_type_fails_to_decode() {
        let wire = r#"{"entity":"a","type":"renamed","body":"","timestamp":"2024-05-01T12:30:45Z"}"#;
        assert!(serde_json::from_str::<Event>(wire).is_err());
    }

    proptest! {
        #[test]
        fn events_round_trip_byte_identical(
            entity in "[a-z]{1,16}",
            body in proptest::collection::vec(any::<u8>(), 0..512),
            kind in 0usize..3,
        ) {
            let event_type = [EventType::Created, EventType::Updated, EventType::Deleted][kind];
            let event = Event::new(entity, event_type, body);

            let encoded = serde_json::to_vec(&event).unwrap();
            let decoded: Event = serde_json::from_slice(&encoded).unwrap();
            prop_assert_eq!(event, decoded);
        }
    }
}
