//! # Wire Messages
//!
//! Outbound units handed to the publish pipeline. A [`Message`] is immutable
//! once constructed; retries republish the same bytes.

use chrono::{DateTime, Utc};

use crate::event::{Event, EventType};

/// Content type tag for event payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Where a message goes: the exchange it is published to and the routing key
/// subscribers bind with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub exchange: String,
    pub routing_key: String,
}

impl Route {
    /// Derive the route for `event_type` within `exchange`.
    pub fn for_event_type(exchange: impl Into<String>, event_type: EventType) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: event_type.routing_key().to_string(),
        }
    }
}

/// An outbound message: routing information plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    route: Route,
    content_type: String,
    body: Vec<u8>,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with an arbitrary payload.
    pub fn new(route: Route, body: Vec<u8>) -> Self {
        Self {
            route,
            content_type: CONTENT_TYPE_JSON.to_string(),
            body,
            timestamp: Utc::now(),
        }
    }

    /// Serialize `event` into a message routed within `exchange`.
    pub fn from_event(exchange: &str, event: &Event) -> Result<Self, serde_json::Error> {
        Ok(Self {
            route: Route::for_event_type(exchange, event.event_type),
            content_type: CONTENT_TYPE_JSON.to_string(),
            body: serde_json::to_vec(event)?,
            timestamp: event.timestamp,
        })
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_follows_the_event_type() {
        let route = Route::for_event_type("events", EventType::Updated);
        assert_eq!(route.exchange, "events");
        assert_eq!(route.routing_key, "event.updated");
    }

    #[test]
    fn message_carries_the_serialized_event() {
        let event = Event::new("article", EventType::Created, b"body".to_vec());
        let message = Message::from_event("events", &event).unwrap();

        assert_eq!(message.route().routing_key, "event.created");
        assert_eq!(message.content_type(), CONTENT_TYPE_JSON);
        assert_eq!(message.timestamp(), event.timestamp);

        let decoded: Event = serde_json::from_slice(message.body()).unwrap();
        assert_eq!(decoded, event);
    }
}
