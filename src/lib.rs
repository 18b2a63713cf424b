//! # AMQP Eventbus
//!
//! Resilient RabbitMQ client for publishing and consuming domain events.
//!
//! The crate keeps a single physical broker connection alive across broker
//! restarts and network partitions, arbitrates concurrent access to AMQP
//! channels drawn from that connection, circuit-breaks dial and channel-open
//! attempts against a failing broker, and guarantees at least one delivery
//! attempt for every enqueued event without blocking callers.
//!
//! ## Architecture
//!
//! - [`amqp`] - connection management, channel arbitration, the publish
//!   pipeline and the queue consumer
//! - [`broker`] - event-level facade tying the wire client to the domain
//!   [`event`] types
//! - [`event`] - domain events, wire codec and the in-process dispatcher
//! - [`resilience`] - two-step circuit breaker guarding broker calls
//! - [`config`] - immutable client tunables
//! - [`errors`] - structured error types
//!
//! ## Usage
//!
//! ```ignore
//! use amqp_eventbus::{BrokerConfig, Event, EventBroker, EventType, Publisher, Consumer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = EventBroker::connect(BrokerConfig::from_env()).await?;
//!
//! // Fire-and-forget with guaranteed eventual delivery
//! let event = Event::new("article", EventType::Created, br#"{"id":"1"}"#.to_vec());
//! broker.resilient_publish(&event)?;
//!
//! // Live decoded event stream
//! let mut events = broker.consume("article-service", EventType::Created).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.entity, event.event_type);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery semantics
//!
//! Publishing is at-least-once: the resilient path retries a queued event
//! until the broker accepts it. Consuming is at-most-once per received
//! message: a payload that fails to decode is logged and dropped, never
//! redelivered.

pub mod amqp;
pub mod broker;
pub mod config;
pub mod errors;
pub mod event;
pub mod logging;
pub mod resilience;

pub use amqp::{ArbiterStats, Message, RabbitClient, Route};
pub use broker::EventBroker;
pub use config::BrokerConfig;
pub use errors::{ClientError, ClientResult};
pub use event::{Broker, Consumer, Dispatcher, Event, EventType, Handler, Publisher};
pub use resilience::{CircuitBreakerConfig, CircuitState};
