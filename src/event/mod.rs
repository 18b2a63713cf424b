//! # Event Module
//!
//! Domain events, their wire codec, and the seams upstream layers program
//! against. The storage and RPC layers depend only on the [`Publisher`],
//! [`Consumer`] and [`Broker`] traits; [`crate::EventBroker`] is the
//! production implementation.

pub mod dispatcher;
pub mod types;

pub use dispatcher::{Dispatcher, Handler};
pub use types::{Event, EventType};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::ClientResult;

/// Publishes domain events to the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `event` synchronously: one delivery attempt, every broker or
    /// serialization error surfaces to the caller.
    async fn publish(&self, event: Event) -> ClientResult<()>;

    /// Enqueue `event` for guaranteed eventual delivery. Fails only when the
    /// event cannot be serialized or the publish queue is at capacity;
    /// never blocks.
    fn resilient_publish(&self, event: &Event) -> ClientResult<()>;
}

/// Consumes subscribed event streams from the broker.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Bind `queue` to the routing key of `event_type` and stream decoded
    /// events. The stream is live and single-pass: it ends when the client
    /// closes or the receiver is dropped, and cannot be restarted.
    async fn consume(&self, queue: &str, event_type: EventType)
        -> ClientResult<mpsc::Receiver<Event>>;
}

/// Full broker contract required by the upstream layers.
#[async_trait]
pub trait Broker: Publisher + Consumer {
    /// Shut down background loops and close the broker connection.
    /// Idempotent.
    async fn close(&self) -> ClientResult<()>;
}
