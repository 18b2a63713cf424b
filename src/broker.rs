//! # Event Broker Facade
//!
//! Event-level wrapper over [`RabbitClient`]: serializes domain events into
//! wire messages on the way out and decodes payloads on the way in. This is
//! the type the storage and RPC layers hold, through the [`Publisher`],
//! [`Consumer`] and [`Broker`] traits.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::amqp::{Message, RabbitClient, Route};
use crate::config::BrokerConfig;
use crate::errors::ClientResult;
use crate::event::{Broker, Consumer, Event, EventType, Publisher};

/// Buffer of decoded events handed to the caller.
const EVENT_BUFFER: usize = 16;

/// Resilient event broker client.
pub struct EventBroker {
    client: RabbitClient,
    exchange: String,
}

impl EventBroker {
    /// Dial the broker and start the client's background loops.
    pub async fn connect(config: BrokerConfig) -> ClientResult<Self> {
        let exchange = config.exchange.clone();
        let client = RabbitClient::connect(config).await?;
        Ok(Self { client, exchange })
    }

    /// The underlying message-level client.
    pub fn client(&self) -> &RabbitClient {
        &self.client
    }

    fn message_from_event(&self, event: &Event) -> ClientResult<Message> {
        Ok(Message::from_event(&self.exchange, event)?)
    }
}

#[async_trait]
impl Publisher for EventBroker {
    async fn publish(&self, event: Event) -> ClientResult<()> {
        let message = self.message_from_event(&event)?;
        self.client.publish(message).await
    }

    fn resilient_publish(&self, event: &Event) -> ClientResult<()> {
        let message = self.message_from_event(event)?;
        self.client.enqueue(message)
    }
}

#[async_trait]
impl Consumer for EventBroker {
    async fn consume(
        &self,
        queue: &str,
        event_type: EventType,
    ) -> ClientResult<mpsc::Receiver<Event>> {
        let route = Route::for_event_type(&self.exchange, event_type);
        let mut payloads = self.client.consume(queue, route).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let queue_name = queue.to_string();
        tokio::spawn(async move {
            while let Some(payload) = payloads.recv().await {
                match serde_json::from_slice::<Event>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    // Explicit at-most-once policy on malformed input: log
                    // and drop, the stream continues.
                    Err(err) => {
                        warn!(queue = %queue_name, error = %err, "dropping undecodable message");
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl Broker for EventBroker {
    async fn close(&self) -> ClientResult<()> {
        self.client.close().await
    }
}
