//! # Publish Pipeline
//!
//! Two ordered stages drain the resilient publish queue:
//!
//! 1. **Topology stage** - ensures the destination exchange exists, then
//!    forwards the message unchanged.
//! 2. **Publish stage** - publishes with confirm; a failed message is
//!    re-enqueued after the reconnect interval and retried until the broker
//!    accepts it.
//!
//! Channels are short-lived: any error against one discards it and a fresh
//! channel is acquired for the next attempt. Pending messages are discarded
//! at shutdown; nothing is persisted.

use std::time::Duration;

use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::arbiter::ChannelArbiter;
use super::message::{Message, Route};
use crate::errors::{ClientError, ClientResult};

/// Handoff buffer between the topology and publish stages.
const PREPARED_BUFFER: usize = 1;

/// Many-producer entrance to the bounded publish queue.
#[derive(Clone)]
pub(crate) struct PublishQueue {
    tx: mpsc::Sender<Message>,
}

impl PublishQueue {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Non-blocking enqueue; fails fast once the queue is at capacity.
    pub(crate) fn enqueue(&self, message: Message) -> ClientResult<()> {
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ClientError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::Closed,
        })
    }

    /// Re-enqueue a failed message, handing it back on a full queue so the
    /// caller can keep retrying in place instead of dropping it.
    fn requeue(&self, message: Message) -> Result<(), Message> {
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(message)
            | mpsc::error::TrySendError::Closed(message) => message,
        })
    }
}

/// Spawn both pipeline stages.
pub(crate) fn spawn(
    arbiter: ChannelArbiter,
    queue: PublishQueue,
    queue_rx: mpsc::Receiver<Message>,
    backoff: Duration,
    app_id: String,
    shutdown: &broadcast::Sender<()>,
) {
    let (prepared_tx, prepared_rx) = mpsc::channel(PREPARED_BUFFER);
    tokio::spawn(run_topology_stage(
        arbiter.clone(),
        queue_rx,
        prepared_tx,
        backoff,
        shutdown.subscribe(),
    ));
    tokio::spawn(run_publish_stage(
        arbiter,
        prepared_rx,
        queue,
        backoff,
        app_id,
        shutdown.subscribe(),
    ));
}

async fn run_topology_stage(
    arbiter: ChannelArbiter,
    mut queue_rx: mpsc::Receiver<Message>,
    prepared_tx: mpsc::Sender<Message>,
    backoff: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.recv() => break,
            message = queue_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        // Declare until it sticks; a failed channel is never reused.
        loop {
            let Some(channel) = arbiter.acquire_with_backoff(backoff, &mut shutdown).await else {
                return;
            };
            match declare_exchange(&channel, message.route()).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        exchange = %message.route().exchange,
                        error = %err,
                        "exchange declare failed, retrying on a fresh channel"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        if prepared_tx.send(message).await.is_err() {
            break;
        }
    }
    debug!("topology stage stopped");
}

async fn run_publish_stage(
    arbiter: ChannelArbiter,
    mut prepared_rx: mpsc::Receiver<Message>,
    queue: PublishQueue,
    backoff: Duration,
    app_id: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let mut message = tokio::select! {
            _ = shutdown.recv() => break,
            message = prepared_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        loop {
            let Some(channel) = arbiter.acquire_with_backoff(backoff, &mut shutdown).await else {
                return;
            };
            match publish_message(&channel, &message, &app_id).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        routing_key = %message.route().routing_key,
                        error = %err,
                        "publish failed, requeueing for another attempt"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    match queue.requeue(message) {
                        // Back at the end of the queue; move on.
                        Ok(()) => break,
                        // Queue full: keep the message and retry in place.
                        Err(returned) => {
                            message = returned;
                        }
                    }
                }
            }
        }
    }
    debug!("publish stage stopped");
}

/// Idempotent declare of the destination exchange.
pub(crate) async fn declare_exchange(channel: &Channel, route: &Route) -> Result<(), lapin::Error> {
    channel
        .exchange_declare(
            &route.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
}

/// Publish one message and wait for the broker's confirmation.
pub(crate) async fn publish_message(
    channel: &Channel,
    message: &Message,
    app_id: &str,
) -> Result<(), lapin::Error> {
    let confirm = channel
        .basic_publish(
            &message.route().exchange,
            &message.route().routing_key,
            BasicPublishOptions::default(),
            message.body(),
            BasicProperties::default()
                .with_content_type(message.content_type().into())
                .with_app_id(app_id.into())
                .with_delivery_mode(2) // persistent
                .with_timestamp(message.timestamp().timestamp() as u64),
        )
        .await?;
    confirm.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventType};

    fn test_message(n: u8) -> Message {
        let event = Event::new("article", EventType::Created, vec![n]);
        Message::from_event("events", &event).unwrap()
    }

    #[tokio::test]
    async fn enqueue_fails_fast_at_capacity() {
        let (queue, _rx) = PublishQueue::new(2);

        queue.enqueue(test_message(1)).unwrap();
        queue.enqueue(test_message(2)).unwrap();

        assert!(matches!(
            queue.enqueue(test_message(3)),
            Err(ClientError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn queue_drains_in_fifo_order() {
        let (queue, mut rx) = PublishQueue::new(3);
        for n in 1..=3 {
            queue.enqueue(test_message(n)).unwrap();
        }

        for n in 1..=3u8 {
            let message = rx.recv().await.unwrap();
            let event: Event = serde_json::from_slice(message.body()).unwrap();
            assert_eq!(event.body, vec![n]);
        }
    }

    #[tokio::test]
    async fn requeue_returns_the_message_when_full() {
        let (queue, mut rx) = PublishQueue::new(1);
        queue.enqueue(test_message(1)).unwrap();

        let rejected = queue.requeue(test_message(2)).unwrap_err();
        let event: Event = serde_json::from_slice(rejected.body()).unwrap();
        assert_eq!(event.body, vec![2]);

        // after draining there is room again
        rx.recv().await.unwrap();
        assert!(queue.requeue(rejected).is_ok());
    }

    #[tokio::test]
    async fn enqueue_reports_closed_after_shutdown() {
        let (queue, rx) = PublishQueue::new(1);
        drop(rx);

        assert!(matches!(
            queue.enqueue(test_message(1)),
            Err(ClientError::Closed)
        ));
    }
}
