//! # Queue Consumer
//!
//! Binds a queue to a route and streams raw delivery payloads to the caller.
//! Deliveries are acked on receipt: a payload the caller cannot use is
//! dropped, never redelivered.

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::message::Route;
use super::pipeline::declare_exchange;
use crate::errors::ClientResult;

/// Buffer between the delivery loop and the caller.
const DELIVERY_BUFFER: usize = 16;

/// Declare and bind `queue` to `route`, then stream delivery payloads.
///
/// The loop ends when shutdown is signalled, the broker closes the delivery
/// stream, or the caller drops the receiver.
pub(crate) async fn start(
    channel: Channel,
    client_name: &str,
    queue: &str,
    route: &Route,
    mut shutdown: broadcast::Receiver<()>,
) -> ClientResult<mpsc::Receiver<Vec<u8>>> {
    declare_exchange(&channel, route).await?;
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            queue,
            &route.exchange,
            &route.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let consumer_tag = format!("{}-{}", client_name, Uuid::new_v4());
    let mut deliveries = channel
        .basic_consume(
            queue,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
    let queue_name = queue.to_string();
    tokio::spawn(async move {
        loop {
            let delivery = tokio::select! {
                _ = shutdown.recv() => break,
                delivery = deliveries.next() => delivery,
            };
            let Some(delivery) = delivery else {
                debug!(queue = %queue_name, "delivery stream closed");
                break;
            };
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    warn!(queue = %queue_name, error = %err, "delivery stream failed");
                    break;
                }
            };

            // Ack first: an undecodable payload is dropped, not redelivered.
            if let Err(err) = channel
                .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                .await
            {
                warn!(queue = %queue_name, error = %err, "failed to ack delivery");
            }

            if tx.send(delivery.data).await.is_err() {
                // Caller dropped the stream.
                break;
            }
        }
        debug!(queue = %queue_name, "consumer stopped");
    });

    Ok(rx)
}
