//! # AMQP Client Core
//!
//! Message-level RabbitMQ client built from four cooperating pieces:
//!
//! - [`connection`] - owns the single physical connection and re-dials it
//!   on broker-side closure
//! - [`arbiter`] - serializes channel opens off the shared connection,
//!   bounded by a worker pool
//! - [`pipeline`] - drains the resilient publish queue through topology
//!   preparation and confirmed publishing
//! - [`consumer`] - binds queues and streams delivery payloads
//!
//! All background loops stop on one shutdown broadcast; [`RabbitClient::close`]
//! triggers it and closes the connection.

pub mod arbiter;
pub mod message;

pub(crate) mod connection;
pub(crate) mod consumer;
pub(crate) mod pipeline;

pub use arbiter::ArbiterStats;
pub use message::{Message, Route, CONTENT_TYPE_JSON};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::BrokerConfig;
use crate::errors::{ClientError, ClientResult};
use crate::resilience::TwoStepCircuitBreaker;

use arbiter::ChannelArbiter;
use connection::ConnectionManager;
use pipeline::PublishQueue;

/// Resilient message-level client for a RabbitMQ broker.
///
/// One instance per process is typical; all state is scoped to the instance
/// and torn down by [`RabbitClient::close`].
pub struct RabbitClient {
    config: BrokerConfig,
    connection: Arc<ConnectionManager>,
    arbiter: ChannelArbiter,
    queue: PublishQueue,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl RabbitClient {
    /// Dial the broker and start the background loops: redial, channel
    /// arbitration and both publish stages.
    pub async fn connect(config: BrokerConfig) -> ClientResult<Self> {
        config
            .validate()
            .map_err(|message| ClientError::configuration(message))?;

        let breaker = Arc::new(TwoStepCircuitBreaker::new(
            config.client_name.clone(),
            config.circuit_breaker.clone(),
        ));
        let (connection, notify_rx) = ConnectionManager::new(&config, breaker.clone());
        connection.dial().await?;

        let (shutdown, _) = broadcast::channel(1);
        tokio::spawn(
            connection
                .clone()
                .run_redial_loop(notify_rx, shutdown.subscribe()),
        );

        let arbiter = ChannelArbiter::start(
            connection.clone(),
            breaker,
            config.max_channel_workers,
            shutdown.subscribe(),
        );

        let (queue, queue_rx) = PublishQueue::new(config.queue_capacity);
        pipeline::spawn(
            arbiter.clone(),
            queue.clone(),
            queue_rx,
            config.reconnect_interval,
            config.client_name.clone(),
            &shutdown,
        );

        Ok(Self {
            config,
            connection,
            arbiter,
            queue,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Publish `message` synchronously: one channel acquisition, one
    /// topology declare, one confirmed publish. Every error surfaces to the
    /// caller undelayed.
    pub async fn publish(&self, message: Message) -> ClientResult<()> {
        let channel = self
            .arbiter
            .acquire()
            .await
            .ok_or_else(|| ClientError::unavailable("no broker channel available"))?;

        pipeline::declare_exchange(&channel, message.route()).await?;
        pipeline::publish_message(&channel, &message, &self.config.client_name).await?;
        Ok(())
    }

    /// Enqueue `message` for the resilient pipeline. Never blocks; fails
    /// only when the queue is at capacity or the client is closed.
    pub fn enqueue(&self, message: Message) -> ClientResult<()> {
        self.queue.enqueue(message)
    }

    /// Bind `queue` to `route` and stream raw delivery payloads.
    ///
    /// Setup errors (no channel, declare/bind failure) surface immediately;
    /// afterwards the stream lives until the client closes, the broker drops
    /// the consumer, or the receiver is dropped.
    pub async fn consume(&self, queue: &str, route: Route) -> ClientResult<mpsc::Receiver<Vec<u8>>> {
        let channel = self
            .arbiter
            .acquire()
            .await
            .ok_or_else(|| ClientError::unavailable("no broker channel available"))?;

        consumer::start(
            channel,
            &self.config.client_name,
            queue,
            &route,
            self.shutdown.subscribe(),
        )
        .await
    }

    /// Arbiter counters, useful for monitoring and tests.
    pub fn arbiter_stats(&self) -> Arc<ArbiterStats> {
        self.arbiter.stats()
    }

    /// Client configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Stop all background loops and close the active connection.
    /// Idempotent; pending resilient messages are discarded.
    pub async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown.send(());
        self.connection.close().await
    }
}
