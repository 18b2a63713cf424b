//! # Channel Arbiter
//!
//! Single coordination point for opening AMQP channels off the shared
//! connection. Many tasks may request a channel concurrently; a dedicated
//! loop owns the only reference that performs the open, and a fixed worker
//! pool bounds how many opens are in flight so a recovering broker is not
//! overwhelmed. Requests beyond the pool queue up in the rendezvous and are
//! served as workers free up.
//!
//! Acquisition is a single attempt by design: a caller that receives `None`
//! backs off for the reconnect interval and decides itself whether to try
//! again.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lapin::Channel;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::connection::{is_connection_error, ConnectionManager};
use crate::resilience::TwoStepCircuitBreaker;

/// A pending request: the reply slot for an opened channel, `None` on
/// failure or rejection.
type ChannelRequest = oneshot::Sender<Option<Channel>>;

/// Arbiter counters. `peak_in_flight` never exceeds the configured worker
/// limit.
#[derive(Debug, Default)]
pub struct ArbiterStats {
    /// Requests answered with a channel
    pub served: AtomicU64,
    /// Requests answered with `None`
    pub rejected: AtomicU64,
    /// Channel-open calls currently in flight
    pub in_flight: AtomicUsize,
    /// Highest number of concurrent channel-open calls observed
    pub peak_in_flight: AtomicUsize,
}

/// Handle for requesting channels from the arbiter loop.
#[derive(Clone)]
pub(crate) struct ChannelArbiter {
    requests: mpsc::Sender<ChannelRequest>,
    stats: Arc<ArbiterStats>,
}

impl ChannelArbiter {
    /// Spawn the arbiter loop and return its handle.
    pub(crate) fn start(
        connection: Arc<ConnectionManager>,
        breaker: Arc<TwoStepCircuitBreaker>,
        max_workers: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        // Capacity 1 keeps this a rendezvous: excess requesters suspend in
        // send() until the loop gets to them.
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let stats = Arc::new(ArbiterStats::default());

        tokio::spawn(run_arbiter(
            requests_rx,
            connection,
            breaker,
            Arc::new(Semaphore::new(max_workers)),
            stats.clone(),
            shutdown,
        ));

        Self {
            requests: requests_tx,
            stats,
        }
    }

    /// Request a channel. Suspends until the arbiter serves or rejects the
    /// request; `None` means the caller should back off before retrying.
    pub(crate) async fn acquire(&self) -> Option<Channel> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests.send(reply_tx).await.ok()?;
        reply_rx.await.unwrap_or(None)
    }

    /// Retry acquisition with `backoff` between attempts until a channel is
    /// obtained or shutdown is signalled.
    pub(crate) async fn acquire_with_backoff(
        &self,
        backoff: Duration,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<Channel> {
        loop {
            if let Some(channel) = self.acquire().await {
                return Some(channel);
            }
            tokio::select! {
                _ = shutdown.recv() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    pub(crate) fn stats(&self) -> Arc<ArbiterStats> {
        self.stats.clone()
    }
}

async fn run_arbiter(
    mut requests: mpsc::Receiver<ChannelRequest>,
    connection: Arc<ConnectionManager>,
    breaker: Arc<TwoStepCircuitBreaker>,
    workers: Arc<Semaphore>,
    stats: Arc<ArbiterStats>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let reply = tokio::select! {
            _ = shutdown.recv() => break,
            request = requests.recv() => match request {
                Some(reply) => reply,
                None => break,
            },
        };

        // The semaphore is never closed; waiting here is what queues
        // requests once all workers are busy.
        let Ok(permit) = workers.clone().acquire_owned().await else {
            break;
        };
        tokio::spawn(open_channel(
            connection.clone(),
            breaker.clone(),
            permit,
            reply,
            stats.clone(),
        ));
    }
    debug!("channel arbiter stopped");
}

async fn open_channel(
    connection: Arc<ConnectionManager>,
    breaker: Arc<TwoStepCircuitBreaker>,
    permit: OwnedSemaphorePermit,
    reply: ChannelRequest,
    stats: Arc<ArbiterStats>,
) {
    let in_flight = stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
    stats.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);

    let channel = try_open(&connection, &breaker).await;
    match channel {
        Some(_) => stats.served.fetch_add(1, Ordering::Relaxed),
        None => stats.rejected.fetch_add(1, Ordering::Relaxed),
    };

    stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    // The requester may have given up; that is fine, the channel drops.
    let _ = reply.send(channel);
    drop(permit);
}

async fn try_open(
    connection: &ConnectionManager,
    breaker: &TwoStepCircuitBreaker,
) -> Option<Channel> {
    let call = match breaker.allow() {
        Ok(permit) => permit,
        Err(err) => {
            debug!(error = %err, "channel open rejected by breaker");
            return None;
        }
    };

    let Some(connection) = connection.current().await else {
        breaker.report(call, false);
        return None;
    };

    match connection.create_channel().await {
        Ok(channel) => {
            breaker.report(call, true);
            Some(channel)
        }
        Err(err) => {
            warn!(error = %err, "failed to open broker channel");
            breaker.report(call, !is_connection_error(&err));
            None
        }
    }
}
