//! # Client Error Types
//!
//! Structured error handling for the event client using thiserror.
//!
//! The variants follow the failure taxonomy of the client: serialization and
//! capacity errors are final for the call that hit them, breaker rejections
//! and broker errors are transient and retried on the resilient paths.

use thiserror::Error;

use crate::resilience::CircuitBreakerError;

/// Errors surfaced by the event client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The event could not be encoded or decoded. Never retried.
    #[error("event serialization failed: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// The resilient publish queue is at capacity. The caller decides how to
    /// shed load; the client never blocks on a full queue.
    #[error("publish queue is at capacity")]
    QueueFull,

    /// The circuit breaker rejected the call without reaching the broker.
    #[error(transparent)]
    Breaker(#[from] CircuitBreakerError),

    /// No broker channel could be acquired for the operation.
    #[error("broker unavailable: {message}")]
    Unavailable { message: String },

    /// The broker reported an error for an operation that reached it.
    #[error("broker operation failed: {source}")]
    Broker {
        #[from]
        source: lapin::Error,
    },

    /// The supplied configuration is invalid.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}

impl ClientError {
    /// Create an unavailability error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether retrying the operation later can succeed.
    ///
    /// Serialization, configuration and capacity errors are final for the
    /// call; everything else clears up once the broker recovers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Breaker(_) | Self::Unavailable { .. } | Self::Broker { .. }
        )
    }
}

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_errors_are_final() {
        let err = ClientError::from(serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err());
        assert!(!err.is_transient());
        assert!(!ClientError::QueueFull.is_transient());
        assert!(!ClientError::configuration("bad").is_transient());
    }

    #[test]
    fn broker_errors_are_transient() {
        assert!(ClientError::unavailable("no channel").is_transient());
        assert!(ClientError::Breaker(CircuitBreakerError::Open).is_transient());
    }
}
