//! # Circuit Breaker Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Number of probe calls allowed while half-open
    pub max_half_open_requests: u32,

    /// Interval after which the failure count is cleared while closed
    pub clear_interval: Duration,

    /// Time to wait in open state before probing recovery
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            max_half_open_requests: 5,
            clear_interval: Duration::from_secs(5),
            open_timeout: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.max_half_open_requests == 0 {
            return Err("max_half_open_requests must be greater than 0".to_string());
        }

        if self.open_timeout.is_zero() {
            return Err("open_timeout must be greater than 0".to_string());
        }

        if self.clear_interval.is_zero() {
            return Err("clear_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CircuitBreakerConfig {
            max_half_open_requests: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
