//! # Two-Step Circuit Breaker
//!
//! Classic three-state circuit breaker with a request-then-report protocol:
//! Closed (normal operation), Open (failing fast), and HalfOpen (testing
//! recovery).
//!
//! Callers obtain a [`CallPermit`] via [`TwoStepCircuitBreaker::allow`],
//! perform the guarded operation, and hand the permit back through
//! [`TwoStepCircuitBreaker::report`] with the outcome. Because the outcome is
//! reported separately, the caller can classify the error first and report
//! success for failures that do not indicate an unhealthy dependency.
//!
//! Permits carry the generation they were issued under; a report that
//! arrives after the breaker has transitioned is discarded so stale probes
//! cannot corrupt the new state.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::config::CircuitBreakerConfig;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation - calls are allowed through
    Closed,
    /// Failure mode - all calls are rejected without executing
    Open,
    /// Testing recovery - a bounded number of probe calls is allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

/// Rejections returned by [`TwoStepCircuitBreaker::allow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    /// The circuit is open; the call was rejected without executing
    #[error("circuit breaker is open")]
    Open,

    /// The circuit is half-open and all probe slots are taken
    #[error("circuit breaker allows no further half-open probes")]
    TooManyRequests,
}

/// Permission to perform one guarded call.
///
/// Must be handed back through [`TwoStepCircuitBreaker::report`] once the
/// outcome of the call is known.
#[must_use = "report the outcome of the call back to the breaker"]
#[derive(Debug)]
pub struct CallPermit {
    generation: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every state transition; stale permits are ignored.
    generation: u64,
    consecutive_failures: u32,
    half_open_requests: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    window_started: Instant,
}

/// Two-step circuit breaker guarding broker dial and channel-open attempts
#[derive(Debug)]
pub struct TwoStepCircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl TwoStepCircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            max_half_open_requests = config.max_half_open_requests,
            open_timeout_ms = config.open_timeout.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                half_open_requests: 0,
                half_open_successes: 0,
                opened_at: None,
                window_started: Instant::now(),
            }),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Request permission for one call.
    pub fn allow(&self) -> Result<CallPermit, CircuitBreakerError> {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(CallPermit {
                generation: inner.generation,
            }),
            CircuitState::Open => Err(CircuitBreakerError::Open),
            CircuitState::HalfOpen => {
                if inner.half_open_requests < self.config.max_half_open_requests {
                    inner.half_open_requests += 1;
                    Ok(CallPermit {
                        generation: inner.generation,
                    })
                } else {
                    Err(CircuitBreakerError::TooManyRequests)
                }
            }
        }
    }

    /// Report the outcome of a permitted call.
    pub fn report(&self, permit: CallPermit, success: bool) {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);

        if permit.generation != inner.generation {
            debug!(breaker = %self.name, "discarding stale breaker report");
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.max_half_open_requests {
                    self.reset(&mut inner);
                }
            }
            (CircuitState::HalfOpen, false) => {
                self.trip(&mut inner);
            }
            // No permits are issued while open; nothing to record.
            (CircuitState::Open, _) => {}
        }
    }

    /// Apply timer-driven transitions before inspecting state.
    fn advance(&self, inner: &mut BreakerInner) {
        match inner.state {
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_timeout);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.generation += 1;
                    inner.half_open_requests = 0;
                    inner.half_open_successes = 0;
                    info!(
                        breaker = %self.name,
                        max_half_open_requests = self.config.max_half_open_requests,
                        "🟡 Circuit breaker half-open (testing recovery)"
                    );
                }
            }
            CircuitState::Closed => {
                if inner.window_started.elapsed() >= self.config.clear_interval {
                    inner.consecutive_failures = 0;
                    inner.window_started = Instant::now();
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.generation += 1;
        inner.opened_at = Some(Instant::now());
        error!(
            breaker = %self.name,
            consecutive_failures = inner.consecutive_failures,
            open_timeout_ms = self.config.open_timeout.as_millis() as u64,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    fn reset(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.consecutive_failures = 0;
        inner.half_open_requests = 0;
        inner.half_open_successes = 0;
        inner.opened_at = None;
        inner.window_started = Instant::now();
        info!(breaker = %self.name, "🟢 Circuit breaker closed (recovered)");
    }

    /// Get breaker name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            max_half_open_requests: 2,
            clear_interval: Duration::from_millis(100),
            open_timeout: Duration::from_millis(50),
        }
    }

    fn breaker() -> TwoStepCircuitBreaker {
        TwoStepCircuitBreaker::new("test", test_config())
    }

    #[test]
    fn normal_operation_stays_closed() {
        let breaker = breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..10 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, true);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn trips_after_consecutive_failures() {
        let breaker = breaker();

        for _ in 0..2 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
            assert_eq!(breaker.state(), CircuitState::Closed);
        }

        let permit = breaker.allow().unwrap();
        breaker.report(permit, false);
        assert_eq!(breaker.state(), CircuitState::Open);

        assert_eq!(breaker.allow().unwrap_err(), CircuitBreakerError::Open);
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = breaker();

        for _ in 0..2 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
        }
        let permit = breaker.allow().unwrap();
        breaker.report(permit, true);

        // two more failures stay below the threshold again
        for _ in 0..2 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn clear_interval_resets_the_failure_count() {
        let breaker = breaker();

        for _ in 0..2 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
        }
        std::thread::sleep(Duration::from_millis(120));

        for _ in 0..2 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_bounds_probe_count() {
        let breaker = breaker();
        for _ in 0..3 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
        }
        std::thread::sleep(Duration::from_millis(60));

        let first = breaker.allow().unwrap();
        let _second = breaker.allow().unwrap();
        assert_eq!(
            breaker.allow().unwrap_err(),
            CircuitBreakerError::TooManyRequests
        );

        // a probe failure reopens immediately
        breaker.report(first, false);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn recovers_through_half_open_probes() {
        let breaker = breaker();
        for _ in 0..3 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
        }
        std::thread::sleep(Duration::from_millis(60));

        let first = breaker.allow().unwrap();
        let second = breaker.allow().unwrap();
        breaker.report(first, true);
        breaker.report(second, true);

        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn stale_reports_are_discarded() {
        let breaker = breaker();

        let stale = breaker.allow().unwrap();
        for _ in 0..3 {
            let permit = breaker.allow().unwrap();
            breaker.report(permit, false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // issued before the trip; must not count as a probe success
        breaker.report(stale, true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }
}
