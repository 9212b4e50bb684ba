//! Three-state circuit breaker.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

/// Fails fast once a downstream has misbehaved `failure_threshold` times in a
/// row, then periodically re-probes after `recovery_time` has elapsed.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_time: Duration,
    half_open_max_calls: u32,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failures: u32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_time: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_time,
            half_open_max_calls: 1,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                half_open_calls: 0,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call should currently be refused.
    ///
    /// Transitions `Open -> HalfOpen` once `recovery_time` has elapsed since
    /// the last failure, letting up to `half_open_max_calls` probes through.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(Duration::MAX, |t| t.elapsed());
                if elapsed >= self.recovery_time {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 0;
                    false
                } else {
                    true
                }
            }
            CircuitState::HalfOpen => inner.half_open_calls >= self.half_open_max_calls,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.half_open_calls = 0;
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_calls = 0;
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Marks the beginning of a half-open probe call, so `is_open` refuses
    /// concurrent probes beyond `half_open_max_calls`.
    pub fn begin_half_open_call(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_calls += 1;
        }
    }

    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        CircuitStats {
            state: inner.state,
            failures: inner.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        assert!(!breaker.is_open());

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "still below threshold");

        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_failure_counter_while_closed() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "counter should have reset on success");
    }

    #[test]
    fn half_open_failure_reopens_and_resets_timer() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(20));
        assert!(!breaker.is_open(), "should have moved to half-open");
        assert_eq!(breaker.stats().state, CircuitState::HalfOpen);

        breaker.record_failure();
        assert!(breaker.is_open(), "failure in half-open reopens immediately");
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!breaker.is_open());

        breaker.record_success();
        assert_eq!(breaker.stats().state, CircuitState::Closed);
        assert_eq!(breaker.stats().failures, 0);
    }
}
