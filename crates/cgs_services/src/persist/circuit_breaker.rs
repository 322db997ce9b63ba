//! Circuit breaker around flaky downstream calls.
//!
//! Closed passes calls through and counts consecutive failures; at the
//! failure threshold the breaker opens and rejects immediately. After the
//! recovery timeout it half-opens, letting probe calls through; enough
//! consecutive probe successes close it again, any probe failure re-opens.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use cgs_foundation::error::{CgsError, CgsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long to stay open before probing.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the breaker.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    rejected: u64,
}

/// State machine guarding a downstream dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
                rejected: 0,
            }),
        }
    }

    /// Runs `f` if the breaker allows it, recording the outcome.
    ///
    /// # Errors
    /// Returns [`CgsError::CircuitOpen`] without calling `f` while open;
    /// otherwise propagates `f`'s own error.
    pub fn call<T>(&self, f: impl FnOnce() -> CgsResult<T>) -> CgsResult<T> {
        if !self.allow() {
            self.inner.lock().rejected += 1;
            return Err(CgsError::CircuitOpen(self.name.clone()));
        }
        match f() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Calls rejected while open.
    pub fn rejected_count(&self) -> u64 {
        self.inner.lock().rejected
    }

    /// Manually re-closes the breaker, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.opened_at = None;
    }

    fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    info!(breaker = %self.name, "half-opening after recovery timeout");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    info!(breaker = %self.name, "closing after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(breaker = %self.name, failures = inner.consecutive_failures, "opening circuit");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, re-opening circuit");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, recovery: Duration, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "db",
            CircuitBreakerConfig {
                failure_threshold: failures,
                recovery_timeout: recovery,
                success_threshold: successes,
            },
        )
    }

    fn fail(b: &CircuitBreaker) {
        let _ = b.call::<()>(|| Err(CgsError::Timeout("downstream".into())));
    }

    #[test]
    fn failures_open_the_circuit() {
        let b = breaker(3, Duration::from_secs(60), 1);
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Closed);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);

        let err = b.call(|| Ok(())).unwrap_err();
        assert!(matches!(err, CgsError::CircuitOpen(_)));
        assert_eq!(b.rejected_count(), 1);
    }

    #[test]
    fn success_resets_failure_streak() {
        let b = breaker(3, Duration::from_secs(60), 1);
        fail(&b);
        fail(&b);
        b.call(|| Ok(())).unwrap();
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn recovery_probes_then_closes() {
        let b = breaker(1, Duration::from_millis(5), 2);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(10));
        b.call(|| Ok(())).unwrap();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.call(|| Ok(())).unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn probe_failure_reopens() {
        let b = breaker(1, Duration::from_millis(5), 2);
        fail(&b);
        std::thread::sleep(Duration::from_millis(10));
        fail(&b); // probe fails
        assert_eq!(b.state(), BreakerState::Open);
        // Rejections resume immediately.
        assert!(matches!(
            b.call(|| Ok(())),
            Err(CgsError::CircuitOpen(_))
        ));
    }

    #[test]
    fn manual_reset_closes() {
        let b = breaker(1, Duration::from_secs(60), 1);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        b.call(|| Ok(())).unwrap();
    }

    #[test]
    fn underlying_error_passes_through_when_closed() {
        let b = breaker(5, Duration::from_secs(60), 1);
        let err = b
            .call::<()>(|| Err(CgsError::Timeout("db".into())))
            .unwrap_err();
        assert!(matches!(err, CgsError::Timeout(_)));
    }
}
