//! Per-provider circuit breaker (C1, spec §4.1).
//!
//! Closed → Open on `max_failures` consecutive failures. Open → Half-open
//! once `reset_timeout` elapses. Half-open admits up to `half_open_probes`
//! concurrent calls; the first success closes it, any failure reopens it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub reset_timeout: Duration,
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_probes: 3,
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
}

/// A single provider's breaker. The mutex guards only the state transition;
/// the wrapped call itself runs outside the lock.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// A permit returned by [`CircuitBreaker::allow`]. Must be resolved with
/// [`CircuitBreaker::record_success`] or [`CircuitBreaker::record_failure`].
pub struct Admission {
    was_half_open_probe: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_inflight: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Returns `Some(Admission)` if the call should proceed, `None` if it
    /// should fail fast as `ProviderUnavailable`.
    pub fn allow(&self) -> Option<Admission> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Some(Admission {
                was_half_open_probe: false,
            }),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_probes {
                    inner.half_open_inflight += 1;
                    Some(Admission {
                        was_half_open_probe: true,
                    })
                } else {
                    None
                }
            }
        }
    }

    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if admission.was_half_open_probe {
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if admission.was_half_open_probe {
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }

        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.max_failures {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_inflight = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 3,
            reset_timeout: Duration::from_millis(20),
            half_open_probes: 2,
        })
    }

    #[test]
    fn opens_after_max_failures() {
        let b = breaker();
        for _ in 0..3 {
            let a = b.allow().expect("should admit while closed");
            b.record_failure(a);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.allow().is_none());
    }

    #[test]
    fn success_resets_failure_count() {
        let b = breaker();
        for _ in 0..2 {
            let a = b.allow().unwrap();
            b.record_failure(a);
        }
        let a = b.allow().unwrap();
        b.record_success(a);

        for _ in 0..2 {
            let a = b.allow().unwrap();
            b.record_failure(a);
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_reset_timeout_and_closes_on_success() {
        let b = breaker();
        for _ in 0..3 {
            let a = b.allow().unwrap();
            b.record_failure(a);
        }
        assert_eq!(b.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let a = b.allow().expect("half-open should admit a probe");
        b.record_success(a);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breaker();
        for _ in 0..3 {
            let a = b.allow().unwrap();
            b.record_failure(a);
        }
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let a = b.allow().unwrap();
        b.record_failure(a);
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_at_most_configured_probes() {
        let b = breaker();
        for _ in 0..3 {
            let a = b.allow().unwrap();
            b.record_failure(a);
        }
        std::thread::sleep(Duration::from_millis(25));

        let _p1 = b.allow().expect("first probe admitted");
        let _p2 = b.allow().expect("second probe admitted");
        assert!(b.allow().is_none(), "third concurrent probe must be rejected");
    }
}
