//! Circuit breaker gating every outbound call.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time snapshot of the breaker's counters.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub half_open_in_flight: u32,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure_time: Option<Instant>,
    half_open_in_flight: u32,
}

impl Inner {
    fn transition_to(&mut self, new_state: CircuitState) {
        let old = self.state;
        self.state = new_state;
        self.failures = 0;
        self.successes = 0;
        tracing::debug!("circuit breaker: {old:?} -> {new_state:?}");
    }
}

/// Three-state circuit breaker.
///
/// CLOSED counts consecutive failures and opens at the threshold. OPEN
/// refuses calls until the reset timeout elapses, then admits probes in
/// HALF_OPEN up to the in-flight cap. Enough half-open successes close the
/// circuit again; any half-open failure reopens it.
///
/// The whole mutation surface is serialized by one mutex.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    half_open_max_in_flight: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, 2, Duration::from_secs(30), 1)
    }
}

impl CircuitBreaker {
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        reset_timeout: Duration,
        half_open_max_in_flight: u32,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure_time: None,
                half_open_in_flight: 0,
            }),
            failure_threshold,
            success_threshold,
            reset_timeout,
            half_open_max_in_flight,
        }
    }

    /// Whether a call may be dispatched now.
    ///
    /// In OPEN, an elapsed reset timeout transitions to HALF_OPEN and the
    /// triggering call proceeds as the first probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(false);
                if !elapsed {
                    return false;
                }
                inner.transition_to(CircuitState::HalfOpen);
                inner.half_open_in_flight = 0;
                self.admit_half_open(&mut inner)
            }
            CircuitState::HalfOpen => self.admit_half_open(&mut inner),
        }
    }

    fn admit_half_open(&self, inner: &mut Inner) -> bool {
        if inner.half_open_in_flight < self.half_open_max_in_flight {
            inner.half_open_in_flight += 1;
            true
        } else {
            false
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                if inner.successes >= self.success_threshold {
                    inner.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.transition_to(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            half_open_in_flight: inner.half_open_in_flight,
        }
    }

    /// Forces the breaker back to CLOSED with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition_to(CircuitState::Closed);
        inner.half_open_in_flight = 0;
        inner.last_failure_time = None;
    }
}
