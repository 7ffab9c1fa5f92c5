//! Circuit breaker state machine.
//!
//! One machine per resource. Every transition is computed at decision or
//! observation time; there is no timer task, so a resource that receives no
//! traffic never re-evaluates its breaker.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting traffic
    Open,
    /// Probing for recovery
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    opened_at: Instant,
    probe_count: u32,
    probe_in_flight: bool,
}

/// Per-resource circuit breaker.
pub struct Breaker {
    inner: Mutex<BreakerInner>,
}

impl Breaker {
    /// Create a breaker in the closed state.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: Instant::now(),
                probe_count: 0,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Advance the machine at decision time and report whether the request
    /// may pass.
    ///
    /// `tripped` is the caller's verdict on the trip predicate over the
    /// current statistics; it is only consulted while closed. An open
    /// breaker whose retry timeout has elapsed moves to half-open and admits
    /// the calling request as the probe; while a probe is in flight every
    /// other request is rejected.
    pub fn check(&self, tripped: bool, retry_timeout: Duration, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                if tripped {
                    inner.state = CircuitState::Open;
                    inner.opened_at = now;
                    false
                } else {
                    true
                }
            }
            CircuitState::Open => {
                if now.duration_since(inner.opened_at) >= retry_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_count = 0;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Consume a probe outcome observed while half-open.
    ///
    /// `probe_num` consecutive qualifying successes close the breaker; any
    /// failure reopens it immediately and restarts the retry timer.
    pub fn record_probe(&self, success: bool, probe_num: u32, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen {
            return;
        }

        inner.probe_in_flight = false;
        if success {
            inner.probe_count += 1;
            if inner.probe_count >= probe_num {
                inner.state = CircuitState::Closed;
                inner.probe_count = 0;
            }
        } else {
            inner.state = CircuitState::Open;
            inner.opened_at = now;
            inner.probe_count = 0;
        }
    }
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new()
    }
}
