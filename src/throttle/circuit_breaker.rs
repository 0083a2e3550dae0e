// =============================================================================
// Circuit Breaker — trip on repeated failures, recover via one trial call
// =============================================================================
//
// State machine:
//
//   Closed --(N consecutive failures)--> Open
//   Open   --(reset_timeout elapsed)---> HalfOpen
//   HalfOpen --(trial success)---------> Closed
//   HalfOpen --(trial failure)---------> Open
//
// While Open, `can_proceed()` returns false. The first `can_proceed()` after
// the cooldown transitions to HalfOpen and admits exactly one trial call;
// the next `record_success`/`record_failure` resolves the trial.
//
// There is exactly one breaker type in this codebase; the controller and the
// dashboard sink both compose it.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Default consecutive-failure threshold before tripping.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default cooldown before a trial call is allowed.
const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while a HalfOpen trial call is in flight; blocks further calls
    /// until the trial resolves.
    trial_in_flight: bool,
    trips: u64,
}

/// Snapshot for dashboard payloads and logs.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub trips: u64,
}

/// Thread-safe circuit breaker.
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name,
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                trips: 0,
            }),
        }
    }

    /// Breaker with the default threshold (5) and cooldown (60 s).
    pub fn with_defaults(name: &'static str) -> Self {
        Self::new(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }

    /// Whether a protected call may proceed right now.
    ///
    /// Transitions Open -> HalfOpen once the cooldown has elapsed, admitting
    /// a single trial call.
    pub fn can_proceed(&self) -> bool {
        let mut s = self.inner.lock();
        match s.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = s
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset_timeout {
                    s.state = BreakerState::HalfOpen;
                    s.trial_in_flight = true;
                    info!(breaker = self.name, "circuit breaker half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if s.trial_in_flight {
                    false
                } else {
                    s.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful protected call.
    pub fn record_success(&self) {
        let mut s = self.inner.lock();
        match s.state {
            BreakerState::HalfOpen => {
                info!(breaker = self.name, "trial call succeeded, circuit breaker closed");
                s.state = BreakerState::Closed;
                s.opened_at = None;
                s.trial_in_flight = false;
                s.consecutive_failures = 0;
            }
            _ => {
                s.consecutive_failures = 0;
            }
        }
    }

    /// Record a failed protected call.
    pub fn record_failure(&self) {
        let mut s = self.inner.lock();
        match s.state {
            BreakerState::HalfOpen => {
                warn!(breaker = self.name, "trial call failed, circuit breaker re-opened");
                s.state = BreakerState::Open;
                s.opened_at = Some(Instant::now());
                s.trial_in_flight = false;
                s.trips += 1;
            }
            BreakerState::Closed => {
                s.consecutive_failures += 1;
                if s.consecutive_failures >= self.failure_threshold {
                    warn!(
                        breaker = self.name,
                        failures = s.consecutive_failures,
                        cooldown_secs = self.reset_timeout.as_secs(),
                        "failure threshold reached, circuit breaker opened"
                    );
                    s.state = BreakerState::Open;
                    s.opened_at = Some(Instant::now());
                    s.trips += 1;
                }
            }
            BreakerState::Open => {
                // Already open; failures during cooldown keep it open.
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let s = self.inner.lock();
        BreakerSnapshot {
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            trips: s.trips,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &snap.state)
            .field("consecutive_failures", &snap.consecutive_failures)
            .field("trips", &snap.trips)
            .finish()
    }
}
