// =============================================================================
// Rate Limiter — three sliding windows over broker API calls
// =============================================================================
//
// The broker enforces per-second and per-minute call budgets; we additionally
// cap 100 ms bursts so a batch of concurrent fetches cannot front-load a full
// second's budget into one instant.
//
// Windows (defaults): 100 ms <= 5, 1 s <= 3, 60 s <= 1000.
//
// `acquire` blocks cooperatively (tokio sleep between probes) until all three
// windows admit the call or the timeout expires. All bookkeeping sits behind
// one `parking_lot::Mutex`; no lock is held across an await point.
// =============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{trace, warn};

use crate::config::RateLimitConfig;

/// Probe cadence while waiting for a window to clear.
const RETRY_STEP: Duration = Duration::from_millis(25);

const BURST_WINDOW: Duration = Duration::from_millis(100);
const SECOND_WINDOW: Duration = Duration::from_secs(1);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// One sliding window: timestamps of admitted calls within `span`.
struct Window {
    span: Duration,
    cap: usize,
    hits: VecDeque<Instant>,
}

impl Window {
    fn new(span: Duration, cap: usize) -> Self {
        Self {
            span,
            cap,
            hits: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.hits.front() {
            if now.duration_since(front) >= self.span {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn admits(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.hits.len() < self.cap
    }

    fn record(&mut self, now: Instant) {
        self.hits.push_back(now);
    }
}

struct Windows {
    burst: Window,
    second: Window,
    minute: Window,
    /// Total calls admitted since construction.
    admitted: u64,
    /// Total acquire timeouts.
    timed_out: u64,
}

/// Counter snapshot for dashboard payloads.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub in_burst_window: usize,
    pub in_second_window: usize,
    pub in_minute_window: usize,
    pub admitted: u64,
    pub timed_out: u64,
}

/// Thread-safe sliding-window rate limiter shared by every broker call site.
pub struct RateLimiter {
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(Windows {
                burst: Window::new(BURST_WINDOW, config.burst),
                second: Window::new(SECOND_WINDOW, config.per_second),
                minute: Window::new(MINUTE_WINDOW, config.per_minute),
                admitted: 0,
                timed_out: 0,
            }),
        }
    }

    /// Try to admit one call right now without waiting.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut w = self.windows.lock();
        if w.burst.admits(now) && w.second.admits(now) && w.minute.admits(now) {
            w.burst.record(now);
            w.second.record(now);
            w.minute.record(now);
            w.admitted += 1;
            true
        } else {
            false
        }
    }

    /// Block cooperatively until all three windows admit the call, or until
    /// `timeout` elapses. Returns `false` on timeout.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return true;
            }
            if Instant::now() >= deadline {
                self.windows.lock().timed_out += 1;
                warn!(timeout_ms = timeout.as_millis() as u64, "rate-limit acquire timed out");
                return false;
            }
            trace!("rate limiter saturated, backing off");
            tokio::time::sleep(RETRY_STEP).await;
        }
    }

    /// Counter snapshot of current window occupancy.
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let now = Instant::now();
        let mut w = self.windows.lock();
        w.burst.prune(now);
        w.second.prune(now);
        w.minute.prune(now);
        RateLimiterSnapshot {
            in_burst_window: w.burst.hits.len(),
            in_second_window: w.second.hits.len(),
            in_minute_window: w.minute.hits.len(),
            admitted: w.admitted,
            timed_out: w.timed_out,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("RateLimiter")
            .field("in_burst_window", &snap.in_burst_window)
            .field("in_second_window", &snap.in_second_window)
            .field("in_minute_window", &snap.in_minute_window)
            .field("admitted", &snap.admitted)
            .finish()
    }
}
