// =============================================================================
// Dashboard Sink — fire-and-forget telemetry
// =============================================================================
//
// POSTs JSON to `{base}/api/{channel}`. Sends are bounded by a 10 s timeout
// and never propagate errors into the trading loop: a failure increments the
// sink's own circuit breaker, and while that breaker is open every send is
// skipped outright. Losing telemetry is always preferable to stalling an
// iteration.
// =============================================================================

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::throttle::CircuitBreaker;

/// Send timeout; an abandoned send is not retried.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Failures before the sink stops trying.
const SINK_FAILURE_THRESHOLD: u32 = 3;
/// How long the sink stays quiet once tripped.
const SINK_RESET_TIMEOUT: Duration = Duration::from_secs(120);

/// Telemetry channels on the dashboard API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Signals,
    Trades,
    Portfolio,
    Performance,
    Status,
    TradeHistory,
}

impl Channel {
    fn path(self) -> &'static str {
        match self {
            Self::Signals => "signals",
            Self::Trades => "trades",
            Self::Portfolio => "portfolio",
            Self::Performance => "performance",
            Self::Status => "status",
            Self::TradeHistory => "trade_history",
        }
    }
}

pub struct DashboardSink {
    base_url: Option<String>,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl DashboardSink {
    /// `base_url: None` disables the sink entirely.
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url,
            client,
            breaker: CircuitBreaker::new("dashboard", SINK_FAILURE_THRESHOLD, SINK_RESET_TIMEOUT),
        }
    }

    /// Fire-and-forget send. Returns whether a send was attempted (used by
    /// tests; callers ignore it).
    pub async fn try_send<T: Serialize>(&self, channel: Channel, payload: &T) -> bool {
        let Some(base) = &self.base_url else {
            return false;
        };
        if !self.breaker.can_proceed() {
            debug!(channel = channel.path(), "dashboard breaker open, send skipped");
            return false;
        }

        let url = format!("{}/api/{}", base.trim_end_matches('/'), channel.path());
        match self.client.post(&url).json(payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.breaker.record_success();
                true
            }
            Ok(resp) => {
                warn!(channel = channel.path(), status = %resp.status(), "dashboard send rejected");
                self.breaker.record_failure();
                true
            }
            Err(e) => {
                debug!(channel = channel.path(), error = %e, "dashboard send failed");
                self.breaker.record_failure();
                true
            }
        }
    }

    pub fn breaker_state(&self) -> crate::throttle::BreakerState {
        self.breaker.state()
    }
}

impl std::fmt::Debug for DashboardSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSink")
            .field("enabled", &self.base_url.is_some())
            .field("breaker", &self.breaker.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::BreakerState;

    #[tokio::test]
    async fn disabled_sink_never_sends() {
        let sink = DashboardSink::new(None);
        let sent = sink
            .try_send(Channel::Status, &serde_json::json!({"ok": true}))
            .await;
        assert!(!sent);
        assert_eq!(sink.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn unreachable_sink_trips_breaker_and_goes_quiet() {
        // A port nothing listens on: sends fail fast with connection refused.
        let sink = DashboardSink::new(Some("http://127.0.0.1:1".to_string()));
        let payload = serde_json::json!({"ok": true});

        for _ in 0..SINK_FAILURE_THRESHOLD {
            let attempted = sink.try_send(Channel::Status, &payload).await;
            assert!(attempted);
        }
        assert_eq!(sink.breaker_state(), BreakerState::Open);

        // While open, sends are skipped without touching the network.
        let attempted = sink.try_send(Channel::Portfolio, &payload).await;
        assert!(!attempted);
    }

    #[test]
    fn channel_paths() {
        assert_eq!(Channel::TradeHistory.path(), "trade_history");
        assert_eq!(Channel::Signals.path(), "signals");
    }
}
