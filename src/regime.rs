// =============================================================================
// Market Regime Detector — ADX + EMA slopes on a reference index
// =============================================================================
//
// Runs on 30-minute bars of the reference index (about 30 days of history).
// Classification:
//
//   ADX >= 20 and EMA20 > EMA50 and slope(EMA20) >  0.0005  -> bullish
//   ADX >= 20 and EMA20 < EMA50 and slope(EMA20) < -0.0005  -> bearish
//   ADX <  20 and |slope| <= 0.0005                          -> sideways
//   anything else: previous bias retained, confidence halved.
//
// Confidence = min(1, ADX/50 + min(0.5, |slope| * 50)).
//
// The detector caches its latest snapshot; the controller refreshes it on a
// schedule and everything downstream reads the cached value.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::indicators::{adx::adx, ema::ema, slope::linreg_slope};
use crate::types::Bar;

const ADX_PERIOD: usize = 14;
const SHORT_EMA: usize = 20;
const LONG_EMA: usize = 50;
const SLOPE_WINDOW: usize = 5;
const TREND_ADX: f64 = 20.0;
const SLOPE_EPS: f64 = 0.0005;

/// Directional classification of the broad market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bullish,
    Bearish,
    Sideways,
    Unknown,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Sideways => write!(f, "sideways"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Directional tilt applied to entry decisions. Never applied to exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Default for Bias {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Full snapshot of the detected regime plus the contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub symbol: String,
    pub regime: Regime,
    pub bias: Bias,
    pub adx: f64,
    pub short_ma: f64,
    pub long_ma: f64,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe detector caching the latest snapshot.
pub struct RegimeDetector {
    state: RwLock<Option<RegimeSnapshot>>,
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Recompute the regime from fresh reference-index bars and cache it.
    /// Returns `None` (keeping the previous snapshot) when the input is too
    /// short for the indicator stack.
    pub fn update(&self, symbol: &str, bars: &[Bar]) -> Option<RegimeSnapshot> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let short_series = ema(&closes, SHORT_EMA);
        let long_series = ema(&closes, LONG_EMA);
        let adx_value = adx(bars, ADX_PERIOD);

        let (Some(&short_ma), Some(&long_ma), Some(adx_value)) =
            (short_series.last(), long_series.last(), adx_value)
        else {
            warn!(symbol, bars = bars.len(), "insufficient history for regime detection");
            return None;
        };

        let short_slope = linreg_slope(&short_series, SLOPE_WINDOW)?;

        let prev_bias = self
            .state
            .read()
            .as_ref()
            .map(|s| s.bias)
            .unwrap_or_default();

        let (regime, bias, confidence) =
            classify(adx_value, short_ma, long_ma, short_slope, prev_bias);

        let snapshot = RegimeSnapshot {
            symbol: symbol.to_string(),
            regime,
            bias,
            adx: adx_value,
            short_ma,
            long_ma,
            confidence,
            updated_at: Utc::now(),
        };

        debug!(
            symbol,
            regime = %regime,
            bias = %bias,
            adx = format!("{adx_value:.2}"),
            slope = format!("{short_slope:.6}"),
            confidence = format!("{confidence:.2}"),
            "regime updated"
        );

        *self.state.write() = Some(snapshot.clone());
        Some(snapshot)
    }

    /// Latest cached snapshot, if any update has succeeded yet.
    pub fn current(&self) -> Option<RegimeSnapshot> {
        self.state.read().clone()
    }

    /// Current bias; neutral until the first successful update.
    pub fn bias(&self) -> Bias {
        self.state
            .read()
            .as_ref()
            .map(|s| s.bias)
            .unwrap_or_default()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(
    adx: f64,
    short_ma: f64,
    long_ma: f64,
    short_slope: f64,
    prev_bias: Bias,
) -> (Regime, Bias, f64) {
    let confidence = (adx / 50.0 + (short_slope.abs() * 50.0).min(0.5)).min(1.0);

    if adx >= TREND_ADX && short_ma > long_ma && short_slope > SLOPE_EPS {
        return (Regime::Bullish, Bias::Bullish, confidence);
    }
    if adx >= TREND_ADX && short_ma < long_ma && short_slope < -SLOPE_EPS {
        return (Regime::Bearish, Bias::Bearish, confidence);
    }
    if adx < TREND_ADX && short_slope.abs() <= SLOPE_EPS {
        return (Regime::Sideways, Bias::Neutral, confidence);
    }

    // Ambiguous: keep the previous tilt but trust it less.
    (Regime::Unknown, prev_bias, confidence * 0.5)
}
