// =============================================================================
// Strategy Set — the fixed roster of entry/exit signal generators
// =============================================================================
//
// Strategies are a closed enum, each variant carrying its own parameters; a
// single `evaluate` dispatches. Every strategy is a pure function from an
// OHLCV window to `(signal, strength, reason)`:
//
//   - under `min_bars()` bars the answer is (Neutral, 0, "insufficient_data")
//   - NaN anywhere in the window means "no signal", never a panic
//   - identical bars always produce identical output
//
// Strength is clamped to [0, 1] on every path.
// =============================================================================

pub mod aggregator;

use serde::{Deserialize, Serialize};

use crate::indicators::{
    bollinger::bands,
    ema::ema,
    macd::macd,
    roc::roc,
    rsi::last_rsi,
    slope::linreg_slope,
};
use crate::types::Bar;

/// Directional vote from a single strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Buy,
    Sell,
    Neutral,
}

impl Vote {
    pub fn sign(self) -> i32 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
            Self::Neutral => 0,
        }
    }
}

/// Output of one strategy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    pub vote: Vote,
    /// Always within [0, 1].
    pub strength: f64,
    pub reason: String,
}

impl StrategySignal {
    fn neutral(reason: &str) -> Self {
        Self {
            vote: Vote::Neutral,
            strength: 0.0,
            reason: reason.to_string(),
        }
    }

    fn vote(vote: Vote, strength: f64, reason: String) -> Self {
        Self {
            vote,
            strength: strength.clamp(0.0, 1.0),
            reason,
        }
    }
}

/// The closed strategy roster. Parameters travel with the variant so a
/// profile can retune without new types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// EMA(short) crossing EMA(long) with a minimum separation.
    FastMaCrossover {
        short: usize,
        long: usize,
        /// Fractional separation required to call a cross, e.g. 0.001 = 0.1%.
        min_separation: f64,
    },
    /// Wilder RSI mean reversion.
    RsiReversion {
        period: usize,
        oversold: f64,
        overbought: f64,
    },
    /// Close breaching the Bollinger envelope.
    BollingerReversion { period: usize, num_std: f64 },
    /// Volume surge confirming a directional move.
    VolumeBreakout {
        window: usize,
        /// Volume must exceed this multiple of the window mean.
        surge_ratio: f64,
        /// Minimum |close change| as a fraction, e.g. 0.001 = 0.1%.
        min_move: f64,
    },
    /// Six-factor momentum alignment: return, RSI, MACD, ROC, slope, accel.
    EnhancedMomentum {
        lookback: usize,
        /// Composite strength below this yields no signal.
        min_composite: f64,
    },
}

impl Strategy {
    /// The standard roster the controller evaluates every scan.
    pub fn default_set() -> Vec<Strategy> {
        vec![
            Strategy::FastMaCrossover {
                short: 3,
                long: 10,
                min_separation: 0.001,
            },
            Strategy::RsiReversion {
                period: 7,
                oversold: 25.0,
                overbought: 75.0,
            },
            Strategy::BollingerReversion {
                period: 20,
                num_std: 2.0,
            },
            Strategy::VolumeBreakout {
                window: 20,
                surge_ratio: 1.3,
                min_move: 0.001,
            },
            Strategy::EnhancedMomentum {
                lookback: 10,
                min_composite: 0.35,
            },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FastMaCrossover { .. } => "fast_ma_crossover",
            Self::RsiReversion { .. } => "rsi_reversion",
            Self::BollingerReversion { .. } => "bollinger_reversion",
            Self::VolumeBreakout { .. } => "volume_breakout",
            Self::EnhancedMomentum { .. } => "enhanced_momentum",
        }
    }

    /// Minimum bar count: the widest look-back window plus five.
    pub fn min_bars(&self) -> usize {
        let window = match self {
            Self::FastMaCrossover { long, .. } => *long,
            Self::RsiReversion { period, .. } => *period + 1,
            Self::BollingerReversion { period, .. } => *period,
            Self::VolumeBreakout { window, .. } => *window,
            // MACD(12,26,9) is the widest component: 26 + 9 bars of seed.
            Self::EnhancedMomentum { .. } => 35,
        };
        window + 5
    }

    /// Evaluate this strategy over `bars` (oldest first).
    pub fn evaluate(&self, bars: &[Bar]) -> StrategySignal {
        if bars.len() < self.min_bars() {
            return StrategySignal::neutral("insufficient_data");
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        if closes.iter().any(|c| !c.is_finite()) {
            return StrategySignal::neutral("non_finite_input");
        }

        match self {
            Self::FastMaCrossover {
                short,
                long,
                min_separation,
            } => eval_crossover(&closes, *short, *long, *min_separation),
            Self::RsiReversion {
                period,
                oversold,
                overbought,
            } => eval_rsi(&closes, *period, *oversold, *overbought),
            Self::BollingerReversion { period, num_std } => {
                eval_bollinger(&closes, *period, *num_std)
            }
            Self::VolumeBreakout {
                window,
                surge_ratio,
                min_move,
            } => eval_volume_breakout(bars, &closes, *window, *surge_ratio, *min_move),
            Self::EnhancedMomentum {
                lookback,
                min_composite,
            } => eval_momentum(&closes, *lookback, *min_composite),
        }
    }
}

// -----------------------------------------------------------------------------
// Fast MA crossover
// -----------------------------------------------------------------------------

fn eval_crossover(closes: &[f64], short: usize, long: usize, min_separation: f64) -> StrategySignal {
    let short_series = ema(closes, short);
    let long_series = ema(closes, long);
    if short_series.len() < 2 || long_series.len() < 2 {
        return StrategySignal::neutral("indicator_unavailable");
    }

    // Align the tails: the last two points of each series.
    let s_now = short_series[short_series.len() - 1];
    let s_prev = short_series[short_series.len() - 2];
    let l_now = long_series[long_series.len() - 1];
    let l_prev = long_series[long_series.len() - 2];
    if l_now == 0.0 {
        return StrategySignal::neutral("degenerate_series");
    }

    let separation = (s_now - l_now) / l_now;
    let crossed_up = s_prev <= l_prev && s_now > l_now && separation > min_separation;
    let crossed_down = s_prev >= l_prev && s_now < l_now && -separation > min_separation;

    // Strength grows with how decisively the averages separated.
    let strength = (separation.abs() / (min_separation * 5.0)).clamp(0.0, 1.0);

    if crossed_up {
        StrategySignal::vote(
            Vote::Buy,
            strength,
            format!("ema{short} crossed above ema{long}, separation {:.2}%", separation * 100.0),
        )
    } else if crossed_down {
        StrategySignal::vote(
            Vote::Sell,
            strength,
            format!("ema{short} crossed below ema{long}, separation {:.2}%", separation * 100.0),
        )
    } else {
        StrategySignal::neutral("no_cross")
    }
}

// -----------------------------------------------------------------------------
// RSI reversion
// -----------------------------------------------------------------------------

fn eval_rsi(closes: &[f64], period: usize, oversold: f64, overbought: f64) -> StrategySignal {
    let Some(rsi) = last_rsi(closes, period) else {
        return StrategySignal::neutral("indicator_unavailable");
    };

    if rsi <= oversold {
        let strength = ((oversold - rsi) / oversold).clamp(0.0, 1.0);
        StrategySignal::vote(Vote::Buy, strength.max(0.2), format!("rsi {rsi:.1} oversold"))
    } else if rsi >= overbought {
        let strength = ((rsi - overbought) / (100.0 - overbought)).clamp(0.0, 1.0);
        StrategySignal::vote(Vote::Sell, strength.max(0.2), format!("rsi {rsi:.1} overbought"))
    } else {
        StrategySignal::neutral("rsi_neutral")
    }
}

// -----------------------------------------------------------------------------
// Bollinger reversion
// -----------------------------------------------------------------------------

fn eval_bollinger(closes: &[f64], period: usize, num_std: f64) -> StrategySignal {
    let Some(b) = bands(closes, period, num_std) else {
        return StrategySignal::neutral("indicator_unavailable");
    };
    let Some(&close) = closes.last() else {
        return StrategySignal::neutral("indicator_unavailable");
    };

    let half_width = (b.upper - b.lower) / 2.0;
    if half_width <= 0.0 {
        return StrategySignal::neutral("flat_bands");
    }

    if close <= b.lower {
        let depth = ((b.lower - close) / half_width).clamp(0.0, 1.0);
        StrategySignal::vote(
            Vote::Buy,
            0.4 + 0.6 * depth,
            format!("close {close:.2} at or below lower band {:.2}", b.lower),
        )
    } else if close >= b.upper {
        let depth = ((close - b.upper) / half_width).clamp(0.0, 1.0);
        StrategySignal::vote(
            Vote::Sell,
            0.4 + 0.6 * depth,
            format!("close {close:.2} at or above upper band {:.2}", b.upper),
        )
    } else {
        StrategySignal::neutral("inside_bands")
    }
}

// -----------------------------------------------------------------------------
// Volume breakout
// -----------------------------------------------------------------------------

fn eval_volume_breakout(
    bars: &[Bar],
    closes: &[f64],
    window: usize,
    surge_ratio: f64,
    min_move: f64,
) -> StrategySignal {
    let n = bars.len();
    // Mean volume over the `window` bars preceding the current one.
    let history = &bars[n - 1 - window..n - 1];
    let mean_vol = history.iter().map(|b| b.volume).sum::<f64>() / window as f64;
    if !(mean_vol.is_finite() && mean_vol > 0.0) {
        return StrategySignal::neutral("no_volume_history");
    }

    let current_vol = bars[n - 1].volume;
    let ratio = current_vol / mean_vol;

    let prev_close = closes[n - 2];
    if prev_close == 0.0 {
        return StrategySignal::neutral("degenerate_series");
    }
    let change = (closes[n - 1] - prev_close) / prev_close;

    if ratio <= surge_ratio || change.abs() <= min_move || !change.is_finite() {
        return StrategySignal::neutral("no_breakout");
    }

    // Strength blends the volume surge with the size of the move.
    let vol_part = ((ratio - surge_ratio) / surge_ratio).clamp(0.0, 1.0);
    let move_part = (change.abs() / (min_move * 5.0)).clamp(0.0, 1.0);
    let strength = (0.5 * vol_part + 0.5 * move_part).clamp(0.0, 1.0);

    let vote = if change > 0.0 { Vote::Buy } else { Vote::Sell };
    StrategySignal::vote(
        vote,
        strength.max(0.25),
        format!("volume {ratio:.2}x mean with {:.2}% move", change * 100.0),
    )
}

// -----------------------------------------------------------------------------
// Enhanced momentum
// -----------------------------------------------------------------------------

fn eval_momentum(closes: &[f64], lookback: usize, min_composite: f64) -> StrategySignal {
    let n = closes.len();
    if n <= lookback {
        return StrategySignal::neutral("insufficient_data");
    }

    // 1. Look-back return.
    let base = closes[n - 1 - lookback];
    if base == 0.0 {
        return StrategySignal::neutral("degenerate_series");
    }
    let ret = (closes[n - 1] - base) / base;

    // 2. RSI(7) relative to the 50 midline.
    let Some(rsi) = last_rsi(closes, 7) else {
        return StrategySignal::neutral("indicator_unavailable");
    };

    // 3. MACD(12, 26, 9) histogram.
    let Some(m) = macd(closes, 12, 26, 9) else {
        return StrategySignal::neutral("indicator_unavailable");
    };

    // 4. ROC(12).
    let Some(roc_v) = roc(closes, 12) else {
        return StrategySignal::neutral("indicator_unavailable");
    };

    // 5. 20-bar regression slope.
    let Some(slope_now) = linreg_slope(closes, 20) else {
        return StrategySignal::neutral("indicator_unavailable");
    };

    // 6. Smoothed acceleration: slope now versus slope one window back.
    let Some(slope_back) = linreg_slope(&closes[..n - 5], 20) else {
        return StrategySignal::neutral("indicator_unavailable");
    };
    let accel = slope_now - slope_back;

    let bullish = ret > 0.0
        && rsi > 50.0
        && m.histogram > 0.0
        && roc_v > 0.0
        && slope_now > 0.0
        && accel > 0.0;
    let bearish = ret < 0.0
        && rsi < 50.0
        && m.histogram < 0.0
        && roc_v < 0.0
        && slope_now < 0.0
        && accel < 0.0;

    if !bullish && !bearish {
        return StrategySignal::neutral("factors_not_aligned");
    }

    // Composite strength: mean of the normalised factor magnitudes.
    let parts = [
        (ret.abs() / 0.02).clamp(0.0, 1.0),
        ((rsi - 50.0).abs() / 30.0).clamp(0.0, 1.0),
        (roc_v.abs() / 2.0).clamp(0.0, 1.0),
        (slope_now.abs() / 0.002).clamp(0.0, 1.0),
        (accel.abs() / 0.001).clamp(0.0, 1.0),
        (m.histogram.abs() / (closes[n - 1] * 0.001)).clamp(0.0, 1.0),
    ];
    let composite = parts.iter().sum::<f64>() / parts.len() as f64;

    if composite < min_composite {
        return StrategySignal::neutral("composite_below_floor");
    }

    let vote = if bullish { Vote::Buy } else { Vote::Sell };
    StrategySignal::vote(
        vote,
        composite,
        format!(
            "momentum aligned: ret {:.2}%, rsi {rsi:.0}, roc {roc_v:.2}%, composite {composite:.2}",
            ret * 100.0
        ),
    )
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|&c| Bar {
                ts: Utc::now(),
                open: c,
                high: c * 1.002,
                low: c * 0.998,
                close: c,
                volume: 10_000.0,
            })
            .collect()
    }

    #[test]
    fn all_strategies_report_insufficient_data() {
        let bars = bars_from_closes(&[100.0, 101.0, 102.0]);
        for s in Strategy::default_set() {
            let out = s.evaluate(&bars);
            assert_eq!(out.vote, Vote::Neutral, "{}", s.name());
            assert_eq!(out.strength, 0.0);
            assert_eq!(out.reason, "insufficient_data");
        }
    }

    #[test]
    fn strategies_are_deterministic() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.37).sin() * 4.0).collect();
        let bars = bars_from_closes(&closes);
        for s in Strategy::default_set() {
            let a = s.evaluate(&bars);
            let b = s.evaluate(&bars);
            assert_eq!(a.vote, b.vote);
            assert!((a.strength - b.strength).abs() < 1e-15);
            assert_eq!(a.reason, b.reason);
        }
    }

    #[test]
    fn nan_input_never_panics_and_votes_neutral() {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        closes[30] = f64::NAN;
        let bars = bars_from_closes(&closes);
        for s in Strategy::default_set() {
            let out = s.evaluate(&bars);
            assert_eq!(out.vote, Vote::Neutral, "{}", s.name());
        }
    }

    #[test]
    fn strength_always_clamped() {
        // Violent price path to stress every strength formula.
        let closes: Vec<f64> = (0..80)
            .map(|i| if i % 7 == 0 { 500.0 } else { 100.0 + i as f64 * 3.0 })
            .collect();
        let mut bars = bars_from_closes(&closes);
        if let Some(last) = bars.last_mut() {
            last.volume = 1_000_000.0;
        }
        for s in Strategy::default_set() {
            let out = s.evaluate(&bars);
            assert!(
                (0.0..=1.0).contains(&out.strength),
                "{} strength {} out of range",
                s.name(),
                out.strength
            );
        }
    }

    // ---- Fast MA crossover -------------------------------------------------

    #[test]
    fn crossover_detects_upward_cross() {
        // Flat history, rally on the final bar: EMA3 jumps above EMA10 with
        // separation past 0.1% exactly at the last point.
        let mut closes = vec![100.0; 23];
        closes.push(100.5);
        let s = Strategy::FastMaCrossover {
            short: 3,
            long: 10,
            min_separation: 0.001,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Buy, "reason: {}", out.reason);
        assert!(out.strength > 0.0);
    }

    #[test]
    fn crossover_detects_downward_cross() {
        let mut closes = vec![100.0; 23];
        closes.push(99.5);
        let s = Strategy::FastMaCrossover {
            short: 3,
            long: 10,
            min_separation: 0.001,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Sell, "reason: {}", out.reason);
    }

    #[test]
    fn crossover_ignores_tiny_separation() {
        // A cross that never clears 0.1% separation stays neutral.
        let mut closes = vec![100.0; 23];
        closes.push(100.05);
        let s = Strategy::FastMaCrossover {
            short: 3,
            long: 10,
            min_separation: 0.001,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Neutral);
    }

    #[test]
    fn crossover_quiet_after_the_cross_bar() {
        // Once both EMAs sit on the same side, no fresh signal is emitted.
        let mut closes = vec![100.0; 20];
        closes.extend([100.5, 101.5, 103.0, 105.0]);
        let s = Strategy::FastMaCrossover {
            short: 3,
            long: 10,
            min_separation: 0.001,
        };
        assert_eq!(s.evaluate(&bars_from_closes(&closes)).vote, Vote::Neutral);
    }

    // ---- RSI ---------------------------------------------------------------

    #[test]
    fn rsi_votes_buy_when_oversold() {
        let closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64 * 2.0).collect();
        let s = Strategy::RsiReversion {
            period: 7,
            oversold: 25.0,
            overbought: 75.0,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Buy);
        assert!(out.strength > 0.0);
    }

    #[test]
    fn rsi_votes_sell_when_overbought() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 2.0).collect();
        let s = Strategy::RsiReversion {
            period: 7,
            oversold: 25.0,
            overbought: 75.0,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Sell);
    }

    #[test]
    fn rsi_neutral_in_midrange() {
        let closes: Vec<f64> = (0..20)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let s = Strategy::RsiReversion {
            period: 7,
            oversold: 25.0,
            overbought: 75.0,
        };
        assert_eq!(s.evaluate(&bars_from_closes(&closes)).vote, Vote::Neutral);
    }

    // ---- Bollinger ---------------------------------------------------------

    #[test]
    fn bollinger_votes_at_band_touches() {
        let mut closes: Vec<f64> = (0..25)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        closes.push(90.0); // far below the lower band
        let s = Strategy::BollingerReversion {
            period: 20,
            num_std: 2.0,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Buy);

        let mut closes: Vec<f64> = (0..25)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        closes.push(110.0);
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Sell);
    }

    // ---- Volume breakout ---------------------------------------------------

    #[test]
    fn volume_breakout_confirms_direction() {
        let mut bars = bars_from_closes(&vec![100.0; 30]);
        let n = bars.len();
        bars[n - 1].close = 101.0; // +1% move
        bars[n - 1].volume = 50_000.0; // 5x the 10k mean
        let s = Strategy::VolumeBreakout {
            window: 20,
            surge_ratio: 1.3,
            min_move: 0.001,
        };
        let out = s.evaluate(&bars);
        assert_eq!(out.vote, Vote::Buy, "reason: {}", out.reason);

        bars[n - 1].close = 99.0;
        let out = s.evaluate(&bars);
        assert_eq!(out.vote, Vote::Sell);
    }

    #[test]
    fn volume_surge_without_move_is_neutral() {
        let mut bars = bars_from_closes(&vec![100.0; 30]);
        let n = bars.len();
        bars[n - 1].volume = 50_000.0;
        // close unchanged
        let s = Strategy::VolumeBreakout {
            window: 20,
            surge_ratio: 1.3,
            min_move: 0.001,
        };
        assert_eq!(s.evaluate(&bars).vote, Vote::Neutral);
    }

    #[test]
    fn move_without_volume_surge_is_neutral() {
        let mut bars = bars_from_closes(&vec![100.0; 30]);
        let n = bars.len();
        bars[n - 1].close = 101.0;
        // volume equal to the mean
        let s = Strategy::VolumeBreakout {
            window: 20,
            surge_ratio: 1.3,
            min_move: 0.001,
        };
        assert_eq!(s.evaluate(&bars).vote, Vote::Neutral);
    }

    // ---- Enhanced momentum -------------------------------------------------

    #[test]
    fn momentum_fires_on_accelerating_rally() {
        // Quadratic climb: positive return, slope, and acceleration.
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + 0.02 * (i as f64).powi(2))
            .collect();
        let s = Strategy::EnhancedMomentum {
            lookback: 10,
            min_composite: 0.35,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Buy, "reason: {}", out.reason);
        assert!(out.strength >= 0.35);
    }

    #[test]
    fn momentum_fires_on_accelerating_decline() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 300.0 - 0.02 * (i as f64).powi(2))
            .collect();
        let s = Strategy::EnhancedMomentum {
            lookback: 10,
            min_composite: 0.35,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Sell, "reason: {}", out.reason);
    }

    #[test]
    fn momentum_stays_neutral_when_factors_disagree() {
        // Rising prices but decelerating: accel flips negative.
        let closes: Vec<f64> = (0..60)
            .map(|i| {
                let x = i as f64;
                100.0 + 2.0 * x - 0.02 * x.powi(2)
            })
            .collect();
        let s = Strategy::EnhancedMomentum {
            lookback: 10,
            min_composite: 0.35,
        };
        let out = s.evaluate(&bars_from_closes(&closes));
        assert_eq!(out.vote, Vote::Neutral);
    }

    #[test]
    fn roster_names_are_stable() {
        let names: Vec<&str> = Strategy::default_set().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "fast_ma_crossover",
                "rsi_reversion",
                "bollinger_reversion",
                "volume_breakout",
                "enhanced_momentum",
            ]
        );
    }
}
