// =============================================================================
// MACD — EMA(fast) - EMA(slow), with an EMA(signal) trigger line
// =============================================================================

use super::ema::ema;

/// MACD line, signal line, and histogram at the most recent bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Standard parameters are (12, 26, 9). `None` until the slow EMA plus the
/// signal window have enough history.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<Macd> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }

    let fast_series = ema(closes, fast);
    let slow_series = ema(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // Align the two series on their tails; the slow series is the shorter.
    let offset = fast_series.len().checked_sub(slow_series.len())?;
    let macd_series: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[offset + i] - s)
        .collect();

    let signal_series = ema(&macd_series, signal_period);
    let signal = *signal_series.last()?;
    let line = *macd_series.last()?;
    let hist = line - signal;

    (line.is_finite() && signal.is_finite()).then_some(Macd {
        macd: line,
        signal,
        histogram: hist,
    })
}
