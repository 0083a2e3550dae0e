// =============================================================================
// Average True Range — Wilder's smoothing
// =============================================================================
//
//   TR  = max(H - L, |H - prev_close|, |L - prev_close|)
//   ATR = Wilder-smoothed TR, seeded with the mean of the first `period` TRs.
//
// ATR is the stop-distance unit for position sizing and trailing stops.

use crate::types::Bar;

/// Most recent ATR, or `None` below `period + 1` bars or on non-finite input.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let prev_close = pair[0].close;
        let b = &pair[1];
        let tr = (b.high - b.low)
            .max((b.high - prev_close).abs())
            .max((b.low - prev_close).abs());
        trs.push(tr);
    }

    let n = period as f64;
    let mut value = trs[..period].iter().sum::<f64>() / n;
    if !value.is_finite() {
        return None;
    }
    for &tr in &trs[period..] {
        value = (value * (n - 1.0) + tr) / n;
        if !value.is_finite() {
            return None;
        }
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ts: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn needs_period_plus_one_bars() {
        let bars = vec![bar(100.0, 102.0, 98.0, 101.0); 14];
        assert!(atr(&bars, 14).is_none());
        let bars = vec![bar(100.0, 102.0, 98.0, 101.0); 15];
        assert!(atr(&bars, 14).is_some());
    }

    #[test]
    fn constant_range_converges_to_range() {
        let bars: Vec<Bar> = (0..40)
            .map(|i| {
                let mid = 500.0 + i as f64 * 0.05;
                bar(mid, mid + 4.0, mid - 4.0, mid)
            })
            .collect();
        let v = atr(&bars, 14).unwrap();
        assert!((v - 8.0).abs() < 0.5, "expected ATR near 8, got {v}");
    }

    #[test]
    fn gap_inflates_true_range() {
        // An overnight gap makes |H - prev_close| dominate H - L.
        let bars = vec![
            bar(100.0, 101.0, 99.0, 99.0),
            bar(110.0, 111.0, 109.0, 110.0), // TR = |111 - 99| = 12
            bar(110.0, 111.0, 109.0, 110.0),
            bar(110.0, 111.0, 109.0, 110.0),
        ];
        let v = atr(&bars, 3).unwrap();
        assert!(v > 2.0, "gap should lift ATR above bar range, got {v}");
    }

    #[test]
    fn nan_poisons_result() {
        let mut bars = vec![bar(100.0, 102.0, 98.0, 101.0); 16];
        bars[5].high = f64::NAN;
        assert!(atr(&bars, 14).is_none());
    }
}
