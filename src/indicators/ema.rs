// =============================================================================
// Moving averages — EMA (SMA-seeded) and SMA
// =============================================================================
//
// EMA_t = close_t * k + EMA_{t-1} * (1 - k),  k = 2 / (period + 1)
//
// The first EMA value is the SMA of the first `period` inputs, so the series
// starts at index `period - 1` of the input.

/// Exponential moving average series. Empty when `period` is zero, the input
/// is shorter than `period`, or the seed is non-finite. A non-finite value
/// mid-series truncates the output; a broken tail must not look valid.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);

    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);

    let mut prev = seed;
    for &v in &values[period..] {
        let next = v * k + prev * (1.0 - k);
        if !next.is_finite() {
            break;
        }
        out.push(next);
        prev = next;
    }
    out
}

/// Most recent EMA value.
pub fn last_ema(values: &[f64], period: usize) -> Option<f64> {
    ema(values, period).last().copied()
}

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}
