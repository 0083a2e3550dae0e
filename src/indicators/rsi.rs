// =============================================================================
// Relative Strength Index — Wilder's smoothing
// =============================================================================
//
// Seed the average gain/loss with a simple mean over the first `period`
// deltas, then smooth:
//
//   avg = (avg_prev * (period - 1) + current) / period
//   RSI = 100 - 100 / (1 + avg_gain / avg_loss)
//
// A flat market reads 50; an all-gain run reads 100; an all-loss run reads 0.

/// RSI series; one value per close starting at index `period`.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let n = period as f64;

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for &d in &deltas[..period] {
        if d > 0.0 {
            avg_gain += d;
        } else {
            avg_loss += -d;
        }
    }
    avg_gain /= n;
    avg_loss /= n;

    let mut out = Vec::with_capacity(deltas.len() - period + 1);
    match point(avg_gain, avg_loss) {
        Some(v) => out.push(v),
        None => return Vec::new(),
    }

    for &d in &deltas[period..] {
        let gain = d.max(0.0);
        let loss = (-d).max(0.0);
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
        match point(avg_gain, avg_loss) {
            Some(v) => out.push(v),
            None => break,
        }
    }
    out
}

/// Most recent RSI value.
pub fn last_rsi(closes: &[f64], period: usize) -> Option<f64> {
    wilder_rsi(closes, period).last().copied()
}

fn point(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    rsi.is_finite().then_some(rsi)
}
