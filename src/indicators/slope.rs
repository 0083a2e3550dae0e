// =============================================================================
// Linear-regression slope — normalised per-bar drift
// =============================================================================
//
// Ordinary least squares over the trailing `window` values, divided by the
// window mean so the result is comparable across price scales: a value of
// 0.001 means the fitted line climbs 0.1% of the mean per bar.

/// Normalised OLS slope over the trailing `window` values.
pub fn linreg_slope(values: &[f64], window: usize) -> Option<f64> {
    if window < 2 || values.len() < window {
        return None;
    }

    let tail = &values[values.len() - window..];
    let n = window as f64;

    let mean_x = (n - 1.0) / 2.0;
    let mean_y = tail.iter().sum::<f64>() / n;
    if mean_y == 0.0 || !mean_y.is_finite() {
        return None;
    }

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in tail.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        return None;
    }

    let slope = (num / den) / mean_y;
    slope.is_finite().then_some(slope)
}
