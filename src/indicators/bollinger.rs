// =============================================================================
// Bollinger Bands — SMA(period) +/- k standard deviations
// =============================================================================

/// Upper / middle / lower band over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bands over the trailing `period` values. `None` on short input, zero
/// middle, or non-finite results.
pub fn bands(closes: &[f64], period: usize, k: f64) -> Option<Bands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 || !middle.is_finite() {
        return None;
    }

    let variance = window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    if !sd.is_finite() {
        return None;
    }

    Some(Bands {
        upper: middle + k * sd,
        middle,
        lower: middle - k * sd,
    })
}
