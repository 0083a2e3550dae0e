// =============================================================================
// Average Directional Index — trend strength, direction-agnostic
// =============================================================================
//
//   +DM / -DM per bar, True Range per bar, all Wilder-smoothed over `period`;
//   +DI = 100 * smooth(+DM) / smooth(TR);  -DI likewise;
//   DX  = 100 * |+DI - -DI| / (+DI + -DI);
//   ADX = Wilder-smoothed DX.
//
// Producing one ADX value needs 2 * period + 1 bars: `period` transitions to
// seed the DM/TR smoothing plus `period` DX values to seed the ADX mean.

use crate::types::Bar;

/// Most recent ADX value in [0, 100].
pub fn adx(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let transitions = bars.len() - 1;
    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr = Vec::with_capacity(transitions);

    for pair in bars.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);

        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });

        tr.push(
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs()),
        );
    }

    let n = period as f64;
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();
    let mut s_tr: f64 = tr[..period].iter().sum();

    let mut dx_series = Vec::with_capacity(transitions - period + 1);
    dx_series.push(dx(s_plus, s_minus, s_tr)?);

    for i in period..transitions {
        s_plus = s_plus - s_plus / n + plus_dm[i];
        s_minus = s_minus - s_minus / n + minus_dm[i];
        s_tr = s_tr - s_tr / n + tr[i];
        dx_series.push(dx(s_plus, s_minus, s_tr)?);
    }

    if dx_series.len() < period {
        return None;
    }

    let mut value = dx_series[..period].iter().sum::<f64>() / n;
    for &d in &dx_series[period..] {
        value = (value * (n - 1.0) + d) / n;
    }
    value.is_finite().then_some(value)
}

fn dx(s_plus: f64, s_minus: f64, s_tr: f64) -> Option<f64> {
    if s_tr == 0.0 {
        return None;
    }
    let plus_di = 100.0 * s_plus / s_tr;
    let minus_di = 100.0 * s_minus / s_tr;
    let denom = plus_di + minus_di;
    if denom == 0.0 {
        // No directional movement either way.
        return Some(0.0);
    }
    let v = 100.0 * (plus_di - minus_di).abs() / denom;
    v.is_finite().then_some(v)
}
