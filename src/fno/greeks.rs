// =============================================================================
// Black-Scholes greeks — advisory only, never a primary signal
// =============================================================================
//
// Computed from the quoted implied volatility so the dashboard and the
// strategy selector can reason about exposure. Theta is per calendar day;
// vega is per volatility point (1% = 0.01).

use serde::{Deserialize, Serialize};

use crate::instruments::Right;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// Black-Scholes greeks for a European option.
///
/// * `spot`, `strike` — in rupees; both must be positive.
/// * `iv` — annualised implied volatility as a fraction (0.18 = 18%).
/// * `years` — time to expiry in years; floored at roughly half a day.
/// * `rate` — risk-free rate as a fraction.
pub fn black_scholes_greeks(
    spot: f64,
    strike: f64,
    iv: f64,
    years: f64,
    rate: f64,
    right: Right,
) -> Option<Greeks> {
    if right == Right::Future {
        // A future is pure delta-one exposure.
        return Some(Greeks {
            delta: 1.0,
            gamma: 0.0,
            theta: 0.0,
            vega: 0.0,
        });
    }
    if !(spot > 0.0 && strike > 0.0 && iv > 0.0) {
        return None;
    }
    let t = years.max(0.5 / 365.0);
    let sqrt_t = t.sqrt();

    let d1 = ((spot / strike).ln() + (rate + 0.5 * iv * iv) * t) / (iv * sqrt_t);
    let d2 = d1 - iv * sqrt_t;
    if !d1.is_finite() {
        return None;
    }

    let pdf_d1 = norm_pdf(d1);
    let gamma = pdf_d1 / (spot * iv * sqrt_t);
    let vega = spot * pdf_d1 * sqrt_t / 100.0;

    let (delta, theta_annual) = match right {
        Right::Call => {
            let delta = norm_cdf(d1);
            let theta = -(spot * pdf_d1 * iv) / (2.0 * sqrt_t)
                - rate * strike * (-rate * t).exp() * norm_cdf(d2);
            (delta, theta)
        }
        Right::Put => {
            let delta = norm_cdf(d1) - 1.0;
            let theta = -(spot * pdf_d1 * iv) / (2.0 * sqrt_t)
                + rate * strike * (-rate * t).exp() * norm_cdf(-d2);
            (delta, theta)
        }
        Right::Future => unreachable!("handled above"),
    };

    Some(Greeks {
        delta,
        gamma,
        theta: theta_annual / 365.0,
        vega,
    })
}

fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation
/// (|error| < 1.5e-7, plenty for advisory greeks).
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atm_call_delta_near_half() {
        let g = black_scholes_greeks(22_000.0, 22_000.0, 0.15, 7.0 / 365.0, 0.065, Right::Call)
            .unwrap();
        assert!((0.45..0.60).contains(&g.delta), "delta {}", g.delta);
        assert!(g.gamma > 0.0);
        assert!(g.vega > 0.0);
        assert!(g.theta < 0.0, "long options decay");
    }

    #[test]
    fn put_call_delta_parity() {
        let call = black_scholes_greeks(22_000.0, 22_000.0, 0.15, 7.0 / 365.0, 0.065, Right::Call)
            .unwrap();
        let put = black_scholes_greeks(22_000.0, 22_000.0, 0.15, 7.0 / 365.0, 0.065, Right::Put)
            .unwrap();
        assert!((call.delta - put.delta - 1.0).abs() < 1e-9);
        assert!((call.gamma - put.gamma).abs() < 1e-12);
        assert!((call.vega - put.vega).abs() < 1e-12);
    }

    #[test]
    fn deep_itm_call_delta_approaches_one() {
        let g = black_scholes_greeks(22_000.0, 18_000.0, 0.15, 7.0 / 365.0, 0.065, Right::Call)
            .unwrap();
        assert!(g.delta > 0.99);
    }

    #[test]
    fn deep_otm_put_delta_approaches_zero() {
        let g = black_scholes_greeks(22_000.0, 18_000.0, 0.15, 7.0 / 365.0, 0.065, Right::Put)
            .unwrap();
        assert!(g.delta.abs() < 0.01);
    }

    #[test]
    fn futures_are_delta_one() {
        let g = black_scholes_greeks(22_000.0, 0.0, 0.0, 0.0, 0.0, Right::Future).unwrap();
        assert!((g.delta - 1.0).abs() < 1e-12);
        assert!(g.gamma.abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_rejected() {
        assert!(black_scholes_greeks(0.0, 22_000.0, 0.15, 0.02, 0.065, Right::Call).is_none());
        assert!(black_scholes_greeks(22_000.0, 22_000.0, 0.0, 0.02, 0.065, Right::Call).is_none());
    }

    #[test]
    fn erf_reference_points() {
        assert!(erf(0.0).abs() < 1e-12);
        assert!((erf(1.0) - 0.8427).abs() < 1e-4);
        assert!((erf(-1.0) + 0.8427).abs() < 1e-4);
        assert!((erf(3.0) - 0.99998).abs() < 1e-4);
    }
}
