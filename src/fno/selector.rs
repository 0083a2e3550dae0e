// =============================================================================
// Option strategy selector — market state in, structure + legs out
// =============================================================================
//
// Directional regimes force directional butterflies; sideways regimes favour
// premium selling when volatility is rich and long volatility when it is
// cheap. Thin books always degrade to a strangle, the widest and most
// forgiving structure. Every choice carries its rationale.

use serde::Serialize;

use crate::fno::chain::OptionChain;
use crate::regime::Regime;
use crate::types::{ProductType, Side};

/// Liquidity below this forces the strangle fallback.
const MIN_LIQUIDITY: f64 = 0.30;
/// IV rank above this is "rich" (sell premium), below one-half of it "cheap".
const RICH_IV: f64 = 0.60;
const CHEAP_IV: f64 = 0.30;
/// Trend strength needed before a directional structure is chosen.
const MIN_TREND: f64 = 0.50;

/// Features driving the selection.
#[derive(Debug, Clone, Copy)]
pub struct MarketState {
    pub regime: Regime,
    /// Where current IV sits in its recent range, [0, 1].
    pub iv_rank: f64,
    /// Trend strength, [0, 1].
    pub trend_strength: f64,
    /// Chain liquidity score, [0, 1].
    pub liquidity_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionStrategyKind {
    Straddle,
    IronCondor,
    Strangle,
    CallButterfly,
    PutButterfly,
}

impl std::fmt::Display for OptionStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Straddle => write!(f, "straddle"),
            Self::IronCondor => write!(f, "iron_condor"),
            Self::Strangle => write!(f, "strangle"),
            Self::CallButterfly => write!(f, "call_butterfly"),
            Self::PutButterfly => write!(f, "put_butterfly"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyChoice {
    pub kind: OptionStrategyKind,
    pub rationale: String,
}

/// Pick a structure for the given market state.
pub fn select_strategy(state: &MarketState) -> StrategyChoice {
    if state.liquidity_score < MIN_LIQUIDITY {
        return StrategyChoice {
            kind: OptionStrategyKind::Strangle,
            rationale: format!(
                "thin chain (liquidity {:.2}): wide strangle keeps slippage survivable",
                state.liquidity_score
            ),
        };
    }

    match state.regime {
        Regime::Bullish if state.trend_strength >= MIN_TREND => StrategyChoice {
            kind: OptionStrategyKind::CallButterfly,
            rationale: format!(
                "bullish regime (trend {:.2}): call butterfly caps cost with upside focus",
                state.trend_strength
            ),
        },
        Regime::Bearish if state.trend_strength >= MIN_TREND => StrategyChoice {
            kind: OptionStrategyKind::PutButterfly,
            rationale: format!(
                "bearish regime (trend {:.2}): put butterfly targets the downside move",
                state.trend_strength
            ),
        },
        Regime::Sideways if state.iv_rank >= RICH_IV => StrategyChoice {
            kind: OptionStrategyKind::IronCondor,
            rationale: format!(
                "sideways with rich IV (rank {:.2}): condor sells both wings",
                state.iv_rank
            ),
        },
        Regime::Sideways if state.iv_rank <= CHEAP_IV => StrategyChoice {
            kind: OptionStrategyKind::Straddle,
            rationale: format!(
                "sideways with cheap IV (rank {:.2}): straddle buys the breakout",
                state.iv_rank
            ),
        },
        _ => StrategyChoice {
            kind: OptionStrategyKind::Strangle,
            rationale: "mixed conditions: strangle balances cost and coverage".to_string(),
        },
    }
}

/// One leg of a multi-leg structure.
#[derive(Debug, Clone, Serialize)]
pub struct Leg {
    pub symbol: String,
    pub side: Side,
    /// Shares (lots x lot size).
    pub quantity: i64,
    /// Last traded premium, the execution price hint.
    pub price: f64,
    pub product: ProductType,
}

/// Build the legs for `kind` from a hydrated chain, one lot per leg.
/// `None` when the chain lacks the required strikes.
pub fn build_legs(kind: OptionStrategyKind, chain: &OptionChain) -> Option<Vec<Leg>> {
    let lot = chain.lot_size.max(1);
    let leg = |strike: i64, call: bool, side: Side| -> Option<Leg> {
        let contract = if call {
            chain.call(strike)?
        } else {
            chain.put(strike)?
        };
        Some(Leg {
            symbol: contract.symbol.clone(),
            side,
            quantity: lot,
            price: contract.last_price,
            product: ProductType::IndexOption,
        })
    };

    let atm = chain.atm_strike()?;
    let legs = match kind {
        OptionStrategyKind::Straddle => vec![
            leg(atm, true, Side::Buy)?,
            leg(atm, false, Side::Buy)?,
        ],
        OptionStrategyKind::Strangle => vec![
            leg(chain.strike_offset(2)?, true, Side::Buy)?,
            leg(chain.strike_offset(-2)?, false, Side::Buy)?,
        ],
        OptionStrategyKind::IronCondor => vec![
            leg(chain.strike_offset(1)?, true, Side::Sell)?,
            leg(chain.strike_offset(2)?, true, Side::Buy)?,
            leg(chain.strike_offset(-1)?, false, Side::Sell)?,
            leg(chain.strike_offset(-2)?, false, Side::Buy)?,
        ],
        OptionStrategyKind::CallButterfly => vec![
            leg(chain.strike_offset(-1)?, true, Side::Buy)?,
            Leg {
                quantity: lot * 2,
                ..leg(atm, true, Side::Sell)?
            },
            leg(chain.strike_offset(1)?, true, Side::Buy)?,
        ],
        OptionStrategyKind::PutButterfly => vec![
            leg(chain.strike_offset(1)?, false, Side::Buy)?,
            Leg {
                quantity: lot * 2,
                ..leg(atm, false, Side::Sell)?
            },
            leg(chain.strike_offset(-1)?, false, Side::Buy)?,
        ],
    };
    Some(legs)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fno::chain::OptionContract;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn state(regime: Regime, iv: f64, trend: f64, liquidity: f64) -> MarketState {
        MarketState {
            regime,
            iv_rank: iv,
            trend_strength: trend,
            liquidity_score: liquidity,
        }
    }

    fn chain() -> OptionChain {
        let mut calls = BTreeMap::new();
        let mut puts = BTreeMap::new();
        for strike in (21_800..=22_200).step_by(50) {
            calls.insert(
                strike,
                OptionContract {
                    symbol: format!("NIFTY248{:05}CE", strike),
                    strike,
                    last_price: 100.0,
                    open_interest: 500_000.0,
                    volume: 1000.0,
                    implied_volatility: 0.14,
                    greeks: None,
                },
            );
            puts.insert(
                strike,
                OptionContract {
                    symbol: format!("NIFTY248{:05}PE", strike),
                    strike,
                    last_price: 95.0,
                    open_interest: 500_000.0,
                    volume: 1000.0,
                    implied_volatility: 0.15,
                    greeks: None,
                },
            );
        }
        OptionChain {
            underlying: "NIFTY".to_string(),
            expiry: NaiveDate::from_ymd_opt(2024, 8, 8).unwrap(),
            spot: 22_010.0,
            lot_size: 75,
            calls,
            puts,
        }
    }

    #[test]
    fn directional_regimes_force_butterflies() {
        let c = select_strategy(&state(Regime::Bullish, 0.5, 0.8, 0.9));
        assert_eq!(c.kind, OptionStrategyKind::CallButterfly);
        let c = select_strategy(&state(Regime::Bearish, 0.5, 0.8, 0.9));
        assert_eq!(c.kind, OptionStrategyKind::PutButterfly);
    }

    #[test]
    fn sideways_rich_iv_sells_a_condor() {
        let c = select_strategy(&state(Regime::Sideways, 0.75, 0.1, 0.9));
        assert_eq!(c.kind, OptionStrategyKind::IronCondor);
        assert!(c.rationale.contains("rich IV"));
    }

    #[test]
    fn sideways_cheap_iv_buys_a_straddle() {
        let c = select_strategy(&state(Regime::Sideways, 0.2, 0.1, 0.9));
        assert_eq!(c.kind, OptionStrategyKind::Straddle);
    }

    #[test]
    fn thin_liquidity_always_degrades_to_strangle() {
        let c = select_strategy(&state(Regime::Bullish, 0.7, 0.9, 0.1));
        assert_eq!(c.kind, OptionStrategyKind::Strangle);
        assert!(c.rationale.contains("thin chain"));
    }

    #[test]
    fn weak_trend_or_midrange_iv_falls_back_to_strangle() {
        let c = select_strategy(&state(Regime::Bullish, 0.5, 0.2, 0.9));
        assert_eq!(c.kind, OptionStrategyKind::Strangle);
        let c = select_strategy(&state(Regime::Sideways, 0.45, 0.1, 0.9));
        assert_eq!(c.kind, OptionStrategyKind::Strangle);
    }

    #[test]
    fn straddle_legs_are_both_atm_buys() {
        let legs = build_legs(OptionStrategyKind::Straddle, &chain()).unwrap();
        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|l| l.side == Side::Buy));
        assert!(legs.iter().all(|l| l.quantity == 75));
        assert!(legs[0].symbol.ends_with("CE"));
        assert!(legs[1].symbol.ends_with("PE"));
    }

    #[test]
    fn condor_has_two_shorts_inside_two_longs() {
        let legs = build_legs(OptionStrategyKind::IronCondor, &chain()).unwrap();
        assert_eq!(legs.len(), 4);
        let shorts = legs.iter().filter(|l| l.side == Side::Sell).count();
        assert_eq!(shorts, 2);
    }

    #[test]
    fn butterfly_body_is_double_quantity() {
        let legs = build_legs(OptionStrategyKind::CallButterfly, &chain()).unwrap();
        assert_eq!(legs.len(), 3);
        let body = legs.iter().find(|l| l.side == Side::Sell).unwrap();
        assert_eq!(body.quantity, 150);
        assert!(legs
            .iter()
            .filter(|l| l.side == Side::Buy)
            .all(|l| l.quantity == 75));
    }

    #[test]
    fn missing_strikes_yield_none() {
        let mut thin = chain();
        // Strip everything except the ATM strike.
        thin.calls.retain(|k, _| *k == 22_000);
        thin.puts.retain(|k, _| *k == 22_000);
        assert!(build_legs(OptionStrategyKind::IronCondor, &thin).is_none());
        assert!(build_legs(OptionStrategyKind::Straddle, &thin).is_some());
    }
}
