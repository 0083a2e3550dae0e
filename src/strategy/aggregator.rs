// =============================================================================
// Signal Aggregator — strategy votes in, one action out
// =============================================================================
//
// 1. Partition votes by sign; agreement = side count / total strategies.
// 2. Entries need agreement >= min_agreement AND mean side strength > 0.20.
//    Exits relax the agreement floor to 1/N: any single strategy with
//    positive strength may trigger an exit.
// 3. If both sides qualify the higher mean strength wins; ties hold.
// 4. Confidence = mean_strength * (0.6 + agreement * 0.4).
// 5. Regime bias vetoes counter-trend ENTRIES only; exits pass untouched.
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::regime::Bias;
use crate::strategy::{StrategySignal, Vote};
use crate::types::Action;

/// Mean strength floor for entries.
const ENTRY_STRENGTH_FLOOR: f64 = 0.20;

/// Aggregation thresholds.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Fraction of strategies that must agree for an entry (default 0.4).
    pub min_agreement: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { min_agreement: 0.4 }
    }
}

/// Aggregated decision for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateSignal {
    pub action: Action,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl AggregateSignal {
    fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            reasons: vec![reason.into()],
        }
    }
}

/// Combine per-strategy outputs into one action plus confidence.
pub fn aggregate(
    config: &AggregatorConfig,
    symbol: &str,
    outputs: &[(&'static str, StrategySignal)],
    is_exit: bool,
    bias: Bias,
) -> AggregateSignal {
    let n = outputs.len();
    if n == 0 {
        return AggregateSignal::hold("no_strategies");
    }
    let n_f = n as f64;

    let buys: Vec<&(&'static str, StrategySignal)> =
        outputs.iter().filter(|(_, s)| s.vote == Vote::Buy).collect();
    let sells: Vec<&(&'static str, StrategySignal)> =
        outputs.iter().filter(|(_, s)| s.vote == Vote::Sell).collect();

    let side_stats = |side: &[&(&'static str, StrategySignal)]| -> (f64, f64) {
        if side.is_empty() {
            return (0.0, 0.0);
        }
        let agreement = side.len() as f64 / n_f;
        let mean = side.iter().map(|(_, s)| s.strength).sum::<f64>() / side.len() as f64;
        (agreement, mean)
    };

    let (buy_agreement, buy_mean) = side_stats(&buys);
    let (sell_agreement, sell_mean) = side_stats(&sells);

    // Exit mode relaxes agreement to "any one strategy".
    let agreement_floor = if is_exit { 1.0 / n_f } else { config.min_agreement };
    let strength_floor = if is_exit { 0.0 } else { ENTRY_STRENGTH_FLOOR };

    let buy_ok = buy_agreement >= agreement_floor && buy_mean > strength_floor;
    let sell_ok = sell_agreement >= agreement_floor && sell_mean > strength_floor;

    let (action, agreement, mean, side) = match (buy_ok, sell_ok) {
        (true, false) => (Action::Buy, buy_agreement, buy_mean, buys),
        (false, true) => (Action::Sell, sell_agreement, sell_mean, sells),
        (true, true) if buy_mean > sell_mean => (Action::Buy, buy_agreement, buy_mean, buys),
        (true, true) if sell_mean > buy_mean => (Action::Sell, sell_agreement, sell_mean, sells),
        (true, true) => return AggregateSignal::hold("sides_tied"),
        (false, false) => return AggregateSignal::hold("below_thresholds"),
    };

    let confidence = (mean * (0.6 + agreement * 0.4)).clamp(0.0, 1.0);
    let mut reasons: Vec<String> = side
        .iter()
        .map(|(name, s)| format!("{name}: {}", s.reason))
        .collect();

    // Regime veto applies to counter-trend entries only.
    if !is_exit {
        let vetoed = matches!(
            (bias, action),
            (Bias::Bullish, Action::Sell) | (Bias::Bearish, Action::Buy)
        );
        if vetoed {
            debug!(symbol, %action, %bias, "regime blocked counter-trend entry");
            reasons.push(format!("regime blocked: {bias} bias vetoes {action} entry"));
            return AggregateSignal {
                action: Action::Hold,
                confidence: 0.0,
                reasons,
            };
        }
    }

    debug!(
        symbol,
        %action,
        confidence = format!("{confidence:.2}"),
        agreement = format!("{agreement:.2}"),
        is_exit,
        "signals aggregated"
    );

    AggregateSignal {
        action,
        confidence,
        reasons,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sig(vote: Vote, strength: f64) -> StrategySignal {
        StrategySignal {
            vote,
            strength,
            reason: "test".to_string(),
        }
    }

    fn cfg() -> AggregatorConfig {
        AggregatorConfig { min_agreement: 0.4 }
    }

    #[test]
    fn entry_needs_agreement_and_strength() {
        // 1 of 5 buys: agreement 0.2 < 0.4 -> hold.
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.9)),
            ("b", sig(Vote::Neutral, 0.0)),
            ("c", sig(Vote::Neutral, 0.0)),
            ("d", sig(Vote::Neutral, 0.0)),
            ("e", sig(Vote::Neutral, 0.0)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(out.action, Action::Hold);

        // 2 of 5 buys with strong mean: agreement 0.4 -> buy.
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.9)),
            ("b", sig(Vote::Buy, 0.7)),
            ("c", sig(Vote::Neutral, 0.0)),
            ("d", sig(Vote::Neutral, 0.0)),
            ("e", sig(Vote::Neutral, 0.0)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(out.action, Action::Buy);
        // confidence = 0.8 * (0.6 + 0.4*0.4) = 0.608
        assert!((out.confidence - 0.608).abs() < 1e-9);
    }

    #[test]
    fn weak_mean_strength_holds() {
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.15)),
            ("b", sig(Vote::Buy, 0.18)),
            ("c", sig(Vote::Neutral, 0.0)),
            ("d", sig(Vote::Neutral, 0.0)),
            ("e", sig(Vote::Neutral, 0.0)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(out.action, Action::Hold);
    }

    #[test]
    fn stronger_side_wins_when_both_qualify() {
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.5)),
            ("b", sig(Vote::Buy, 0.5)),
            ("c", sig(Vote::Sell, 0.9)),
            ("d", sig(Vote::Sell, 0.9)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(out.action, Action::Sell);
    }

    #[test]
    fn exact_tie_holds() {
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.6)),
            ("b", sig(Vote::Sell, 0.6)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(out.action, Action::Hold);
    }

    #[test]
    fn exit_relaxes_to_single_strategy() {
        // One sell among five, weak strength: enough for an exit...
        let outputs = vec![
            ("a", sig(Vote::Sell, 0.1)),
            ("b", sig(Vote::Neutral, 0.0)),
            ("c", sig(Vote::Neutral, 0.0)),
            ("d", sig(Vote::Neutral, 0.0)),
            ("e", sig(Vote::Neutral, 0.0)),
        ];
        let exit = aggregate(&cfg(), "SYM", &outputs, true, Bias::Neutral);
        assert_eq!(exit.action, Action::Sell);
        // ...but nowhere near enough for an entry.
        let entry = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(entry.action, Action::Hold);
    }

    #[test]
    fn exit_needs_positive_strength() {
        // A zero-strength sell vote cannot trigger an exit.
        let outputs = vec![
            ("a", sig(Vote::Sell, 0.0)),
            ("b", sig(Vote::Neutral, 0.0)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, true, Bias::Neutral);
        assert_eq!(out.action, Action::Hold);
    }

    #[test]
    fn bullish_bias_blocks_sell_entry_not_exit() {
        let outputs = vec![
            ("a", sig(Vote::Sell, 0.9)),
            ("b", sig(Vote::Sell, 0.9)),
        ];
        let entry = aggregate(&cfg(), "SYM", &outputs, false, Bias::Bullish);
        assert_eq!(entry.action, Action::Hold);
        assert!(entry.reasons.iter().any(|r| r.contains("regime blocked")));

        let exit = aggregate(&cfg(), "SYM", &outputs, true, Bias::Bullish);
        assert_eq!(exit.action, Action::Sell);
        assert!(exit.confidence > 0.0);
    }

    #[test]
    fn bearish_bias_blocks_buy_entry() {
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.9)),
            ("b", sig(Vote::Buy, 0.9)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Bearish);
        assert_eq!(out.action, Action::Hold);
    }

    #[test]
    fn aligned_bias_does_not_block() {
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.9)),
            ("b", sig(Vote::Buy, 0.9)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Bullish);
        assert_eq!(out.action, Action::Buy);
    }

    #[test]
    fn same_sign_strong_addition_never_decreases_confidence() {
        // Adding a buy vote at or above the current mean strength only helps.
        let mut outputs = vec![
            ("a", sig(Vote::Buy, 0.6)),
            ("b", sig(Vote::Buy, 0.6)),
            ("c", sig(Vote::Neutral, 0.0)),
        ];
        let before = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(before.action, Action::Buy);

        outputs.push(("d", sig(Vote::Buy, 0.6)));
        let after = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(after.action, Action::Buy);
        assert!(after.confidence >= before.confidence);
    }

    #[test]
    fn opposite_sign_addition_never_increases_confidence() {
        let mut outputs = vec![
            ("a", sig(Vote::Buy, 0.7)),
            ("b", sig(Vote::Buy, 0.7)),
            ("c", sig(Vote::Neutral, 0.0)),
        ];
        let before = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(before.action, Action::Buy);

        outputs.push(("d", sig(Vote::Sell, 0.3)));
        let after = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert_eq!(after.action, Action::Buy);
        assert!(after.confidence <= before.confidence);
    }

    #[test]
    fn confidence_formula_matches_spec() {
        // 3 of 4 agree at mean 0.5: 0.5 * (0.6 + 0.75*0.4) = 0.45.
        let outputs = vec![
            ("a", sig(Vote::Buy, 0.5)),
            ("b", sig(Vote::Buy, 0.5)),
            ("c", sig(Vote::Buy, 0.5)),
            ("d", sig(Vote::Neutral, 0.0)),
        ];
        let out = aggregate(&cfg(), "SYM", &outputs, false, Bias::Neutral);
        assert!((out.confidence - 0.45).abs() < 1e-9);
    }
}
