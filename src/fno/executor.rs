// =============================================================================
// Multi-leg executor — all legs fill or none stay booked
// =============================================================================
//
// The whole structure opens inside one TradingTransaction: if any leg fails,
// every already-booked leg rolls back. Short legs are intentional immediate
// sells and flow through the same execution engine as everything else.
//
// In live mode a rollback restores the local book only; any broker-side fill
// from the failed attempt is surfaced through the audit log and picked up by
// the next reconciliation pass.

use std::sync::Arc;

use tracing::{info, warn};

use crate::fno::selector::{Leg, StrategyChoice};
use crate::instruments::exchange_for;
use crate::orders::{ExecutionEngine, ExecutionResult};
use crate::portfolio::{OpenOrder, Portfolio};
use crate::types::Side;

/// Result of attempting a full structure.
#[derive(Debug)]
pub enum StructureResult {
    /// Every leg filled and booked.
    Opened { legs: usize },
    /// A leg failed; the book was rolled back.
    RolledBack { failed_leg: String, reason: String },
}

pub struct MultiLegExecutor {
    engine: Arc<ExecutionEngine>,
    portfolio: Arc<Portfolio>,
}

impl MultiLegExecutor {
    pub fn new(engine: Arc<ExecutionEngine>, portfolio: Arc<Portfolio>) -> Self {
        Self { engine, portfolio }
    }

    /// Execute every leg of `choice`, rolling back the book on any failure.
    pub async fn open_structure(
        &self,
        choice: &StrategyChoice,
        legs: &[Leg],
        confidence: f64,
    ) -> StructureResult {
        info!(
            strategy = %choice.kind,
            legs = legs.len(),
            rationale = %choice.rationale,
            "opening option structure"
        );

        let txn = self.portfolio.begin_transaction("fno_structure");

        for leg in legs {
            let order = OpenOrder {
                symbol: leg.symbol.clone(),
                shares: leg.quantity,
                price: leg.price,
                // Premium-based protective levels; the exit monitor manages
                // the structure as a whole.
                stop_loss: if leg.side == Side::Buy {
                    leg.price * 0.5
                } else {
                    leg.price * 1.5
                },
                take_profit: if leg.side == Side::Buy {
                    leg.price * 2.0
                } else {
                    leg.price * 0.3
                },
                confidence,
                strategy: choice.kind.to_string(),
                sector: "options".to_string(),
                atr: leg.price * 0.10,
                product: leg.product,
                exchange: exchange_for(&leg.symbol).to_string(),
            };

            let result = match leg.side {
                Side::Buy => self.engine.open_long(&order).await,
                Side::Sell => self.engine.open_short(&order).await,
            };

            if !result.is_success() {
                let reason = match result {
                    ExecutionResult::Blocked(msg) | ExecutionResult::Failed(msg) => msg,
                    ExecutionResult::Unfilled => "unfilled".to_string(),
                    _ => unreachable!("success handled above"),
                };
                warn!(
                    strategy = %choice.kind,
                    leg = %leg.symbol,
                    reason = %reason,
                    "leg failed, rolling back structure"
                );
                drop(txn);
                return StructureResult::RolledBack {
                    failed_leg: leg.symbol.clone(),
                    reason,
                };
            }
        }

        txn.commit();
        info!(strategy = %choice.kind, legs = legs.len(), "option structure opened");
        StructureResult::Opened { legs: legs.len() }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testkit::MockBroker;
    use crate::broker::BrokerApi;
    use crate::config::RateLimitConfig;
    use crate::fno::selector::OptionStrategyKind;
    use crate::portfolio::reconcile::Reconciler;
    use crate::throttle::RateLimiter;
    use crate::types::{ProductType, TradingMode};

    fn setup(cash: f64) -> (MultiLegExecutor, Arc<Portfolio>) {
        let broker = Arc::new(MockBroker::new());
        let portfolio = Arc::new(Portfolio::new(TradingMode::Paper, cash));
        let reconciler = Arc::new(Reconciler::new(broker.clone() as Arc<dyn BrokerApi>));
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
            burst: 1000,
            per_second: 1000,
            per_minute: 100_000,
        }));
        let engine = Arc::new(ExecutionEngine::new(
            broker as Arc<dyn BrokerApi>,
            portfolio.clone(),
            reconciler,
            limiter,
        ));
        (MultiLegExecutor::new(engine, portfolio.clone()), portfolio)
    }

    fn leg(symbol: &str, side: Side, qty: i64, price: f64) -> Leg {
        Leg {
            symbol: symbol.to_string(),
            side,
            quantity: qty,
            price,
            product: ProductType::IndexOption,
        }
    }

    fn choice(kind: OptionStrategyKind) -> StrategyChoice {
        StrategyChoice {
            kind,
            rationale: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn straddle_opens_both_legs() {
        let (executor, portfolio) = setup(1_000_000.0);
        let legs = vec![
            leg("NIFTY2480822500CE", Side::Buy, 75, 120.0),
            leg("NIFTY2480822500PE", Side::Buy, 75, 110.0),
        ];
        let result = executor
            .open_structure(&choice(OptionStrategyKind::Straddle), &legs, 0.6)
            .await;
        assert!(matches!(result, StructureResult::Opened { legs: 2 }));
        assert_eq!(portfolio.open_position_count(), 2);
    }

    #[tokio::test]
    async fn condor_books_shorts_under_short_keys() {
        let (executor, portfolio) = setup(1_000_000.0);
        let legs = vec![
            leg("NIFTY2480822550CE", Side::Sell, 75, 90.0),
            leg("NIFTY2480822600CE", Side::Buy, 75, 70.0),
            leg("NIFTY2480822450PE", Side::Sell, 75, 85.0),
            leg("NIFTY2480822400PE", Side::Buy, 75, 65.0),
        ];
        let result = executor
            .open_structure(&choice(OptionStrategyKind::IronCondor), &legs, 0.6)
            .await;
        assert!(matches!(result, StructureResult::Opened { legs: 4 }));
        assert_eq!(portfolio.open_position_count(), 4);
        assert!(portfolio
            .position("NIFTY2480822550CE_SHORT")
            .unwrap()
            .is_short());
    }

    #[tokio::test]
    async fn failed_leg_rolls_back_the_whole_structure() {
        // Cash funds the first leg but not the second.
        let (executor, portfolio) = setup(10_000.0);
        let legs = vec![
            leg("NIFTY2480822500CE", Side::Buy, 75, 100.0), // ~7,500 + fees
            leg("NIFTY2480822500PE", Side::Buy, 75, 100.0), // cannot afford
        ];
        let result = executor
            .open_structure(&choice(OptionStrategyKind::Straddle), &legs, 0.6)
            .await;

        match result {
            StructureResult::RolledBack { failed_leg, .. } => {
                assert_eq!(failed_leg, "NIFTY2480822500PE");
            }
            other => panic!("expected rollback, got {other:?}"),
        }
        // Leg one was unwound too.
        assert_eq!(portfolio.open_position_count(), 0);
        assert!((portfolio.cash() - 10_000.0).abs() < 1e-9);
    }
}
