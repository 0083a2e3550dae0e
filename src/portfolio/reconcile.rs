// =============================================================================
// Reconciler — align local positions with the broker's net book
// =============================================================================
//
// Paper mode never reconciles: virtual positions have no broker counterpart
// and would all be deleted. In live mode each pass:
//
//   1. Fetches broker net positions (day + overnight).
//   2. Upserts every non-zero F&O position (NFO/BFO) using the broker's
//      average price and quantity; positions we did not open are adopted
//      with strategy "external" and confidence 0.5.
//   3. Removes local positions the broker no longer reports.
//
// Each upsert/removal runs under the portfolio lock; the broker fetch does
// not hold any lock.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broker::BrokerApi;
use crate::instruments::parse_fno_symbol;
use crate::portfolio::position::{short_key, Position};
use crate::portfolio::Portfolio;
use crate::types::TradingMode;

/// Tag for positions adopted from the broker rather than opened locally.
pub const EXTERNAL_STRATEGY: &str = "external";

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub upserted: u32,
    pub adopted_external: u32,
    pub removed: u32,
    pub skipped_unparseable: u32,
}

pub struct Reconciler {
    broker: Arc<dyn BrokerApi>,
}

impl Reconciler {
    pub fn new(broker: Arc<dyn BrokerApi>) -> Self {
        Self { broker }
    }

    /// Run one reconciliation pass. No-op in paper and backtest modes.
    pub async fn sync_positions(&self, portfolio: &Portfolio) -> Result<ReconcileSummary> {
        if portfolio.mode() != TradingMode::Live {
            debug!(mode = %portfolio.mode(), "reconciliation skipped outside live mode");
            return Ok(ReconcileSummary::default());
        }

        let broker_positions = self
            .broker
            .net_positions()
            .await
            .context("reconcile: failed to fetch broker net positions")?;

        let mut summary = ReconcileSummary::default();
        let mut broker_keys: HashSet<String> = HashSet::new();

        for bp in &broker_positions {
            if bp.quantity == 0 {
                continue;
            }
            // Only derivatives segments reconcile; equity holdings are out
            // of this engine's book.
            if bp.exchange != "NFO" && bp.exchange != "BFO" {
                continue;
            }

            // Fail loud on unparseable contracts rather than guessing.
            let parsed = match parse_fno_symbol(&bp.tradingsymbol) {
                Ok(p) => p,
                Err(e) => {
                    warn!(symbol = %bp.tradingsymbol, error = %e, "reconcile: unparseable broker symbol, skipped");
                    summary.skipped_unparseable += 1;
                    continue;
                }
            };

            let key = if bp.quantity < 0 {
                short_key(&bp.tradingsymbol)
            } else {
                bp.tradingsymbol.clone()
            };
            broker_keys.insert(key.clone());

            let existing = portfolio.position(&key);
            let notional = bp.average_price * bp.quantity.abs() as f64;

            let position = match existing {
                Some(mut local) => {
                    // Broker truth wins for quantity and average price.
                    local.shares = bp.quantity;
                    local.entry_price = bp.average_price;
                    local.invested_amount = notional;
                    local
                }
                None => {
                    summary.adopted_external += 1;
                    info!(
                        symbol = %bp.tradingsymbol,
                        quantity = bp.quantity,
                        avg_price = bp.average_price,
                        "reconcile: adopting externally-created position"
                    );
                    Position {
                        symbol: bp.tradingsymbol.clone(),
                        shares: bp.quantity,
                        entry_price: bp.average_price,
                        invested_amount: notional,
                        // Protective levels unknown for adopted positions;
                        // a wide band until the risk manager tightens them.
                        stop_loss: if bp.quantity > 0 {
                            bp.average_price * 0.95
                        } else {
                            bp.average_price * 1.05
                        },
                        take_profit: if bp.quantity > 0 {
                            bp.average_price * 1.10
                        } else {
                            bp.average_price * 0.90
                        },
                        entry_time: Utc::now(),
                        confidence: 0.5,
                        strategy: EXTERNAL_STRATEGY.to_string(),
                        sector: parsed.underlying.clone(),
                        atr: 0.0,
                        product: parsed.product_type(),
                        gtt_id: None,
                        peak_price: bp.average_price,
                    }
                }
            };

            portfolio.upsert_position(key, position);
            summary.upserted += 1;
        }

        // Drop local F&O positions the broker no longer reports.
        for (key, pos) in portfolio.positions() {
            if !pos.product.is_fno() {
                continue;
            }
            if !broker_keys.contains(&key) {
                warn!(key = %key, "reconcile: local position absent at broker, removing");
                portfolio.remove_position(&key);
                summary.removed += 1;
            }
        }

        info!(
            upserted = summary.upserted,
            adopted = summary.adopted_external,
            removed = summary.removed,
            skipped = summary.skipped_unparseable,
            "reconciliation pass complete"
        );
        Ok(summary)
    }
}
