// =============================================================================
// Position model
// =============================================================================
//
// Invariants enforced by the portfolio:
//   - `shares` is never zero; a record that nets to zero is removed in the
//     same critical section that zeroed it.
//   - `invested_amount` is the cash actually deployed (fees included) for
//     longs, or the credit recorded for shorts. Always positive.
//   - For longs, `stop_loss` only ever ratchets upward after open.
//
// Shorts opened without a prior long live under a `_SHORT`-suffixed key so a
// long and a short on the same underlying can coexist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProductType;

/// Key suffix for naked-short records.
pub const SHORT_SUFFIX: &str = "_SHORT";

/// Storage key for a short position on `symbol`.
pub fn short_key(symbol: &str) -> String {
    format!("{symbol}{SHORT_SUFFIX}")
}

/// The tradable symbol behind a position key.
pub fn symbol_of_key(key: &str) -> &str {
    key.strip_suffix(SHORT_SUFFIX).unwrap_or(key)
}

/// A single open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Tradable symbol (without the `_SHORT` key suffix).
    pub symbol: String,
    /// Signed quantity: positive long, negative short. Never zero.
    pub shares: i64,
    /// Volume-weighted fill price across opens.
    pub entry_price: f64,
    /// Cash deployed including open fees (longs) or credit recorded (shorts).
    pub invested_amount: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_time: DateTime<Utc>,
    pub confidence: f64,
    /// Strategy tag that opened this position ("external" for positions the
    /// reconciler adopted from the broker).
    pub strategy: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub atr: f64,
    #[serde(default)]
    pub product: ProductType,
    /// Broker-side protective stop trigger, live longs only.
    #[serde(default)]
    pub gtt_id: Option<u64>,
    /// Best price seen since open (highest for longs, lowest for shorts);
    /// drives the drawdown-from-peak exit factor.
    #[serde(default)]
    pub peak_price: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.shares > 0
    }

    pub fn is_short(&self) -> bool {
        self.shares < 0
    }

    pub fn quantity(&self) -> i64 {
        self.shares.abs()
    }

    /// Unrealised P&L at `price`, before exit fees.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if self.is_long() {
            price * self.shares as f64 - self.invested_amount
        } else {
            self.invested_amount - price * self.quantity() as f64
        }
    }

    /// Update the peak-price watermark; returns true when it moved.
    pub fn observe_price(&mut self, price: f64) -> bool {
        if self.is_long() {
            if price > self.peak_price {
                self.peak_price = price;
                return true;
            }
        } else if self.peak_price == 0.0 || price < self.peak_price {
            self.peak_price = price;
            return true;
        }
        false
    }

    /// Drawdown from the best price seen, as a fraction of that price.
    pub fn drawdown_from_peak(&self, price: f64) -> f64 {
        if self.peak_price <= 0.0 {
            return 0.0;
        }
        if self.is_long() {
            ((self.peak_price - price) / self.peak_price).max(0.0)
        } else {
            ((price - self.peak_price) / self.peak_price).max(0.0)
        }
    }
}
