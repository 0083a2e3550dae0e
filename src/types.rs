// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the engine interacts with the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Simulated fills, no broker orders, virtual positions.
    Paper,
    /// Real order placement and broker reconciliation.
    Live,
    /// Historical replay through the same core.
    Backtest,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
            Self::Backtest => write!(f, "backtest"),
        }
    }
}

/// Order / trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// What the aggregated signal pipeline recommends for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Instrument class used by the fee schedule and exchange routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Equity,
    IndexOption,
    StockOption,
    IndexFuture,
    StockFuture,
}

impl Default for ProductType {
    fn default() -> Self {
        Self::Equity
    }
}

impl ProductType {
    /// True for any derivatives product.
    pub fn is_fno(self) -> bool {
        !matches!(self, Self::Equity)
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equity => write!(f, "equity"),
            Self::IndexOption => write!(f, "index_option"),
            Self::StockOption => write!(f, "stock_option"),
            Self::IndexFuture => write!(f, "index_future"),
            Self::StockFuture => write!(f, "stock_future"),
        }
    }
}

/// A single OHLCV bar. Timestamps are IST wall-clock instants stored as UTC;
/// bars within a session are ordered ascending with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A live quote for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    /// When this quote was observed. Exit evaluation rejects quotes older
    /// than the freshness window.
    pub as_of: DateTime<Utc>,
}

impl Quote {
    /// Age of this quote relative to `now`, in whole seconds (zero floor).
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.as_of).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn mode_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&TradingMode::Paper).unwrap(), "\"paper\"");
        assert_eq!(serde_json::to_string(&TradingMode::Live).unwrap(), "\"live\"");
        let m: TradingMode = serde_json::from_str("\"backtest\"").unwrap();
        assert_eq!(m, TradingMode::Backtest);
    }

    #[test]
    fn default_mode_is_paper() {
        assert_eq!(TradingMode::default(), TradingMode::Paper);
    }

    #[test]
    fn fno_classification() {
        assert!(!ProductType::Equity.is_fno());
        assert!(ProductType::IndexOption.is_fno());
        assert!(ProductType::StockFuture.is_fno());
    }

    #[test]
    fn quote_age() {
        let now = Utc::now();
        let q = Quote {
            symbol: "NIFTY".into(),
            last_price: 22000.0,
            bid: None,
            ask: None,
            as_of: now - Duration::seconds(90),
        };
        assert_eq!(q.age_secs(now), 90);
        // A quote from the future clamps to zero rather than going negative.
        let q2 = Quote { as_of: now + Duration::seconds(5), ..q };
        assert_eq!(q2.age_secs(now), 0);
    }

    #[test]
    fn display_round_trip() {
        assert_eq!(format!("{}", Side::Buy), "buy");
        assert_eq!(format!("{}", Action::Hold), "hold");
        assert_eq!(format!("{}", ProductType::IndexOption), "index_option");
    }
}
