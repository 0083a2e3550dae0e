// =============================================================================
// Broker wire types
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// One row of the instrument dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub instrument_token: u32,
    pub tradingsymbol: String,
    pub exchange: String,
    #[serde(default)]
    pub lot_size: i64,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub strike: f64,
    #[serde(default)]
    pub instrument_type: String,
}

/// Parameters for a new order. Orders are always MARKET / DAY here; the
/// engine manages its own protective stops.
#[derive(Debug, Clone, Serialize)]
pub struct OrderParams {
    pub exchange: String,
    pub tradingsymbol: String,
    pub side: Side,
    pub quantity: i64,
    pub product: String,
}

impl OrderParams {
    pub fn new(
        exchange: impl Into<String>,
        tradingsymbol: impl Into<String>,
        side: Side,
        quantity: i64,
        product: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            tradingsymbol: tradingsymbol.into(),
            side,
            quantity,
            product: product.into(),
        }
    }
}

/// Terminal and in-flight order states reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    Pending,
    Complete,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Rejected | Self::Cancelled)
    }

    /// Parse the broker's status string. Unknown strings map to `Pending`:
    /// unknown progress states must keep the poller waiting, not abort it.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "COMPLETE" | "FILLED" => Self::Complete,
            "REJECTED" => Self::Rejected,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            "OPEN" => Self::Open,
            _ => Self::Pending,
        }
    }
}

/// One event from the order history feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_quantity: i64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub status_message: Option<String>,
}

/// A single symbol's quote payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotePayload {
    pub last_price: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub oi: Option<f64>,
    #[serde(default)]
    pub iv: Option<f64>,
}

/// Broker-side net position (day + overnight).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetPosition {
    pub tradingsymbol: String,
    pub exchange: String,
    pub quantity: i64,
    pub average_price: f64,
    #[serde(default)]
    pub product: String,
}

/// Good-Till-Triggered protective stop parameters.
#[derive(Debug, Clone, Serialize)]
pub struct GttParams {
    pub exchange: String,
    pub tradingsymbol: String,
    pub side: Side,
    pub quantity: i64,
    pub trigger_price: f64,
    pub last_price: f64,
}
