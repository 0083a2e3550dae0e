// =============================================================================
// Broker adapter — the trait every broker-facing component depends on
// =============================================================================
//
// The trait is the mockable seam: the order executor, data provider, and
// reconciler all accept `Arc<dyn BrokerApi>` so tests can run the full order
// state machine against an in-process mock.

pub mod client;
#[cfg(test)]
pub mod testkit;
pub mod types;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::Bar;
use types::{GttParams, InstrumentRecord, NetPosition, OrderEvent, OrderParams, QuotePayload};

/// Capabilities the engine requires from a broker.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Full instrument dump for an exchange segment.
    async fn instruments(&self, exchange: &str) -> Result<Vec<InstrumentRecord>>;

    /// Historical OHLCV bars for an instrument token.
    async fn historical_data(
        &self,
        token: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: &str,
    ) -> Result<Vec<Bar>>;

    /// Batched quotes; keys are `EXCHANGE:SYMBOL`.
    async fn quote(&self, keys: &[String]) -> Result<HashMap<String, QuotePayload>>;

    /// Place an order; returns the broker order id.
    async fn place_order(&self, params: &OrderParams) -> Result<String>;

    /// Events for an order, oldest first.
    async fn order_history(&self, order_id: &str) -> Result<Vec<OrderEvent>>;

    async fn cancel_order(&self, variety: &str, order_id: &str) -> Result<()>;

    /// Cash available for new positions.
    async fn available_cash(&self) -> Result<f64>;

    /// Margin the broker requires for this order.
    async fn order_margin(&self, params: &OrderParams) -> Result<f64>;

    /// Net positions, day + overnight.
    async fn net_positions(&self) -> Result<Vec<NetPosition>>;

    /// Place a Good-Till-Triggered protective stop; returns the trigger id.
    async fn place_gtt(&self, params: &GttParams) -> Result<u64>;

    async fn delete_gtt(&self, trigger_id: u64) -> Result<()>;
}
