// =============================================================================
// Scriptable in-process broker for tests
// =============================================================================
//
// Every BrokerApi method reads canned data from interior-mutable fields, so a
// test arranges the broker's world, runs the component under test, then
// asserts on the recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::broker::types::{
    GttParams, InstrumentRecord, NetPosition, OrderEvent, OrderParams, QuotePayload,
};
use crate::broker::BrokerApi;
use crate::types::Bar;

#[derive(Default)]
pub struct MockBroker {
    pub instrument_rows: Mutex<HashMap<String, Vec<InstrumentRecord>>>,
    pub bars_by_token: Mutex<HashMap<u32, Vec<Bar>>>,
    /// Fail this many historical_data calls before succeeding.
    pub historical_failures: AtomicU32,
    pub quotes: Mutex<HashMap<String, QuotePayload>>,
    /// Fail this many batched quote calls before succeeding.
    pub quote_batch_failures: AtomicU32,

    pub placed: Mutex<Vec<OrderParams>>,
    /// Order id returned by place_order; `None` makes placement fail.
    pub next_order_id: Mutex<Option<String>>,
    /// Successive order_history responses, consumed front-first. When the
    /// queue empties the last response repeats.
    pub history_script: Mutex<VecDeque<Vec<OrderEvent>>>,
    pub last_history: Mutex<Vec<OrderEvent>>,
    pub cancelled: Mutex<Vec<String>>,
    /// When set, order_history returns these events once a cancel has been
    /// observed — models an order that filled during the cancel window.
    pub fill_on_cancel: Mutex<Option<Vec<OrderEvent>>>,

    pub cash: Mutex<f64>,
    pub required_margin: Mutex<f64>,
    pub net: Mutex<Vec<NetPosition>>,

    pub gtt_seq: AtomicU64,
    pub gtts_placed: Mutex<Vec<(u64, GttParams)>>,
    pub gtts_deleted: Mutex<Vec<u64>>,
}

impl MockBroker {
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.next_order_id.lock() = Some("ORD-1".to_string());
        *mock.cash.lock() = 1_000_000.0;
        mock
    }

    pub fn push_history(&self, events: Vec<OrderEvent>) {
        self.history_script.lock().push_back(events);
    }

    pub fn set_quote(&self, symbol: &str, last_price: f64) {
        self.quotes.lock().insert(
            symbol.to_string(),
            QuotePayload {
                last_price,
                ..Default::default()
            },
        );
    }

    pub fn add_instrument(&self, exchange: &str, symbol: &str, token: u32, lot_size: i64) {
        self.instrument_rows
            .lock()
            .entry(exchange.to_string())
            .or_default()
            .push(InstrumentRecord {
                instrument_token: token,
                tradingsymbol: symbol.to_string(),
                exchange: exchange.to_string(),
                lot_size,
                expiry: None,
                strike: 0.0,
                instrument_type: "EQ".to_string(),
            });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_option(
        &self,
        exchange: &str,
        symbol: &str,
        token: u32,
        lot_size: i64,
        expiry: chrono::NaiveDate,
        strike: f64,
        right: &str,
    ) {
        self.instrument_rows
            .lock()
            .entry(exchange.to_string())
            .or_default()
            .push(InstrumentRecord {
                instrument_token: token,
                tradingsymbol: symbol.to_string(),
                exchange: exchange.to_string(),
                lot_size,
                expiry: Some(expiry),
                strike,
                instrument_type: right.to_string(),
            });
    }

    pub fn set_option_quote(&self, symbol: &str, last_price: f64, oi: f64, iv: f64) {
        self.quotes.lock().insert(
            symbol.to_string(),
            QuotePayload {
                last_price,
                oi: Some(oi),
                iv: Some(iv),
                volume: Some(1_000.0),
                ..Default::default()
            },
        );
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn instruments(&self, exchange: &str) -> Result<Vec<InstrumentRecord>> {
        Ok(self
            .instrument_rows
            .lock()
            .get(exchange)
            .cloned()
            .unwrap_or_default())
    }

    async fn historical_data(
        &self,
        token: u32,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        _interval: &str,
    ) -> Result<Vec<Bar>> {
        let remaining = self.historical_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.historical_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("scripted historical_data failure");
        }
        Ok(self
            .bars_by_token
            .lock()
            .get(&token)
            .cloned()
            .unwrap_or_default())
    }

    async fn quote(&self, keys: &[String]) -> Result<HashMap<String, QuotePayload>> {
        let remaining = self.quote_batch_failures.load(Ordering::SeqCst);
        if remaining > 0 && keys.len() > 1 {
            self.quote_batch_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("scripted batch quote failure");
        }
        let quotes = self.quotes.lock();
        let mut out = HashMap::new();
        for key in keys {
            let symbol = key.split_once(':').map(|(_, s)| s).unwrap_or(key);
            if let Some(q) = quotes.get(symbol) {
                out.insert(symbol.to_string(), q.clone());
            }
        }
        Ok(out)
    }

    async fn place_order(&self, params: &OrderParams) -> Result<String> {
        self.placed.lock().push(params.clone());
        match self.next_order_id.lock().clone() {
            Some(id) => Ok(id),
            None => anyhow::bail!("scripted place_order failure"),
        }
    }

    async fn order_history(&self, _order_id: &str) -> Result<Vec<OrderEvent>> {
        if !self.cancelled.lock().is_empty() {
            if let Some(events) = self.fill_on_cancel.lock().clone() {
                return Ok(events);
            }
        }
        let mut script = self.history_script.lock();
        if let Some(events) = script.pop_front() {
            *self.last_history.lock() = events.clone();
            Ok(events)
        } else {
            Ok(self.last_history.lock().clone())
        }
    }

    async fn cancel_order(&self, _variety: &str, order_id: &str) -> Result<()> {
        self.cancelled.lock().push(order_id.to_string());
        Ok(())
    }

    async fn available_cash(&self) -> Result<f64> {
        Ok(*self.cash.lock())
    }

    async fn order_margin(&self, _params: &OrderParams) -> Result<f64> {
        Ok(*self.required_margin.lock())
    }

    async fn net_positions(&self) -> Result<Vec<NetPosition>> {
        Ok(self.net.lock().clone())
    }

    async fn place_gtt(&self, params: &GttParams) -> Result<u64> {
        let id = self.gtt_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.gtts_placed.lock().push((id, params.clone()));
        Ok(id)
    }

    async fn delete_gtt(&self, trigger_id: u64) -> Result<()> {
        self.gtts_deleted.lock().push(trigger_id);
        Ok(())
    }
}
