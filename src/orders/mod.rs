// =============================================================================
// Execution Engine — order lifecycle from proposal to booked fill
// =============================================================================
//
// Live mode follows a strict ordering:
//
//   1. Margin check. Nothing is submitted if the broker says cash is short.
//   2. Place the order; capture the order id.
//   3. Poll order history with exponential backoff up to the fill timeout.
//   4. On timeout: cancel, then re-query ONCE — an order that filled during
//      the cancel window is honoured as a fill (race-safe).
//   5. Partial fill: reconcile against the broker and book the actually
//      filled quantity at the actual average price. Never the requested one.
//   6. Cash and positions mutate only after steps 3-5 resolve, with actual
//      fill values.
//
// Protective stops: a broker-side GTT is placed after a live long opens, and
// cancelled only AFTER the close fill confirms — cancelling earlier would
// leave the position naked if the close fails.
//
// Paper mode books synthetic fills at the quoted price through the same
// portfolio operations.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::broker::types::{GttParams, OrderEvent, OrderParams, OrderStatus};
use crate::broker::BrokerApi;
use crate::portfolio::reconcile::Reconciler;
use crate::portfolio::{OpenOrder, Portfolio, TradeRecord};
use crate::throttle::RateLimiter;
use crate::types::{Side, TradingMode};

/// Default wall-clock budget for an order to fill.
const DEFAULT_FILL_TIMEOUT: Duration = Duration::from_secs(15);
/// First poll delay; doubles per poll up to the cap.
const POLL_BASE: Duration = Duration::from_millis(200);
const POLL_CAP: Duration = Duration::from_millis(3200);
/// Rate-limit wait for order-path calls.
const ORDER_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Confirmed execution against the broker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub quantity: i64,
    pub avg_price: f64,
}

/// Outcome of driving one order to a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled(Fill),
    /// Broker rejected the order; message attached.
    Rejected(String),
    /// Cancelled or timed out with nothing filled.
    Unfilled,
}

/// Outcome of a full open/close flow including portfolio booking.
#[derive(Debug)]
pub enum ExecutionResult {
    Opened(TradeRecord),
    Closed(TradeRecord),
    /// Refused before any order was submitted.
    Blocked(String),
    /// Submitted but nothing filled.
    Unfilled,
    Failed(String),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Opened(_) | Self::Closed(_))
    }
}

pub struct ExecutionEngine {
    broker: Arc<dyn BrokerApi>,
    portfolio: Arc<Portfolio>,
    reconciler: Arc<Reconciler>,
    limiter: Arc<RateLimiter>,
    /// Serialises live placements so concurrent triggers cannot double-place.
    order_lock: AsyncMutex<()>,
    fill_timeout: Duration,
    poll_base: Duration,
    /// Audit trail of order-path anomalies (rejections, timeouts).
    audit: Mutex<Vec<String>>,
}

impl ExecutionEngine {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        portfolio: Arc<Portfolio>,
        reconciler: Arc<Reconciler>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            broker,
            portfolio,
            reconciler,
            limiter,
            order_lock: AsyncMutex::new(()),
            fill_timeout: DEFAULT_FILL_TIMEOUT,
            poll_base: POLL_BASE,
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Override the fill timeout and poll cadence (tests, fast profiles).
    pub fn with_timing(mut self, fill_timeout: Duration, poll_base: Duration) -> Self {
        self.fill_timeout = fill_timeout;
        self.poll_base = poll_base;
        self
    }

    /// Order-path anomalies recorded so far.
    pub fn audit_log(&self) -> Vec<String> {
        self.audit.lock().clone()
    }

    fn record_audit(&self, entry: String) {
        warn!("{entry}");
        self.audit.lock().push(entry);
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Open a long position. In live mode the portfolio is only touched after
    /// a confirmed fill, using actual quantity and price.
    pub async fn open_long(&self, order: &OpenOrder) -> ExecutionResult {
        if self.portfolio.mode() != TradingMode::Live {
            return match self.portfolio.open_long(order) {
                Ok(rec) => ExecutionResult::Opened(rec),
                Err(e) => ExecutionResult::Blocked(e.to_string()),
            };
        }

        let params = OrderParams::new(
            order.exchange.clone(),
            order.symbol.clone(),
            Side::Buy,
            order.shares,
            "MIS",
        );

        match self.drive_order(&params).await {
            OrderOutcome::Filled(fill) => {
                let mut booked = order.clone();
                booked.shares = fill.quantity;
                booked.price = fill.avg_price;

                match self.portfolio.open_long(&booked) {
                    Ok(rec) => {
                        if fill.quantity < order.shares {
                            // Partial: book the actual fill, then snap the
                            // book to broker truth.
                            info!(
                                symbol = %order.symbol,
                                requested = order.shares,
                                filled = fill.quantity,
                                "partial fill, reconciling"
                            );
                            if let Err(e) =
                                self.reconciler.sync_positions(&self.portfolio).await
                            {
                                warn!(error = %e, "post-partial-fill reconciliation failed");
                            }
                        }
                        self.place_protective_stop(&booked).await;
                        ExecutionResult::Opened(rec)
                    }
                    Err(e) => {
                        // Fill confirmed but the book refused it; loudest
                        // possible signal, then reconcile to broker truth.
                        self.record_audit(format!(
                            "booking failed after fill for {}: {e}",
                            order.symbol
                        ));
                        let _ = self.reconciler.sync_positions(&self.portfolio).await;
                        ExecutionResult::Failed(e.to_string())
                    }
                }
            }
            OrderOutcome::Rejected(msg) => {
                self.record_audit(format!("order rejected for {}: {msg}", order.symbol));
                ExecutionResult::Blocked(msg)
            }
            OrderOutcome::Unfilled => {
                self.record_audit(format!("order unfilled for {}", order.symbol));
                ExecutionResult::Unfilled
            }
        }
    }

    /// Open a short leg (used by multi-leg F&O strategies where immediate
    /// sells are intentional).
    pub async fn open_short(&self, order: &OpenOrder) -> ExecutionResult {
        if self.portfolio.mode() != TradingMode::Live {
            return match self.portfolio.open_short(order) {
                Ok(rec) => ExecutionResult::Opened(rec),
                Err(e) => ExecutionResult::Blocked(e.to_string()),
            };
        }

        let params = OrderParams::new(
            order.exchange.clone(),
            order.symbol.clone(),
            Side::Sell,
            order.shares,
            "MIS",
        );

        match self.drive_order(&params).await {
            OrderOutcome::Filled(fill) => {
                let mut booked = order.clone();
                booked.shares = fill.quantity;
                booked.price = fill.avg_price;
                match self.portfolio.open_short(&booked) {
                    Ok(rec) => ExecutionResult::Opened(rec),
                    Err(e) => ExecutionResult::Failed(e.to_string()),
                }
            }
            OrderOutcome::Rejected(msg) => {
                self.record_audit(format!("short rejected for {}: {msg}", order.symbol));
                ExecutionResult::Blocked(msg)
            }
            OrderOutcome::Unfilled => ExecutionResult::Unfilled,
        }
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close the position under `key` at (or near) `price_hint`. The GTT, if
    /// any, is cancelled only after the close fill confirms.
    pub async fn close_position(&self, key: &str, price_hint: f64, reason: &str) -> ExecutionResult {
        let Some(pos) = self.portfolio.position(key) else {
            return ExecutionResult::Blocked(format!("no position under {key}"));
        };

        if self.portfolio.mode() != TradingMode::Live {
            return match self.portfolio.close_any(key, price_hint, reason) {
                Ok(rec) => ExecutionResult::Closed(rec),
                Err(e) => ExecutionResult::Failed(e.to_string()),
            };
        }

        let side = if pos.is_long() { Side::Sell } else { Side::Buy };
        let exchange = crate::instruments::exchange_for(&pos.symbol);
        let params = OrderParams::new(exchange, pos.symbol.clone(), side, pos.quantity(), "MIS");

        match self.drive_order(&params).await {
            OrderOutcome::Filled(fill) => {
                let quantity = if fill.quantity == pos.quantity() {
                    None
                } else {
                    Some(fill.quantity)
                };
                let result = if pos.is_long() {
                    self.portfolio.close_long(key, quantity, fill.avg_price, reason)
                } else {
                    self.portfolio.cover_short(key, quantity, fill.avg_price, reason)
                };

                match result {
                    Ok(rec) => {
                        if fill.quantity < pos.quantity() {
                            if let Err(e) = self.reconciler.sync_positions(&self.portfolio).await {
                                warn!(error = %e, "post-partial-close reconciliation failed");
                            }
                        }
                        // Close confirmed: the protective stop can go now.
                        if let Some(gtt_id) = pos.gtt_id {
                            self.cancel_protective_stop(key, gtt_id, fill.quantity == pos.quantity())
                                .await;
                        }
                        ExecutionResult::Closed(rec)
                    }
                    Err(e) => {
                        self.record_audit(format!("close booking failed for {key}: {e}"));
                        let _ = self.reconciler.sync_positions(&self.portfolio).await;
                        ExecutionResult::Failed(e.to_string())
                    }
                }
            }
            OrderOutcome::Rejected(msg) => {
                self.record_audit(format!("close rejected for {key}: {msg}"));
                ExecutionResult::Blocked(msg)
            }
            OrderOutcome::Unfilled => {
                self.record_audit(format!("close unfilled for {key}, position still protected"));
                ExecutionResult::Unfilled
            }
        }
    }

    // -------------------------------------------------------------------------
    // Order state machine
    // -------------------------------------------------------------------------

    /// Drive one order from margin check to a terminal outcome.
    async fn drive_order(&self, params: &OrderParams) -> OrderOutcome {
        // Serialise placements: two concurrent triggers for the same symbol
        // cannot both pass the margin gate and double-place.
        let _guard = self.order_lock.lock().await;

        // 1. Margin gate.
        if !self.limiter.acquire(ORDER_ACQUIRE_TIMEOUT).await {
            return OrderOutcome::Unfilled;
        }
        let required = match self.broker.order_margin(params).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "order margin query failed");
                return OrderOutcome::Unfilled;
            }
        };
        let available = match self.broker.available_cash().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "available cash query failed");
                return OrderOutcome::Unfilled;
            }
        };
        if required > available {
            return OrderOutcome::Rejected(format!(
                "insufficient margin: need {required:.2}, available {available:.2}"
            ));
        }

        // 2. Place.
        if !self.limiter.acquire(ORDER_ACQUIRE_TIMEOUT).await {
            return OrderOutcome::Unfilled;
        }
        let order_id = match self.broker.place_order(params).await {
            Ok(id) => id,
            Err(e) => {
                warn!(symbol = %params.tradingsymbol, error = %e, "order placement failed");
                return OrderOutcome::Rejected(e.to_string());
            }
        };
        info!(symbol = %params.tradingsymbol, order_id = %order_id, side = %params.side, "order placed");

        // 3. Wait for a terminal state.
        match self.wait_for_fill(&order_id, params.quantity).await {
            Some(outcome) => outcome,
            // 4. Timed out: cancel, then re-query once for the race.
            None => self.cancel_and_requery(&order_id).await,
        }
    }

    /// Poll until terminal status or timeout. `None` means timed out.
    async fn wait_for_fill(&self, order_id: &str, requested: i64) -> Option<OrderOutcome> {
        let deadline = tokio::time::Instant::now() + self.fill_timeout;
        let mut delay = self.poll_base;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_CAP);

            let _ = self.limiter.acquire(ORDER_ACQUIRE_TIMEOUT).await;
            let events = match self.broker.order_history(order_id).await {
                Ok(ev) => ev,
                Err(e) => {
                    debug!(order_id, error = %e, "order history poll failed");
                    continue;
                }
            };

            if let Some(outcome) = terminal_outcome(&events, requested) {
                return Some(outcome);
            }
        }
    }

    /// After a timeout: attempt cancel, then re-query once. A fill that
    /// landed during the cancel window is honoured.
    async fn cancel_and_requery(&self, order_id: &str) -> OrderOutcome {
        warn!(order_id, "fill wait timed out, cancelling");
        if let Err(e) = self.broker.cancel_order("regular", order_id).await {
            warn!(order_id, error = %e, "cancel failed, re-querying anyway");
        }

        match self.broker.order_history(order_id).await {
            Ok(events) => match terminal_outcome(&events, i64::MAX) {
                Some(OrderOutcome::Filled(fill)) => {
                    info!(order_id, quantity = fill.quantity, "order filled during cancel window");
                    OrderOutcome::Filled(fill)
                }
                Some(outcome) => outcome,
                None => {
                    // Still pending after cancel: treat whatever partial
                    // quantity the last event reports as the fill.
                    match partial_fill(&events) {
                        Some(fill) => OrderOutcome::Filled(fill),
                        None => OrderOutcome::Unfilled,
                    }
                }
            },
            Err(e) => {
                warn!(order_id, error = %e, "post-cancel re-query failed");
                OrderOutcome::Unfilled
            }
        }
    }

    // -------------------------------------------------------------------------
    // Protective stops
    // -------------------------------------------------------------------------

    async fn place_protective_stop(&self, order: &OpenOrder) {
        let params = GttParams {
            exchange: order.exchange.clone(),
            tradingsymbol: order.symbol.clone(),
            side: Side::Sell,
            quantity: order.shares,
            trigger_price: order.stop_loss,
            last_price: order.price,
        };
        match self.broker.place_gtt(&params).await {
            Ok(id) => {
                self.portfolio.set_gtt(&order.symbol, Some(id));
                info!(symbol = %order.symbol, gtt_id = id, trigger = order.stop_loss, "protective GTT placed");
            }
            Err(e) => {
                // Position stays open without broker-side protection; the
                // local exit monitor still covers it.
                self.record_audit(format!("GTT placement failed for {}: {e}", order.symbol));
            }
        }
    }

    async fn cancel_protective_stop(&self, key: &str, gtt_id: u64, fully_closed: bool) {
        match self.broker.delete_gtt(gtt_id).await {
            Ok(()) => {
                if !fully_closed {
                    self.portfolio.set_gtt(key, None);
                }
                debug!(key, gtt_id, "protective GTT cancelled after close fill");
            }
            Err(e) => {
                self.record_audit(format!("GTT cancel failed for {key} (id {gtt_id}): {e}"));
            }
        }
    }
}

/// Terminal outcome from an order's event list, if it has reached one.
fn terminal_outcome(events: &[OrderEvent], requested: i64) -> Option<OrderOutcome> {
    let last = events.last()?;
    match last.status {
        OrderStatus::Complete => {
            let quantity = last.filled_quantity.min(requested).max(0);
            if quantity == 0 || last.average_price <= 0.0 {
                // COMPLETE with no quantity is broker noise; never
                // synthesise a fill out of it.
                return Some(OrderOutcome::Unfilled);
            }
            Some(OrderOutcome::Filled(Fill {
                quantity,
                avg_price: last.average_price,
            }))
        }
        OrderStatus::Rejected => Some(OrderOutcome::Rejected(
            last.status_message
                .clone()
                .unwrap_or_else(|| "rejected by broker".to_string()),
        )),
        OrderStatus::Cancelled => match partial_fill(events) {
            Some(fill) => Some(OrderOutcome::Filled(fill)),
            None => Some(OrderOutcome::Unfilled),
        },
        OrderStatus::Open | OrderStatus::Pending => None,
    }
}

/// Any partially-filled quantity reported by the event stream.
fn partial_fill(events: &[OrderEvent]) -> Option<Fill> {
    let last = events.last()?;
    if last.filled_quantity > 0 && last.average_price > 0.0 {
        Some(Fill {
            quantity: last.filled_quantity,
            avg_price: last.average_price,
        })
    } else {
        None
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("fill_timeout", &self.fill_timeout)
            .field("audit_entries", &self.audit.lock().len())
            .finish()
    }
}
