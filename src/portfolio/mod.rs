// =============================================================================
// Portfolio — cash and position accounting
// =============================================================================
//
// The portfolio is accounting only: it knows nothing about brokers or order
// lifecycles. Four named operations mutate it — open_long, close_long,
// open_short, cover_short — each validating before touching any state, so a
// rejected operation is a strict no-op.
//
// Locking: cash and positions live behind ONE `parking_lot::RwLock`, so a
// cash mutation and its position upsert always commit in the same critical
// section. Live order placement is serialised separately by the order
// executor's order lock; no critical section here ever spans broker I/O.
//
// Accounting identity, checked in tests and on snapshot:
//   cash + sum(signed invested) == initial_cash + total_pnl
// where signed invested is +invested for longs and -credit for shorts.
// =============================================================================

pub mod fees;
pub mod position;
pub mod reconcile;
pub mod transaction;

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::instruments::{
    self, highly_correlated, looks_like_fno, medium_correlated, parse_fno_symbol, underlying_of,
    validate_equity, SymbolError,
};
use crate::market_hours::trading_day;
use crate::types::{ProductType, Side, TradingMode};
use fees::compute_fees;
use position::{short_key, Position};

/// Per-strategy share of open positions beyond which entries are rejected.
const MAX_STRATEGY_CONCENTRATION: f64 = 0.60;

/// Append-only record of one fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub shares: i64,
    pub price: f64,
    pub fees: f64,
    /// Realised P&L, present only on closing fills.
    pub pnl: Option<f64>,
    pub mode: TradingMode,
    pub confidence: f64,
    #[serde(default)]
    pub sector: String,
    pub cash_after: f64,
    #[serde(default)]
    pub atr: Option<f64>,
    pub trading_day: NaiveDate,
}

/// Why a portfolio operation was refused. The operation is a strict no-op.
#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("insufficient cash: need {needed:.2}, have {cash:.2}")]
    InsufficientCash { needed: f64, cash: f64 },
    #[error("no open position under key '{0}'")]
    NoPosition(String),
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),
    #[error("price must be finite and positive, got {0}")]
    InvalidPrice(f64),
    #[error("cannot reduce {key} by {requested}: only {held} held")]
    OverReduce {
        key: String,
        requested: i64,
        held: i64,
    },
    #[error("correlation guard: {0} conflicts with open {1}")]
    CorrelationBlocked(String, String),
    #[error("concentration guard: strategy '{0}' would exceed 60% of open positions")]
    ConcentrationBlocked(String),
    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

/// Aggregate statistics. Only closed round trips count toward win/loss.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub trades_count: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Realised P&L net of all fees. Mutated in exactly one place.
    pub total_pnl: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

/// Everything behind the lock: cash, positions, counters, history.
#[derive(Debug, Clone, Default)]
pub(crate) struct Accounts {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    pub stats: PortfolioStats,
    pub trades: Vec<TradeRecord>,
}

/// Inputs for opening a position.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub symbol: String,
    pub shares: i64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: f64,
    pub strategy: String,
    pub sector: String,
    pub atr: f64,
    pub product: ProductType,
    pub exchange: String,
}

/// Exactly one portfolio per run.
pub struct Portfolio {
    mode: TradingMode,
    initial_cash: f64,
    accounts: RwLock<Accounts>,
}

impl Portfolio {
    pub fn new(mode: TradingMode, initial_cash: f64) -> Self {
        Self {
            mode,
            initial_cash,
            accounts: RwLock::new(Accounts {
                cash: initial_cash,
                ..Accounts::default()
            }),
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn cash(&self) -> f64 {
        self.accounts.read().cash
    }

    pub fn stats(&self) -> PortfolioStats {
        self.accounts.read().stats.clone()
    }

    /// Snapshot of open positions (copy under lock, iterate without it).
    pub fn positions(&self) -> HashMap<String, Position> {
        self.accounts.read().positions.clone()
    }

    pub fn position(&self, key: &str) -> Option<Position> {
        self.accounts.read().positions.get(key).cloned()
    }

    pub fn open_position_count(&self) -> usize {
        self.accounts.read().positions.len()
    }

    /// Full trade history (append-only).
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.accounts.read().trades.clone()
    }

    /// Trades recorded on a given trading day.
    pub fn trades_on(&self, day: NaiveDate) -> Vec<TradeRecord> {
        self.accounts
            .read()
            .trades
            .iter()
            .filter(|t| t.trading_day == day)
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Guards
    // -------------------------------------------------------------------------

    /// Correlation and concentration guards for a prospective entry.
    /// Returns warnings (medium-correlation overlaps) on success.
    pub fn entry_guards(&self, symbol: &str, strategy: &str) -> Result<Vec<String>, TradeError> {
        let accounts = self.accounts.read();
        let mut warnings = Vec::new();

        let new_underlying = underlying_of(symbol).unwrap_or(symbol).to_string();

        let mut medium_overlaps = 0usize;
        for pos in accounts.positions.values() {
            let held = underlying_of(&pos.symbol).unwrap_or(&pos.symbol);
            if held == new_underlying {
                continue;
            }
            if highly_correlated(&new_underlying, held) {
                return Err(TradeError::CorrelationBlocked(
                    new_underlying,
                    held.to_string(),
                ));
            }
            if medium_correlated(&new_underlying, held) {
                medium_overlaps += 1;
            }
        }
        if medium_overlaps >= 2 {
            let msg = format!(
                "{new_underlying} joins {medium_overlaps} medium-correlated open positions"
            );
            warn!(symbol, "{msg}");
            warnings.push(msg);
        }

        // Per-strategy concentration, meaningful once a book exists.
        let total = accounts.positions.len();
        if total >= 2 {
            let same = accounts
                .positions
                .values()
                .filter(|p| p.strategy == strategy)
                .count();
            let ratio = (same + 1) as f64 / (total + 1) as f64;
            if ratio > MAX_STRATEGY_CONCENTRATION {
                return Err(TradeError::ConcentrationBlocked(strategy.to_string()));
            }
        }

        Ok(warnings)
    }

    // -------------------------------------------------------------------------
    // Open long
    // -------------------------------------------------------------------------

    /// Open (or average into) a long position. Cash is checked before any
    /// mutation; on error nothing changes.
    pub fn open_long(&self, order: &OpenOrder) -> Result<TradeRecord, TradeError> {
        validate_order_symbol(&order.symbol)?;
        if order.shares <= 0 {
            return Err(TradeError::InvalidQuantity(order.shares));
        }
        if !(order.price.is_finite() && order.price > 0.0) {
            return Err(TradeError::InvalidPrice(order.price));
        }

        let notional = order.shares as f64 * order.price;
        let fee = compute_fees(notional, Side::Buy, order.product, &order.exchange);
        let total_cost = notional + fee;

        let mut accounts = self.accounts.write();
        if total_cost > accounts.cash {
            return Err(TradeError::InsufficientCash {
                needed: total_cost,
                cash: accounts.cash,
            });
        }

        accounts.cash -= total_cost;
        let cash_after = accounts.cash;

        let averaged = match accounts.positions.get_mut(&order.symbol) {
            Some(existing) if existing.is_long() => {
                // Volume-weighted average entry; widest protective levels win.
                let old_shares = existing.shares as f64;
                let new_shares = existing.shares + order.shares;
                existing.entry_price = (existing.entry_price * old_shares + notional)
                    / new_shares as f64;
                existing.shares = new_shares;
                existing.invested_amount += total_cost;
                existing.stop_loss = existing.stop_loss.min(order.stop_loss);
                existing.take_profit = existing.take_profit.max(order.take_profit);
                existing.confidence = existing.confidence.max(order.confidence);
                existing.observe_price(order.price);
                info!(
                    symbol = %order.symbol,
                    shares = new_shares,
                    avg_entry = existing.entry_price,
                    "averaged into long"
                );
                true
            }
            _ => false,
        };

        if !averaged {
            accounts.positions.insert(
                order.symbol.clone(),
                Position {
                    symbol: order.symbol.clone(),
                    shares: order.shares,
                    entry_price: order.price,
                    invested_amount: total_cost,
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                    entry_time: Utc::now(),
                    confidence: order.confidence,
                    strategy: order.strategy.clone(),
                    sector: order.sector.clone(),
                    atr: order.atr,
                    product: order.product,
                    gtt_id: None,
                    peak_price: order.price,
                },
            );
            info!(
                symbol = %order.symbol,
                shares = order.shares,
                price = order.price,
                stop_loss = order.stop_loss,
                take_profit = order.take_profit,
                "long opened"
            );
        }

        let record = self.record_trade(
            &mut accounts,
            &order.symbol,
            Side::Buy,
            order.shares,
            order.price,
            fee,
            None,
            order.confidence,
            &order.sector,
            Some(order.atr),
            cash_after,
        );
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Close long
    // -------------------------------------------------------------------------

    /// Close a long position (fully, or `quantity` shares of it). Fees are
    /// deducted from the proceeds; realised P&L folds into cash.
    pub fn close_long(
        &self,
        key: &str,
        quantity: Option<i64>,
        exit_price: f64,
        reason: &str,
    ) -> Result<TradeRecord, TradeError> {
        if !(exit_price.is_finite() && exit_price > 0.0) {
            return Err(TradeError::InvalidPrice(exit_price));
        }

        let mut accounts = self.accounts.write();
        let pos = accounts
            .positions
            .get(key)
            .cloned()
            .ok_or_else(|| TradeError::NoPosition(key.to_string()))?;
        if !pos.is_long() {
            return Err(TradeError::NoPosition(key.to_string()));
        }

        let qty = quantity.unwrap_or(pos.shares);
        if qty <= 0 {
            return Err(TradeError::InvalidQuantity(qty));
        }
        if qty > pos.shares {
            return Err(TradeError::OverReduce {
                key: key.to_string(),
                requested: qty,
                held: pos.shares,
            });
        }

        let exchange = instruments::exchange_for(&pos.symbol);
        let proceeds = qty as f64 * exit_price;
        let fee = compute_fees(proceeds, Side::Sell, pos.product, exchange);
        let net = proceeds - fee;

        // The closed slice carries its proportional share of the basis.
        let fraction = qty as f64 / pos.shares as f64;
        let basis = pos.invested_amount * fraction;
        let pnl = net - basis;

        accounts.cash += net;
        let cash_after = accounts.cash;

        if qty == pos.shares {
            accounts.positions.remove(key);
        } else if let Some(p) = accounts.positions.get_mut(key) {
            p.shares -= qty;
            p.invested_amount -= basis;
        }

        self.apply_realized(&mut accounts, pnl);

        info!(
            symbol = %pos.symbol,
            shares = qty,
            exit_price,
            pnl = format!("{pnl:.2}"),
            reason,
            "long closed"
        );

        let record = self.record_trade(
            &mut accounts,
            &pos.symbol,
            Side::Sell,
            qty,
            exit_price,
            fee,
            Some(pnl),
            pos.confidence,
            &pos.sector,
            Some(pos.atr),
            cash_after,
        );
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Open short
    // -------------------------------------------------------------------------

    /// Open a short under the `_SHORT` key. The net credit (proceeds minus
    /// fees) is added to cash and recorded as the position's basis.
    pub fn open_short(&self, order: &OpenOrder) -> Result<TradeRecord, TradeError> {
        validate_order_symbol(&order.symbol)?;
        if order.shares <= 0 {
            return Err(TradeError::InvalidQuantity(order.shares));
        }
        if !(order.price.is_finite() && order.price > 0.0) {
            return Err(TradeError::InvalidPrice(order.price));
        }

        let notional = order.shares as f64 * order.price;
        let fee = compute_fees(notional, Side::Sell, order.product, &order.exchange);
        let credit = notional - fee;

        let mut accounts = self.accounts.write();
        let key = short_key(&order.symbol);

        accounts.cash += credit;
        let cash_after = accounts.cash;

        let averaged = match accounts.positions.get_mut(&key) {
            Some(existing) if existing.is_short() => {
                let old_qty = existing.quantity() as f64;
                let new_qty = existing.quantity() + order.shares;
                existing.entry_price =
                    (existing.entry_price * old_qty + notional) / new_qty as f64;
                existing.shares = -new_qty;
                existing.invested_amount += credit;
                // Short protective levels mirror longs: stop above, target
                // below; widest levels win.
                existing.stop_loss = existing.stop_loss.max(order.stop_loss);
                existing.take_profit = existing.take_profit.min(order.take_profit);
                existing.observe_price(order.price);
                true
            }
            _ => false,
        };

        if !averaged {
            accounts.positions.insert(
                key.clone(),
                Position {
                    symbol: order.symbol.clone(),
                    shares: -order.shares,
                    entry_price: order.price,
                    invested_amount: credit,
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                    entry_time: Utc::now(),
                    confidence: order.confidence,
                    strategy: order.strategy.clone(),
                    sector: order.sector.clone(),
                    atr: order.atr,
                    product: order.product,
                    gtt_id: None,
                    peak_price: order.price,
                },
            );
        }

        info!(
            symbol = %order.symbol,
            shares = order.shares,
            price = order.price,
            "short opened"
        );

        let record = self.record_trade(
            &mut accounts,
            &order.symbol,
            Side::Sell,
            order.shares,
            order.price,
            fee,
            None,
            order.confidence,
            &order.sector,
            Some(order.atr),
            cash_after,
        );
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Cover short
    // -------------------------------------------------------------------------

    /// Buy back a short. Rejected (no mutation) if the buy-back cost would
    /// take cash negative.
    pub fn cover_short(
        &self,
        key: &str,
        quantity: Option<i64>,
        exit_price: f64,
        reason: &str,
    ) -> Result<TradeRecord, TradeError> {
        if !(exit_price.is_finite() && exit_price > 0.0) {
            return Err(TradeError::InvalidPrice(exit_price));
        }

        let mut accounts = self.accounts.write();
        let pos = accounts
            .positions
            .get(key)
            .cloned()
            .ok_or_else(|| TradeError::NoPosition(key.to_string()))?;
        if !pos.is_short() {
            return Err(TradeError::NoPosition(key.to_string()));
        }

        let qty = quantity.unwrap_or(pos.quantity());
        if qty <= 0 {
            return Err(TradeError::InvalidQuantity(qty));
        }
        if qty > pos.quantity() {
            return Err(TradeError::OverReduce {
                key: key.to_string(),
                requested: qty,
                held: pos.quantity(),
            });
        }

        let exchange = instruments::exchange_for(&pos.symbol);
        let cost = qty as f64 * exit_price;
        let fee = compute_fees(cost, Side::Buy, pos.product, exchange);
        let outlay = cost + fee;

        if outlay > accounts.cash {
            return Err(TradeError::InsufficientCash {
                needed: outlay,
                cash: accounts.cash,
            });
        }

        let fraction = qty as f64 / pos.quantity() as f64;
        let credit_share = pos.invested_amount * fraction;
        let pnl = credit_share - outlay;

        accounts.cash -= outlay;
        let cash_after = accounts.cash;

        if qty == pos.quantity() {
            accounts.positions.remove(key);
        } else if let Some(p) = accounts.positions.get_mut(key) {
            p.shares += qty;
            p.invested_amount -= credit_share;
        }

        self.apply_realized(&mut accounts, pnl);

        info!(
            symbol = %pos.symbol,
            shares = qty,
            exit_price,
            pnl = format!("{pnl:.2}"),
            reason,
            "short covered"
        );

        let record = self.record_trade(
            &mut accounts,
            &pos.symbol,
            Side::Buy,
            qty,
            exit_price,
            fee,
            Some(pnl),
            pos.confidence,
            &pos.sector,
            Some(pos.atr),
            cash_after,
        );
        Ok(record)
    }

    /// Close whatever sits under `key`, long or short.
    pub fn close_any(
        &self,
        key: &str,
        exit_price: f64,
        reason: &str,
    ) -> Result<TradeRecord, TradeError> {
        let is_short = self
            .position(key)
            .map(|p| p.is_short())
            .ok_or_else(|| TradeError::NoPosition(key.to_string()))?;
        if is_short {
            self.cover_short(key, None, exit_price, reason)
        } else {
            self.close_long(key, None, exit_price, reason)
        }
    }

    // -------------------------------------------------------------------------
    // Position maintenance
    // -------------------------------------------------------------------------

    /// Raise a long's stop (or lower a short's). The stop never loosens;
    /// returns true when it moved.
    pub fn tighten_stop(&self, key: &str, candidate: f64) -> bool {
        let mut accounts = self.accounts.write();
        let Some(pos) = accounts.positions.get_mut(key) else {
            return false;
        };
        if pos.is_long() {
            if candidate > pos.stop_loss {
                pos.stop_loss = candidate;
                return true;
            }
        } else if candidate < pos.stop_loss {
            pos.stop_loss = candidate;
            return true;
        }
        false
    }

    /// Record the latest observed price for peak tracking.
    pub fn observe_price(&self, key: &str, price: f64) {
        if let Some(pos) = self.accounts.write().positions.get_mut(key) {
            pos.observe_price(price);
        }
    }

    pub fn set_gtt(&self, key: &str, gtt_id: Option<u64>) {
        if let Some(pos) = self.accounts.write().positions.get_mut(key) {
            pos.gtt_id = gtt_id;
        }
    }

    // -------------------------------------------------------------------------
    // Internal accounting
    // -------------------------------------------------------------------------

    /// The only place realised P&L enters the books.
    fn apply_realized(&self, accounts: &mut Accounts, pnl: f64) {
        let stats = &mut accounts.stats;
        stats.trades_count += 1;
        if pnl >= 0.0 {
            stats.winning_trades += 1;
        } else {
            stats.losing_trades += 1;
        }
        stats.total_pnl += pnl;
        if stats.trades_count == 1 {
            stats.best_trade = pnl;
            stats.worst_trade = pnl;
        } else {
            stats.best_trade = stats.best_trade.max(pnl);
            stats.worst_trade = stats.worst_trade.min(pnl);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_trade(
        &self,
        accounts: &mut Accounts,
        symbol: &str,
        side: Side,
        shares: i64,
        price: f64,
        fee: f64,
        pnl: Option<f64>,
        confidence: f64,
        sector: &str,
        atr: Option<f64>,
        cash_after: f64,
    ) -> TradeRecord {
        let now = Utc::now();
        let record = TradeRecord {
            ts: now,
            symbol: symbol.to_string(),
            side,
            shares,
            price,
            fees: fee,
            pnl,
            mode: self.mode,
            confidence,
            sector: sector.to_string(),
            cash_after,
            atr,
            trading_day: trading_day(now),
        };
        accounts.trades.push(record.clone());
        record
    }

    /// Deviation from the accounting identity; ~0 for a healthy book.
    pub fn accounting_drift(&self) -> f64 {
        let accounts = self.accounts.read();
        let signed_invested: f64 = accounts
            .positions
            .values()
            .map(|p| {
                if p.is_long() {
                    p.invested_amount
                } else {
                    -p.invested_amount
                }
            })
            .sum();
        accounts.cash + signed_invested - self.initial_cash - accounts.stats.total_pnl
    }

    // -------------------------------------------------------------------------
    // Snapshot / restore plumbing (state manager + transactions)
    // -------------------------------------------------------------------------

    pub(crate) fn snapshot_accounts(&self) -> Accounts {
        self.accounts.read().clone()
    }

    pub(crate) fn restore_accounts(&self, accounts: Accounts) {
        *self.accounts.write() = accounts;
    }

    /// Rebuild the book from persisted state.
    pub fn hydrate(
        &self,
        cash: f64,
        positions: HashMap<String, Position>,
        stats: PortfolioStats,
        trades: Vec<TradeRecord>,
    ) {
        let mut accounts = self.accounts.write();
        accounts.cash = cash;
        accounts.positions = positions;
        accounts.stats = stats;
        accounts.trades = trades;
    }

    /// Direct position upsert/removal for the reconciler. Stays inside one
    /// critical section per call.
    pub(crate) fn upsert_position(&self, key: String, position: Position) {
        self.accounts.write().positions.insert(key, position);
    }

    pub(crate) fn remove_position(&self, key: &str) -> Option<Position> {
        self.accounts.write().positions.remove(key)
    }
}

fn validate_order_symbol(symbol: &str) -> Result<(), TradeError> {
    if looks_like_fno(symbol) {
        parse_fno_symbol(symbol)?;
        Ok(())
    } else {
        Ok(validate_equity(symbol)?)
    }
}

impl std::fmt::Debug for Portfolio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let accounts = self.accounts.read();
        f.debug_struct("Portfolio")
            .field("mode", &self.mode)
            .field("cash", &accounts.cash)
            .field("open_positions", &accounts.positions.len())
            .field("trades", &accounts.trades.len())
            .finish()
    }
}
