// =============================================================================
// Trading Controller — the closed loop
// =============================================================================
//
// One iteration:
//
//   breaker gate -> regime refresh -> market-hours gate -> quote prefetch for
//   open positions -> trailing stops + exit evaluation -> closes -> entry
//   scan (capacity- and time-gated) -> day-close liquidation + archives
//   (once per trading day) -> snapshot persist -> dashboard send -> sleep.
//
// The loop is single-threaded cooperative: one iteration runs to completion,
// then sleeps. Every broker touch goes through the rate-limited provider or
// the execution engine; no portfolio lock is ever held across I/O (position
// reads are snapshots).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::dashboard::{Channel, DashboardSink};
use crate::data::{DataProvider, Interval};
use crate::fno::{build_legs, select_strategy, ChainFetcher, MarketState, MultiLegExecutor, StructureResult};
use crate::indicators::atr::atr;
use crate::instruments::{self, looks_like_fno, parse_fno_symbol};
use crate::market_hours::{trading_day, MarketHours};
use crate::orders::{ExecutionEngine, ExecutionResult};
use crate::portfolio::position::symbol_of_key;
use crate::portfolio::{OpenOrder, Portfolio, TradeRecord};
use crate::regime::RegimeDetector;
use crate::risk::RiskManager;
use crate::state_store::{DailySummary, EngineState, StateManager, SCHEMA_VERSION};
use crate::strategy::aggregator::{aggregate, AggregateSignal, AggregatorConfig};
use crate::strategy::Strategy;
use crate::throttle::CircuitBreaker;
use crate::types::{Action, ProductType, TradingMode};

/// Bars pulled for each scan: 5-minute candles over 5 days.
const SCAN_INTERVAL: Interval = Interval::M5;
const SCAN_DAYS: i64 = 5;
/// Reference-index history for the regime detector.
const REGIME_INTERVAL: Interval = Interval::M30;
const REGIME_DAYS: i64 = 30;
/// Regime refresh cadence, in iterations.
const REGIME_REFRESH_EVERY: u64 = 10;
/// Entry scan batch size.
const SCAN_BATCH: usize = 10;
/// No new entries with less than this left in the session.
const MIN_MINUTES_TO_CLOSE_FOR_ENTRY: i64 = 20;
/// Day-close liquidation window.
const DAY_CLOSE_MINUTES: i64 = 5;
/// Quotes older than this are unusable for exit decisions.
const MAX_QUOTE_AGE_SECS: i64 = 120;
/// Sleep after an iteration-level failure.
const FAILURE_SLEEP: Duration = Duration::from_secs(5);
/// Sleep while the market is closed.
const GATED_SLEEP: Duration = Duration::from_secs(300);

/// What one iteration did; drives the outer loop's sleep and the tests.
#[derive(Debug, Default)]
pub struct IterationReport {
    pub iteration: u64,
    /// Market closed (and not bypassed); only persistence ran.
    pub gated: bool,
    pub exits: usize,
    pub entries: usize,
    pub day_close_ran: bool,
}

/// Payload for the dashboard portfolio channel.
#[derive(Debug, Serialize)]
struct PortfolioUpdate {
    mode: TradingMode,
    iteration: u64,
    cash: f64,
    open_positions: usize,
    total_pnl: f64,
    trades_count: u64,
    breaker: crate::throttle::BreakerSnapshot,
}

pub struct TradingController {
    config: EngineConfig,
    market_hours: MarketHours,
    breaker: CircuitBreaker,
    data: Arc<DataProvider>,
    portfolio: Arc<Portfolio>,
    engine: Arc<ExecutionEngine>,
    risk: RiskManager,
    regime: RegimeDetector,
    strategies: Vec<Strategy>,
    aggregator_cfg: AggregatorConfig,
    state: Arc<StateManager>,
    dashboard: Arc<DashboardSink>,
    chain_fetcher: ChainFetcher,
    multi_leg: MultiLegExecutor,

    iteration: u64,
    last_regime_iteration: Option<u64>,
    last_prices: HashMap<String, f64>,
    /// Trading day whose T-5m liquidation has already run.
    day_closed_for: Option<NaiveDate>,
    last_archive_day: Option<NaiveDate>,
    /// Trading day whose option structure has already been attempted.
    structure_tried_for: Option<NaiveDate>,
}

impl TradingController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        data: Arc<DataProvider>,
        portfolio: Arc<Portfolio>,
        engine: Arc<ExecutionEngine>,
        risk: RiskManager,
        state: Arc<StateManager>,
        dashboard: Arc<DashboardSink>,
        chain_fetcher: ChainFetcher,
    ) -> Self {
        let aggregator_cfg = AggregatorConfig {
            min_agreement: config.min_agreement,
        };
        let multi_leg = MultiLegExecutor::new(Arc::clone(&engine), Arc::clone(&portfolio));
        Self {
            config,
            market_hours: MarketHours::new(),
            breaker: CircuitBreaker::with_defaults("controller"),
            data,
            portfolio,
            engine,
            risk,
            regime: RegimeDetector::new(),
            strategies: Strategy::default_set(),
            aggregator_cfg,
            state,
            dashboard,
            chain_fetcher,
            multi_leg,
            iteration: 0,
            last_regime_iteration: None,
            last_prices: HashMap::new(),
            day_closed_for: None,
            last_archive_day: None,
            structure_tried_for: None,
        }
    }

    // -------------------------------------------------------------------------
    // Restore
    // -------------------------------------------------------------------------

    /// Restore the previous session's state if compatible; otherwise start
    /// fresh. Never fails.
    pub fn restore(&mut self) {
        let Some(saved) = self.state.load_current(self.config.mode) else {
            info!("no usable snapshot, starting fresh");
            return;
        };

        let now = Utc::now();
        let today_trades = self.state.read_trades(saved.trading_day);
        self.portfolio.hydrate(
            saved.cash,
            saved.positions,
            saved.stats,
            today_trades,
        );
        self.risk.cooldowns().restore(saved.cooldowns, now);
        self.iteration = saved.iteration;
        self.last_prices = saved.last_prices;
        if saved.day_closed {
            self.day_closed_for = Some(saved.trading_day);
        }
        self.last_archive_day = saved.last_archive_day;

        info!(
            iteration = self.iteration,
            positions = self.portfolio.open_position_count(),
            "previous session restored"
        );
    }

    // -------------------------------------------------------------------------
    // Outer loop
    // -------------------------------------------------------------------------

    /// Run until the iteration cap or a shutdown request. The current
    /// iteration always drains before shutdown; state persists either way.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) {
        info!(
            mode = %self.config.mode,
            universe = ?self.config.universe,
            max_iterations = self.config.max_iterations,
            "trading controller starting"
        );

        while self.iteration < self.config.max_iterations {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, draining");
                break;
            }

            if !self.breaker.can_proceed() {
                warn!("controller breaker open, pausing");
                tokio::time::sleep(FAILURE_SLEEP).await;
                continue;
            }

            let report = self.run_iteration(Utc::now()).await;
            match report {
                Ok(report) => {
                    self.breaker.record_success();
                    let sleep = if report.gated {
                        GATED_SLEEP
                    } else {
                        Duration::from_secs(self.config.check_interval_secs)
                    };
                    tokio::time::sleep(sleep).await;
                }
                Err(e) => {
                    error!(error = %e, "iteration failed");
                    self.breaker.record_failure();
                    tokio::time::sleep(FAILURE_SLEEP).await;
                }
            }
        }

        // Final persist on the way out.
        if let Err(e) = self.persist(Utc::now()) {
            error!(error = %e, "final state persist failed");
        }
        info!(iteration = self.iteration, "trading controller stopped");
    }

    // -------------------------------------------------------------------------
    // One iteration
    // -------------------------------------------------------------------------

    pub async fn run_iteration(&mut self, now: DateTime<Utc>) -> anyhow::Result<IterationReport> {
        self.iteration += 1;
        let mut report = IterationReport {
            iteration: self.iteration,
            ..IterationReport::default()
        };
        let day = trading_day(now);

        self.maybe_refresh_regime().await;

        let gate = self.market_hours.can_trade_at(now);
        let in_session = gate.can_trade || self.config.bypass_market_hours;

        // Exits bypass the market-hours gate; only entries are gated. The
        // quote-freshness guard keeps dead after-hours prices from acting.
        report.exits = self.manage_open_positions(now).await;

        if in_session {
            let capacity = self
                .config
                .max_positions
                .saturating_sub(self.portfolio.open_position_count());
            let time_ok = self.config.bypass_market_hours
                || self
                    .market_hours
                    .time_until_close_at(now)
                    .is_some_and(|left| left.num_minutes() > MIN_MINUTES_TO_CLOSE_FOR_ENTRY);

            if capacity > 0 && time_ok {
                report.entries = self.scan_for_entries(now, capacity).await;
            }

            // One regime-selected option structure per trading day.
            if self.config.enable_fno_structures
                && self.structure_tried_for != Some(day)
                && time_ok
                && self.portfolio.open_position_count() < self.config.max_positions
            {
                self.structure_tried_for = Some(day);
                self.try_open_structure().await;
            }

            // T-5m day close, exactly once per trading day.
            if self
                .market_hours
                .within_minutes_of_close(now, DAY_CLOSE_MINUTES)
                && self.day_closed_for != Some(day)
            {
                self.close_positions_for_day(now, day).await;
                self.day_closed_for = Some(day);
                report.day_close_ran = true;
            }
        } else {
            debug!(reason = %gate.reason, "market gate closed");
            report.gated = true;
        }

        // Post-close snapshot archive, once per day.
        if self.market_hours.after_close(now) && self.last_archive_day != Some(day) {
            if let Err(e) = self.archive_day(now, day) {
                warn!(error = %e, "daily archive failed");
            } else {
                self.last_archive_day = Some(day);
            }
        }

        self.persist(now)?;
        self.send_dashboard_update().await;
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Regime
    // -------------------------------------------------------------------------

    async fn maybe_refresh_regime(&mut self) {
        let due = match self.last_regime_iteration {
            None => true,
            Some(last) => self.iteration - last >= REGIME_REFRESH_EVERY,
        };
        if !due {
            return;
        }
        let bars = self
            .data
            .fetch_ohlcv(&self.config.reference_index, REGIME_INTERVAL, REGIME_DAYS)
            .await;
        if self.regime.update(&self.config.reference_index, &bars).is_some() {
            self.last_regime_iteration = Some(self.iteration);
        }
    }

    // -------------------------------------------------------------------------
    // Exits
    // -------------------------------------------------------------------------

    /// Trailing-stop maintenance and exit evaluation over a positions
    /// snapshot. Returns the number of closed positions.
    async fn manage_open_positions(&mut self, now: DateTime<Utc>) -> usize {
        let positions = self.portfolio.positions();
        if positions.is_empty() {
            return 0;
        }

        // One batched quote round trip for every open symbol.
        let symbols: Vec<String> = positions
            .values()
            .map(|p| p.symbol.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        let quotes = self.data.fetch_quotes(&symbols).await;

        let mut closed = 0;
        for (key, position) in positions {
            let Some(quote) = quotes.get(&position.symbol) else {
                debug!(key = %key, "no quote, exit evaluation skipped");
                continue;
            };
            // Stale data must not drive an exit.
            if quote.age_secs(now) > MAX_QUOTE_AGE_SECS {
                warn!(key = %key, age = quote.age_secs(now), "quote stale, position skipped");
                continue;
            }
            let price = quote.last_price;
            self.last_prices.insert(position.symbol.clone(), price);
            self.portfolio.observe_price(&key, price);

            // Trailing stop ratchet.
            if let Some(candidate) = self.risk.trailing_stop_candidate(&position, price) {
                if self.portfolio.tighten_stop(&key, candidate) {
                    debug!(key = %key, stop = candidate, "trailing stop tightened");
                }
            }

            // Strategy invalidation uses exit-relaxed aggregation.
            let invalidation = self.exit_signal(&position.symbol).await;

            let current = self.portfolio.position(&key).unwrap_or(position);
            let evaluation =
                self.risk
                    .evaluate_exit(&current, price, now, invalidation.as_ref(), None);
            if !evaluation.should_exit {
                continue;
            }

            let reason = evaluation.reasons.join("; ");
            info!(key = %key, score = evaluation.score, reason = %reason, "exit triggered");
            match self.engine.close_position(&key, price, &reason).await {
                ExecutionResult::Closed(record) => {
                    let stop_exit = reason.contains("stop_loss");
                    self.risk.record_exit(symbol_of_key(&key), stop_exit, now);
                    self.log_trade(&record);
                    closed += 1;
                }
                other => {
                    warn!(key = %key, outcome = ?other, "exit did not complete");
                }
            }
        }
        closed
    }

    /// Exit-mode aggregate signal for one symbol, if bar data allows.
    async fn exit_signal(&self, symbol: &str) -> Option<AggregateSignal> {
        let bars = self.data.fetch_ohlcv(symbol, SCAN_INTERVAL, SCAN_DAYS).await;
        if bars.is_empty() {
            return None;
        }
        let outputs: Vec<(&'static str, _)> = self
            .strategies
            .iter()
            .map(|s| (s.name(), s.evaluate(&bars)))
            .collect();
        Some(aggregate(
            &self.aggregator_cfg,
            symbol,
            &outputs,
            true,
            self.regime.bias(),
        ))
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    async fn scan_for_entries(&mut self, now: DateTime<Utc>, capacity: usize) -> usize {
        struct Candidate {
            symbol: String,
            action: Action,
            confidence: f64,
            price: f64,
            atr: f64,
        }

        let held: std::collections::HashSet<String> = self
            .portfolio
            .positions()
            .values()
            .map(|p| p.symbol.clone())
            .collect();

        let bias = self.regime.bias();
        let mut candidates: Vec<Candidate> = Vec::new();

        let universe = self.config.universe.clone();
        for batch in universe.chunks(SCAN_BATCH) {
            // Prefetch the batch's quotes in one round trip; bars follow per
            // symbol through the cache.
            let batch_vec: Vec<String> = batch.to_vec();
            let quotes = self.data.fetch_quotes(&batch_vec).await;

            for symbol in batch {
                if held.contains(symbol) {
                    continue;
                }
                if self.risk.entry_blocked_by_cooldown(symbol, now) {
                    debug!(symbol, "cooldown active, entry skipped");
                    continue;
                }

                let bars = self.data.fetch_ohlcv(symbol, SCAN_INTERVAL, SCAN_DAYS).await;
                if bars.is_empty() {
                    continue;
                }

                let outputs: Vec<(&'static str, _)> = self
                    .strategies
                    .iter()
                    .map(|s| (s.name(), s.evaluate(&bars)))
                    .collect();
                let signal = aggregate(&self.aggregator_cfg, symbol, &outputs, false, bias);

                if signal.action == Action::Hold || signal.confidence < self.config.min_confidence
                {
                    continue;
                }
                let Some(atr_value) = atr(&bars, 14) else {
                    continue;
                };
                let price = quotes
                    .get(symbol)
                    .map(|q| q.last_price)
                    .or_else(|| bars.last().map(|b| b.close));
                let Some(price) = price else {
                    continue;
                };

                candidates.push(Candidate {
                    symbol: symbol.clone(),
                    action: signal.action,
                    confidence: signal.confidence,
                    price,
                    atr: atr_value,
                });
            }
        }

        // Best conviction first, capped by remaining capacity and top_n.
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.config.top_n.min(capacity));

        let mut opened = 0;
        for c in candidates {
            if self.try_enter(&c.symbol, c.action, c.confidence, c.price, c.atr).await {
                opened += 1;
            }
        }
        opened
    }

    async fn try_enter(
        &mut self,
        symbol: &str,
        action: Action,
        confidence: f64,
        price: f64,
        atr_value: f64,
    ) -> bool {
        // Instrument facts: product, exchange, lot size.
        let (product, exchange, lot_size, sector) = match self.instrument_facts(symbol).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(symbol, error = %e, "entry skipped, instrument unresolvable");
                return false;
            }
        };

        match self.portfolio.entry_guards(symbol, &self.strategy_tag(confidence)) {
            Ok(warnings) => {
                for w in warnings {
                    debug!(symbol, "{w}");
                }
            }
            Err(e) => {
                info!(symbol, reason = %e, "entry blocked by portfolio guard");
                return false;
            }
        }

        let Some(sized) =
            self.risk
                .size_entry(price, atr_value, confidence, self.portfolio.cash(), lot_size)
        else {
            debug!(symbol, "entry sized to zero, skipped");
            return false;
        };

        let order = OpenOrder {
            symbol: symbol.to_string(),
            shares: sized.shares,
            price,
            stop_loss: sized.stop_loss,
            take_profit: sized.take_profit,
            confidence,
            strategy: self.strategy_tag(confidence),
            sector,
            atr: atr_value,
            product,
            exchange,
        };

        let result = match action {
            Action::Buy => self.engine.open_long(&order).await,
            Action::Sell => {
                // A sell entry is a short; protective levels mirror.
                let mut short = order.clone();
                short.stop_loss = price + (price - sized.stop_loss);
                short.take_profit = price - (sized.take_profit - price);
                self.engine.open_short(&short).await
            }
            Action::Hold => return false,
        };

        match result {
            ExecutionResult::Opened(record) => {
                info!(
                    symbol,
                    %action,
                    shares = record.shares,
                    price = record.price,
                    confidence,
                    "entry executed"
                );
                self.log_trade(&record);
                true
            }
            other => {
                debug!(symbol, outcome = ?other, "entry did not execute");
                false
            }
        }
    }

    /// The dominant strategy label for the trade tag. The aggregate blends
    /// all strategies; the tag groups entries by conviction band.
    fn strategy_tag(&self, confidence: f64) -> String {
        if confidence >= 0.7 {
            "ensemble_high".to_string()
        } else if confidence >= 0.5 {
            "ensemble_mid".to_string()
        } else {
            "ensemble_low".to_string()
        }
    }

    async fn instrument_facts(
        &self,
        symbol: &str,
    ) -> anyhow::Result<(ProductType, String, i64, String)> {
        if looks_like_fno(symbol) {
            let parsed = parse_fno_symbol(symbol)?;
            let exchange = instruments::exchange_for(symbol).to_string();
            let lot = match self.data.instrument_lookup(symbol).await {
                Some(entry) => entry.lot_size,
                None => instruments::lot_size(&parsed.underlying),
            };
            Ok((parsed.product_type(), exchange, lot, parsed.underlying))
        } else {
            instruments::validate_equity(symbol)?;
            Ok((ProductType::Equity, "NSE".to_string(), 1, "equity".to_string()))
        }
    }

    // -------------------------------------------------------------------------
    // Option structures
    // -------------------------------------------------------------------------

    /// Fetch the reference-index chain, pick a structure for the current
    /// market state, and execute it as one transaction.
    async fn try_open_structure(&mut self) {
        let Some(snapshot) = self.regime.current() else {
            debug!("no regime snapshot yet, structure skipped");
            return;
        };
        let underlying = self.config.reference_index.clone();

        let Some(spot) = self.data.fetch_quote(&underlying).await else {
            warn!(underlying = %underlying, "no spot quote, structure skipped");
            return;
        };

        let chain = match self.chain_fetcher.fetch(&underlying, spot.last_price).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(underlying = %underlying, error = %e, "chain fetch failed");
                return;
            }
        };

        // ATM implied volatility mapped into a 10-40% band as a crude rank.
        let atm_iv = chain
            .atm_strike()
            .and_then(|k| chain.call(k))
            .map(|c| c.implied_volatility)
            .unwrap_or(0.0);
        let iv_rank = ((atm_iv - 0.10) / 0.30).clamp(0.0, 1.0);

        let market = MarketState {
            regime: snapshot.regime,
            iv_rank,
            trend_strength: snapshot.confidence,
            liquidity_score: chain.liquidity_score(),
        };
        let choice = select_strategy(&market);

        let Some(legs) = build_legs(choice.kind, &chain) else {
            warn!(strategy = %choice.kind, "chain lacks strikes for the structure");
            return;
        };

        match self
            .multi_leg
            .open_structure(&choice, &legs, snapshot.confidence.max(0.5))
            .await
        {
            StructureResult::Opened { legs } => {
                // Mirror the structure's fills into the durable trade log.
                let trades = self.portfolio.trades();
                for record in trades.iter().rev().take(legs).rev() {
                    self.log_trade(record);
                }
            }
            StructureResult::RolledBack { failed_leg, reason } => {
                warn!(failed_leg = %failed_leg, reason = %reason, "structure rolled back");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Day close
    // -------------------------------------------------------------------------

    /// Liquidate same-day-expiring F&O positions and archive the day's
    /// trades. Non-expiring positions are preserved.
    async fn close_positions_for_day(&mut self, now: DateTime<Utc>, day: NaiveDate) {
        let positions = self.portfolio.positions();
        let expiring = self.risk.expiring_today(&positions, day);

        info!(count = expiring.len(), day = %day, "day-close liquidation window");
        for key in expiring {
            let Some(position) = positions.get(&key) else {
                continue;
            };
            let price = match self.data.fetch_quote(&position.symbol).await {
                Some(q) => q.last_price,
                None => {
                    // Better a last-known price than carrying an expiring
                    // contract into settlement.
                    match self.last_prices.get(&position.symbol) {
                        Some(p) => *p,
                        None => {
                            error!(key = %key, "no price for expiring contract, cannot liquidate");
                            continue;
                        }
                    }
                }
            };
            match self
                .engine
                .close_position(&key, price, "same-day expiry liquidation")
                .await
            {
                ExecutionResult::Closed(record) => {
                    self.risk.record_exit(symbol_of_key(&key), false, now);
                    self.log_trade(&record);
                }
                other => {
                    error!(key = %key, outcome = ?other, "expiry liquidation failed");
                }
            }
        }

        let day_trades = self.portfolio.trades_on(day);
        if !day_trades.is_empty() {
            if let Err(e) = self.state.archive_trades(day, self.config.mode, &day_trades) {
                warn!(error = %e, "trade archive failed");
            }
        }
    }

    fn archive_day(&self, now: DateTime<Utc>, day: NaiveDate) -> anyhow::Result<()> {
        let state = self.build_state(now);
        let stats = self.portfolio.stats();
        let summary = DailySummary {
            schema_version: SCHEMA_VERSION,
            saved_at: now,
            trading_day: day,
            mode: self.config.mode,
            trades: stats.trades_count,
            winning_trades: stats.winning_trades,
            losing_trades: stats.losing_trades,
            realized_pnl: stats.total_pnl,
            ending_cash: self.portfolio.cash(),
            open_positions: self.portfolio.open_position_count(),
        };
        self.state.archive_day(&state, &summary)
    }

    // -------------------------------------------------------------------------
    // Persistence & telemetry
    // -------------------------------------------------------------------------

    fn build_state(&self, now: DateTime<Utc>) -> EngineState {
        let day = trading_day(now);
        EngineState {
            schema_version: SCHEMA_VERSION,
            saved_at: now,
            mode: self.config.mode,
            iteration: self.iteration,
            trading_day: day,
            cash: self.portfolio.cash(),
            positions: self.portfolio.positions(),
            stats: self.portfolio.stats(),
            cooldowns: self.risk.cooldowns().export(),
            last_prices: self.last_prices.clone(),
            day_closed: self.day_closed_for == Some(day),
            last_archive_day: self.last_archive_day,
        }
    }

    fn persist(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.state.save_current(&self.build_state(now))
    }

    fn log_trade(&self, record: &TradeRecord) {
        if let Err(e) = self.state.append_trade(record) {
            warn!(error = %e, "trade log append failed");
        }
    }

    async fn send_dashboard_update(&self) {
        let stats = self.portfolio.stats();
        let update = PortfolioUpdate {
            mode: self.config.mode,
            iteration: self.iteration,
            cash: self.portfolio.cash(),
            open_positions: self.portfolio.open_position_count(),
            total_pnl: stats.total_pnl,
            trades_count: stats.trades_count,
            breaker: self.breaker.snapshot(),
        };
        self.dashboard.try_send(Channel::Portfolio, &update).await;
    }

    /// Latest quote map for external observers (tests, telemetry).
    pub fn last_prices(&self) -> &HashMap<String, f64> {
        &self.last_prices
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }
}
