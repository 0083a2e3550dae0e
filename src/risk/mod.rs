// =============================================================================
// Risk & Exit Manager — sizing, trailing stops, exit scoring, cooldowns
// =============================================================================
//
// Entry sizing (long):
//   stop_distance   = atr * atr_stop_mult * confidence_adj
//   confidence_adj  = max(0.8, 1 - max(0, 0.6 - confidence))
//   target_distance = atr * (atr_target_mult + max(0, confidence - 0.5))
//   risk budget     = cash * risk_per_trade_pct
//   shares          = min(risk size, confidence-tier size, affordability),
//                     rounded down to a whole number of lots.
//
// Trailing stops only ever tighten. Exit decisions combine five factors into
// a score in [0, 1]; stop-loss and take-profit breaches score 1.0 outright.
// Exits bypass regime bias, agreement floors, and cooldowns everywhere.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::instruments::{looks_like_fno, parse_fno_symbol};
use crate::portfolio::position::Position;
use crate::strategy::aggregator::AggregateSignal;
use crate::types::Action;

/// Cash headroom kept back for fees when computing affordability.
const FEE_HEADROOM: f64 = 0.995;
/// Expected holding time for the time-decay exit factor.
const EXPECTED_HOLD_MINUTES: f64 = 240.0;

/// Risk knobs, extracted from the engine config.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub risk_per_trade_pct: f64,
    pub atr_stop_multiplier: f64,
    pub atr_target_multiplier: f64,
    pub trailing_activation_multiplier: f64,
    pub trailing_stop_multiplier: f64,
    pub min_position_size: f64,
    pub mid_position_size: f64,
    pub max_position_size: f64,
    pub exit_score_threshold: f64,
    pub cooldown_minutes: i64,
    pub stop_loss_cooldown_minutes: i64,
}

impl RiskConfig {
    pub fn from_engine(cfg: &EngineConfig) -> Self {
        Self {
            risk_per_trade_pct: cfg.risk_per_trade_pct,
            atr_stop_multiplier: cfg.atr_stop_multiplier,
            atr_target_multiplier: cfg.atr_target_multiplier,
            trailing_activation_multiplier: cfg.trailing_activation_multiplier,
            trailing_stop_multiplier: cfg.trailing_stop_multiplier,
            min_position_size: cfg.min_position_size,
            mid_position_size: cfg.mid_position_size,
            max_position_size: cfg.max_position_size,
            exit_score_threshold: cfg.exit_score_threshold,
            cooldown_minutes: cfg.cooldown_minutes,
            stop_loss_cooldown_minutes: cfg.stop_loss_cooldown_minutes,
        }
    }
}

/// A fully sized entry proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedEntry {
    pub shares: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Exit decision with its contributing factors spelled out.
#[derive(Debug, Clone, Serialize)]
pub struct ExitEvaluation {
    pub should_exit: bool,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Per-symbol re-entry cooldowns. Exits are always allowed regardless.
#[derive(Debug, Default)]
pub struct CooldownBook {
    until: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an exit; stop-loss exits cool for the extended window.
    pub fn record_exit(
        &self,
        symbol: &str,
        stop_loss_exit: bool,
        now: DateTime<Utc>,
        cfg: &RiskConfig,
    ) {
        let minutes = if stop_loss_exit {
            cfg.stop_loss_cooldown_minutes
        } else {
            cfg.cooldown_minutes
        };
        let until = now + Duration::minutes(minutes);
        debug!(symbol, until = %until, stop_loss_exit, "cooldown recorded");
        self.until.lock().insert(symbol.to_string(), until);
    }

    /// True while the symbol may not be re-entered. Entry becomes legal at
    /// exactly `exit_time + cooldown`, not before.
    pub fn blocked(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.until.lock().get(symbol) {
            Some(until) => now < *until,
            None => false,
        }
    }

    /// Expiry instants for persistence.
    pub fn export(&self) -> HashMap<String, DateTime<Utc>> {
        self.until.lock().clone()
    }

    /// Restore from persisted state, dropping already-expired entries.
    pub fn restore(&self, saved: HashMap<String, DateTime<Utc>>, now: DateTime<Utc>) {
        let mut map = self.until.lock();
        map.clear();
        for (symbol, until) in saved {
            if until > now {
                map.insert(symbol, until);
            }
        }
    }
}

pub struct RiskManager {
    cfg: RiskConfig,
    cooldowns: CooldownBook,
}

impl RiskManager {
    pub fn new(cfg: RiskConfig) -> Self {
        Self {
            cfg,
            cooldowns: CooldownBook::new(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    pub fn cooldowns(&self) -> &CooldownBook {
        &self.cooldowns
    }

    // -------------------------------------------------------------------------
    // Entry sizing
    // -------------------------------------------------------------------------

    /// Size a long entry. `None` when the inputs cannot support at least one
    /// lot within the risk budget.
    pub fn size_entry(
        &self,
        entry_price: f64,
        atr: f64,
        confidence: f64,
        cash: f64,
        lot_size: i64,
    ) -> Option<SizedEntry> {
        if !(entry_price > 0.0 && atr > 0.0 && cash > 0.0) || lot_size <= 0 {
            return None;
        }

        let cfg = &self.cfg;
        let confidence_adj = (1.0 - (0.6 - confidence).max(0.0)).max(0.8);
        let stop_distance = atr * cfg.atr_stop_multiplier * confidence_adj;
        let target_distance = atr * (cfg.atr_target_multiplier + (confidence - 0.5).max(0.0));
        if stop_distance <= 0.0 {
            return None;
        }

        let risk_budget = cash * cfg.risk_per_trade_pct;
        let by_risk = (risk_budget / stop_distance).floor() as i64;

        let tier_fraction = if confidence >= 0.7 {
            cfg.max_position_size
        } else if confidence >= 0.5 {
            cfg.mid_position_size
        } else {
            cfg.min_position_size
        };
        let by_tier = (cash * tier_fraction / entry_price).floor() as i64;
        let by_cash = (cash * FEE_HEADROOM / entry_price).floor() as i64;

        let raw = by_risk.min(by_tier).min(by_cash);
        let shares = (raw / lot_size) * lot_size;
        if shares <= 0 {
            debug!(
                entry_price,
                atr, confidence, by_risk, by_tier, by_cash, lot_size,
                "entry sized to zero, rejected"
            );
            return None;
        }

        Some(SizedEntry {
            shares,
            stop_loss: entry_price - stop_distance,
            take_profit: entry_price + target_distance,
        })
    }

    // -------------------------------------------------------------------------
    // Trailing stop
    // -------------------------------------------------------------------------

    /// Candidate for a tightened stop, or `None` when the trail has not
    /// activated or would not improve the stop. The result is always beyond
    /// break-even for longs.
    pub fn trailing_stop_candidate(&self, position: &Position, current: f64) -> Option<f64> {
        let cfg = &self.cfg;
        let atr = position.atr;
        if atr <= 0.0 || current <= 0.0 {
            return None;
        }

        if position.is_long() {
            let profit = current - position.entry_price;
            if profit < atr * cfg.trailing_activation_multiplier {
                return None;
            }
            let candidate =
                (current - atr * cfg.trailing_stop_multiplier).max(position.entry_price * 1.001);
            (candidate > position.stop_loss).then_some(candidate)
        } else {
            let profit = position.entry_price - current;
            if profit < atr * cfg.trailing_activation_multiplier {
                return None;
            }
            let candidate =
                (current + atr * cfg.trailing_stop_multiplier).min(position.entry_price * 0.999);
            (candidate < position.stop_loss).then_some(candidate)
        }
    }

    // -------------------------------------------------------------------------
    // Exit scoring
    // -------------------------------------------------------------------------

    /// Composite exit decision for one open position.
    ///
    /// * `invalidation` — the aggregator's exit-mode output for this symbol,
    ///   when bar data was available this iteration.
    /// * `current_atr` — fresh ATR for the volatility factor, if known.
    pub fn evaluate_exit(
        &self,
        position: &Position,
        price: f64,
        now: DateTime<Utc>,
        invalidation: Option<&AggregateSignal>,
        current_atr: Option<f64>,
    ) -> ExitEvaluation {
        let mut reasons = Vec::new();

        // Hard levels first: a breached stop or target is a full exit.
        if position.is_long() {
            if price <= position.stop_loss {
                return hard_exit(format!("stop_loss hit: {price:.2} <= {:.2}", position.stop_loss));
            }
            if price >= position.take_profit {
                return hard_exit(format!(
                    "take_profit hit: {price:.2} >= {:.2}",
                    position.take_profit
                ));
            }
        } else {
            if price >= position.stop_loss {
                return hard_exit(format!("stop_loss hit: {price:.2} >= {:.2}", position.stop_loss));
            }
            if price <= position.take_profit {
                return hard_exit(format!(
                    "take_profit hit: {price:.2} <= {:.2}",
                    position.take_profit
                ));
            }
        }

        let mut score = 0.0;

        // (a) Adverse excursion relative to the stop distance.
        let stop_distance = (position.entry_price - position.stop_loss).abs();
        if stop_distance > 0.0 {
            let adverse = if position.is_long() {
                (position.entry_price - price).max(0.0)
            } else {
                (price - position.entry_price).max(0.0)
            };
            let part = (adverse / stop_distance).min(1.0) * 0.30;
            if part > 0.0 {
                reasons.push(format!("adverse excursion {:.0}% of stop", adverse / stop_distance * 100.0));
            }
            score += part;
        }

        // (b) Time held versus the expected holding window.
        let held_minutes = (now - position.entry_time).num_minutes().max(0) as f64;
        let time_part = (held_minutes / EXPECTED_HOLD_MINUTES).min(1.0) * 0.15;
        if held_minutes >= EXPECTED_HOLD_MINUTES {
            reasons.push(format!("held {held_minutes:.0}m past expected window"));
        }
        score += time_part;

        // (c) Drawdown from the best price seen.
        if position.atr > 0.0 && position.peak_price > 0.0 {
            let give_back = position.drawdown_from_peak(price) * position.peak_price;
            let part = (give_back / (2.0 * position.atr)).min(1.0) * 0.25;
            if part > 0.1 {
                reasons.push(format!("gave back {give_back:.2} from peak"));
            }
            score += part;
        }

        // (d) Volatility regime shift since entry.
        if let Some(atr_now) = current_atr {
            if position.atr > 0.0 && atr_now > position.atr * 1.5 {
                reasons.push(format!(
                    "volatility expanded {:.1}x since entry",
                    atr_now / position.atr
                ));
                score += 0.15;
            }
        }

        // (e) Strategy invalidation from the signal pipeline.
        if let Some(signal) = invalidation {
            let against = (position.is_long() && signal.action == Action::Sell)
                || (position.is_short() && signal.action == Action::Buy);
            if against {
                reasons.push(format!(
                    "strategies invalidated entry (confidence {:.2})",
                    signal.confidence
                ));
                score += signal.confidence * 0.40;
            }
        }

        let score = score.min(1.0);
        ExitEvaluation {
            should_exit: score >= self.cfg.exit_score_threshold,
            score,
            reasons,
        }
    }

    // -------------------------------------------------------------------------
    // Cooldowns
    // -------------------------------------------------------------------------

    pub fn record_exit(&self, symbol: &str, stop_loss_exit: bool, now: DateTime<Utc>) {
        self.cooldowns.record_exit(symbol, stop_loss_exit, now, &self.cfg);
    }

    pub fn entry_blocked_by_cooldown(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns.blocked(symbol, now)
    }

    // -------------------------------------------------------------------------
    // End-of-day expiry policy
    // -------------------------------------------------------------------------

    /// Position keys whose F&O contracts expire on `today` and must be
    /// liquidated at T-5m. Unparseable F&O symbols are reported loudly and
    /// excluded rather than silently skipped.
    pub fn expiring_today(
        &self,
        positions: &HashMap<String, Position>,
        today: NaiveDate,
    ) -> Vec<String> {
        let mut out = Vec::new();
        for (key, pos) in positions {
            if !looks_like_fno(&pos.symbol) {
                continue;
            }
            match parse_fno_symbol(&pos.symbol) {
                Ok(parsed) => {
                    if parsed.expiry == today {
                        info!(key = %key, expiry = %parsed.expiry, "contract expires today");
                        out.push(key.clone());
                    }
                }
                Err(e) => {
                    error!(key = %key, error = %e, "unparseable F&O symbol in book; manual attention required");
                }
            }
        }
        out.sort();
        out
    }
}

fn hard_exit(reason: String) -> ExitEvaluation {
    ExitEvaluation {
        should_exit: true,
        score: 1.0,
        reasons: vec![reason],
    }
}
