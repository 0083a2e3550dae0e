// =============================================================================
// Option chain — model and rate-limited fetch
// =============================================================================
//
// The chain is built from the instrument dump filtered to one underlying and
// one expiry, then hydrated with a single batched quote call. Expiry
// selection prefers the nearest strictly-future expiry, falls back to a
// same-day expiry, and finally to the most recent past one (stale dumps
// around rollover). The chain is capped to the contracts nearest the money
// to keep quote round trips small.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::BrokerApi;
use crate::fno::greeks::{black_scholes_greeks, Greeks};
use crate::instruments::{self, Right};
use crate::market_hours::trading_day;
use crate::throttle::RateLimiter;

/// Maximum contracts hydrated per chain (calls + puts combined).
const MAX_CONTRACTS: usize = 150;
/// Risk-free rate used for advisory greeks.
const RISK_FREE_RATE: f64 = 0.065;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// One quoted contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    pub strike: i64,
    pub last_price: f64,
    pub open_interest: f64,
    pub volume: f64,
    pub implied_volatility: f64,
    pub greeks: Option<Greeks>,
}

/// A hydrated option chain for one underlying and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub spot: f64,
    pub lot_size: i64,
    pub calls: BTreeMap<i64, OptionContract>,
    pub puts: BTreeMap<i64, OptionContract>,
}

impl OptionChain {
    /// Strike closest to spot among the call strikes.
    pub fn atm_strike(&self) -> Option<i64> {
        self.calls
            .keys()
            .min_by_key(|&&k| (k as f64 - self.spot).abs() as i64)
            .copied()
    }

    /// The spacing between adjacent strikes.
    pub fn strike_step(&self) -> Option<i64> {
        let mut strikes = self.calls.keys();
        let first = *strikes.next()?;
        let second = *strikes.next()?;
        Some(second - first)
    }

    /// The strike `steps` rungs away from ATM (positive = higher).
    pub fn strike_offset(&self, steps: i64) -> Option<i64> {
        let atm = self.atm_strike()?;
        let step = self.strike_step()?;
        let target = atm + steps * step;
        self.calls.contains_key(&target).then_some(target)
    }

    pub fn call(&self, strike: i64) -> Option<&OptionContract> {
        self.calls.get(&strike)
    }

    pub fn put(&self, strike: i64) -> Option<&OptionContract> {
        self.puts.get(&strike)
    }

    /// Mean of call and put liquidity near the money, scaled to [0, 1].
    pub fn liquidity_score(&self) -> f64 {
        let Some(atm) = self.atm_strike() else {
            return 0.0;
        };
        let step = self.strike_step().unwrap_or(1);
        let band = atm - step..=atm + step;
        let near: Vec<&OptionContract> = self
            .calls
            .range(band.clone())
            .map(|(_, c)| c)
            .chain(self.puts.range(band).map(|(_, c)| c))
            .collect();
        if near.is_empty() {
            return 0.0;
        }
        let mean_oi = near.iter().map(|c| c.open_interest).sum::<f64>() / near.len() as f64;
        (mean_oi / 1_000_000.0).min(1.0)
    }
}

pub struct ChainFetcher {
    broker: Arc<dyn BrokerApi>,
    limiter: Arc<RateLimiter>,
}

impl ChainFetcher {
    pub fn new(broker: Arc<dyn BrokerApi>, limiter: Arc<RateLimiter>) -> Self {
        Self { broker, limiter }
    }

    /// Fetch and hydrate the chain for `underlying` around `spot`.
    pub async fn fetch(&self, underlying: &str, spot: f64) -> Result<OptionChain> {
        let exchange = if matches!(underlying, "SENSEX" | "BANKEX") {
            "BFO"
        } else {
            "NFO"
        };

        if !self.limiter.acquire(ACQUIRE_TIMEOUT).await {
            anyhow::bail!("rate limiter saturated fetching instrument dump");
        }
        let rows = self
            .broker
            .instruments(exchange)
            .await
            .context("chain: instrument dump fetch failed")?;

        // Options on this underlying only. The prefix check would also match
        // e.g. BANKNIFTY rows when asked for NIFTY, so re-parse and compare.
        let mut options: Vec<(NaiveDate, i64, Right, String, i64)> = Vec::new();
        for row in &rows {
            if !row.tradingsymbol.starts_with(underlying) {
                continue;
            }
            if row.instrument_type != "CE" && row.instrument_type != "PE" {
                continue;
            }
            let Ok(parsed) = instruments::parse_fno_symbol(&row.tradingsymbol) else {
                continue;
            };
            if parsed.underlying != underlying {
                continue;
            }
            let Some(expiry) = row.expiry.or(Some(parsed.expiry)) else {
                continue;
            };
            let strike = row.strike.round() as i64;
            if strike <= 0 {
                continue;
            }
            let right = if row.instrument_type == "CE" {
                Right::Call
            } else {
                Right::Put
            };
            options.push((expiry, strike, right, row.tradingsymbol.clone(), row.lot_size));
        }

        if options.is_empty() {
            anyhow::bail!("no option contracts found for {underlying} on {exchange}");
        }

        let today = trading_day(chrono::Utc::now());
        let expiry = select_expiry(options.iter().map(|(e, ..)| *e), today)
            .context("no usable expiry in dump")?;

        let mut selected: Vec<(i64, Right, String, i64)> = options
            .into_iter()
            .filter(|(e, ..)| *e == expiry)
            .map(|(_, strike, right, sym, lot)| (strike, right, sym, lot))
            .collect();

        // Nearest-the-money first, capped for quote latency.
        selected.sort_by_key(|(strike, ..)| (*strike as f64 - spot).abs() as i64);
        selected.truncate(MAX_CONTRACTS);

        let lot_size = selected
            .iter()
            .map(|(.., lot)| *lot)
            .find(|l| *l > 0)
            .unwrap_or_else(|| instruments::lot_size(underlying));

        let keys: Vec<String> = selected
            .iter()
            .map(|(_, _, sym, _)| format!("{exchange}:{sym}"))
            .collect();

        if !self.limiter.acquire(ACQUIRE_TIMEOUT).await {
            anyhow::bail!("rate limiter saturated fetching chain quotes");
        }
        let quotes = self
            .broker
            .quote(&keys)
            .await
            .context("chain: quote fetch failed")?;

        let years = years_until(expiry, today);
        let mut calls = BTreeMap::new();
        let mut puts = BTreeMap::new();

        for (strike, right, symbol, _) in selected {
            let Some(q) = quotes.get(&symbol) else {
                continue;
            };
            if q.last_price <= 0.0 {
                continue;
            }
            let iv = q.iv.unwrap_or(0.0);
            let greeks = (iv > 0.0)
                .then(|| {
                    black_scholes_greeks(spot, strike as f64, iv, years, RISK_FREE_RATE, right)
                })
                .flatten();
            let contract = OptionContract {
                symbol,
                strike,
                last_price: q.last_price,
                open_interest: q.oi.unwrap_or(0.0),
                volume: q.volume.unwrap_or(0.0),
                implied_volatility: iv,
                greeks,
            };
            match right {
                Right::Call => {
                    calls.insert(strike, contract);
                }
                Right::Put => {
                    puts.insert(strike, contract);
                }
                Right::Future => {}
            }
        }

        if calls.is_empty() && puts.is_empty() {
            warn!(underlying, %expiry, "chain hydrated empty, all quotes rejected");
        }
        debug!(
            underlying,
            %expiry,
            calls = calls.len(),
            puts = puts.len(),
            "option chain hydrated"
        );

        Ok(OptionChain {
            underlying: underlying.to_string(),
            expiry,
            spot,
            lot_size,
            calls,
            puts,
        })
    }
}

/// Nearest strictly-future expiry, else same-day, else most recent past.
fn select_expiry(expiries: impl Iterator<Item = NaiveDate>, today: NaiveDate) -> Option<NaiveDate> {
    let mut future: Option<NaiveDate> = None;
    let mut same_day: Option<NaiveDate> = None;
    let mut past: Option<NaiveDate> = None;

    for e in expiries {
        if e > today {
            future = Some(future.map_or(e, |f| f.min(e)));
        } else if e == today {
            same_day = Some(e);
        } else {
            past = Some(past.map_or(e, |p| p.max(e)));
        }
    }
    future.or(same_day).or(past)
}

fn years_until(expiry: NaiveDate, today: NaiveDate) -> f64 {
    ((expiry - today).num_days().max(0) as f64 + 0.5) / 365.0
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn contract(symbol: &str, strike: i64, price: f64, oi: f64) -> OptionContract {
        OptionContract {
            symbol: symbol.to_string(),
            strike,
            last_price: price,
            open_interest: oi,
            volume: 1000.0,
            implied_volatility: 0.14,
            greeks: None,
        }
    }

    fn sample_chain() -> OptionChain {
        let mut calls = BTreeMap::new();
        let mut puts = BTreeMap::new();
        for strike in (21_800..=22_200).step_by(50) {
            calls.insert(strike, contract(&format!("NIFTYC{strike}"), strike, 120.0, 900_000.0));
            puts.insert(strike, contract(&format!("NIFTYP{strike}"), strike, 110.0, 800_000.0));
        }
        OptionChain {
            underlying: "NIFTY".to_string(),
            expiry: NaiveDate::from_ymd_opt(2024, 8, 8).unwrap(),
            spot: 22_012.0,
            lot_size: 75,
            calls,
            puts,
        }
    }

    #[test]
    fn atm_and_step() {
        let chain = sample_chain();
        assert_eq!(chain.atm_strike(), Some(22_000));
        assert_eq!(chain.strike_step(), Some(50));
        assert_eq!(chain.strike_offset(2), Some(22_100));
        assert_eq!(chain.strike_offset(-2), Some(21_900));
        // Off the end of the chain.
        assert_eq!(chain.strike_offset(10), None);
    }

    #[test]
    fn expiry_prefers_strictly_future() {
        let today = NaiveDate::from_ymd_opt(2024, 8, 7).unwrap();
        let dates = [
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 8).unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 29).unwrap(),
        ];
        assert_eq!(
            select_expiry(dates.into_iter(), today),
            NaiveDate::from_ymd_opt(2024, 8, 8)
        );
    }

    #[test]
    fn expiry_falls_back_to_same_day_then_past() {
        let today = NaiveDate::from_ymd_opt(2024, 8, 8).unwrap();
        let same_and_past = [
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 8).unwrap(),
        ];
        assert_eq!(
            select_expiry(same_and_past.into_iter(), today),
            NaiveDate::from_ymd_opt(2024, 8, 8)
        );

        let only_past = [
            NaiveDate::from_ymd_opt(2024, 7, 25).unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
        ];
        assert_eq!(
            select_expiry(only_past.into_iter(), today),
            NaiveDate::from_ymd_opt(2024, 8, 1)
        );
    }

    #[test]
    fn liquidity_score_scales_with_oi() {
        let chain = sample_chain();
        let score = chain.liquidity_score();
        assert!(score > 0.5 && score <= 1.0, "score {score}");

        let mut thin = sample_chain();
        for c in thin.calls.values_mut() {
            c.open_interest = 10_000.0;
        }
        for p in thin.puts.values_mut() {
            p.open_interest = 10_000.0;
        }
        assert!(thin.liquidity_score() < score);
    }

    #[test]
    fn years_until_floors_at_intraday() {
        let today = NaiveDate::from_ymd_opt(2024, 8, 8).unwrap();
        let same_day = years_until(today, today);
        assert!(same_day > 0.0);
        let week = years_until(today + chrono::Duration::days(7), today);
        assert!(week > same_day);
    }
}
