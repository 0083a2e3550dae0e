// =============================================================================
// Data Provider — rate-limited, cached access to bars, quotes, and tokens
// =============================================================================
//
// Every broker call site in the engine goes through this provider, which
// owns the rate-limiter acquisition and the caches. Failures are recoverable
// by construction: callers receive empty bars / missing quotes and decide
// what to do; the provider never panics and never propagates transport
// errors upward.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::broker::types::QuotePayload;
use crate::broker::BrokerApi;
use crate::cache::TtlCache;
use crate::data::Interval;
use crate::instruments::exchange_for;
use crate::throttle::RateLimiter;
use crate::types::{Bar, Quote};

/// Quotes above this are considered wire garbage and dropped.
const MAX_SANE_PRICE: f64 = 10_000_000.0;
/// How long to wait for a rate-limit slot before giving up on a fetch.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
/// Historical fetch retries.
const FETCH_ATTEMPTS: u32 = 3;
/// First retry backoff; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Resolved instrument metadata.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub exchange: String,
    pub token: u32,
    pub lot_size: i64,
}

pub struct DataProvider {
    broker: Arc<dyn BrokerApi>,
    limiter: Arc<RateLimiter>,
    /// (symbol, interval, days) -> bars. Shorter TTL than quotes.
    bars_cache: TtlCache<Arc<Vec<Bar>>>,
    /// symbol -> latest quote.
    quote_cache: TtlCache<Quote>,
    /// The instrument map under a single well-known key.
    token_cache: TtlCache<Arc<HashMap<String, TokenEntry>>>,
    /// Symbols with no instrument token; consulted before any fetch so a bad
    /// symbol cannot cause a retry storm.
    missing_tokens: Mutex<HashSet<String>>,
}

const TOKEN_MAP_KEY: &str = "instrument_map";

impl DataProvider {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        limiter: Arc<RateLimiter>,
        price_ttl: Duration,
        instrument_ttl: Duration,
    ) -> Self {
        Self {
            broker,
            limiter,
            bars_cache: TtlCache::new("bars", 512, price_ttl.min(Duration::from_secs(30))),
            quote_cache: TtlCache::new("quotes", 1024, price_ttl),
            token_cache: TtlCache::new("instruments", 4, instrument_ttl),
            missing_tokens: Mutex::new(HashSet::new()),
        }
    }

    /// Sweep expired entries from all internal caches. Called by the
    /// background sweeper task.
    pub fn sweep_caches(&self) {
        self.bars_cache.sweep();
        self.quote_cache.sweep();
        self.token_cache.sweep();
    }

    // -------------------------------------------------------------------------
    // Historical bars
    // -------------------------------------------------------------------------

    /// Fetch `days` of OHLCV history at `interval`. Returns an empty vec on
    /// any failure; the caller decides whether that matters.
    pub async fn fetch_ohlcv(&self, symbol: &str, interval: Interval, days: i64) -> Vec<Bar> {
        let cache_key = format!("{symbol}|{interval}|{days}");
        if let Some(bars) = self.bars_cache.get(&cache_key) {
            return bars.as_ref().clone();
        }

        if self.missing_tokens.lock().contains(symbol) {
            return Vec::new();
        }

        let Some(entry) = self.instrument_lookup(symbol).await else {
            warn!(symbol, "no instrument token, added to missing set");
            self.missing_tokens.lock().insert(symbol.to_string());
            return Vec::new();
        };

        let to = Utc::now();
        let from = to - chrono::Duration::days(days);

        for attempt in 0..FETCH_ATTEMPTS {
            if !self.limiter.acquire(ACQUIRE_TIMEOUT).await {
                warn!(symbol, "rate-limit acquire timed out for historical fetch");
                return Vec::new();
            }

            match self
                .broker
                .historical_data(entry.token, from, to, interval.broker_code())
                .await
            {
                Ok(mut bars) => {
                    bars.sort_by_key(|b| b.ts);
                    debug!(symbol, %interval, count = bars.len(), "historical bars fetched");
                    let shared = Arc::new(bars);
                    self.bars_cache.set(cache_key, Arc::clone(&shared));
                    return shared.as_ref().clone();
                }
                Err(e) => {
                    warn!(
                        symbol,
                        attempt = attempt + 1,
                        error = %e,
                        "historical fetch failed"
                    );
                    if attempt + 1 < FETCH_ATTEMPTS {
                        tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
                    }
                }
            }
        }

        Vec::new()
    }

    // -------------------------------------------------------------------------
    // Quotes
    // -------------------------------------------------------------------------

    /// Fetch quotes for many symbols in one round trip, falling back to
    /// per-symbol fetches if the batch call fails. Only sane quotes
    /// (0 < last_price < 1e7) are returned.
    pub async fn fetch_quotes(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let mut out = HashMap::with_capacity(symbols.len());
        let mut misses = Vec::new();

        for symbol in symbols {
            match self.quote_cache.get(symbol) {
                Some(q) => {
                    out.insert(symbol.clone(), q);
                }
                None => misses.push(symbol.clone()),
            }
        }
        if misses.is_empty() {
            return out;
        }

        let keys: Vec<String> = misses
            .iter()
            .map(|s| format!("{}:{}", exchange_for(s), s))
            .collect();

        if self.limiter.acquire(ACQUIRE_TIMEOUT).await {
            match self.broker.quote(&keys).await {
                Ok(payloads) => {
                    let now = Utc::now();
                    for (symbol, payload) in payloads {
                        if let Some(q) = self.admit_quote(&symbol, &payload, now) {
                            out.insert(symbol, q);
                        }
                    }
                    return out;
                }
                Err(e) => {
                    warn!(error = %e, "batched quote fetch failed, falling back to per-symbol");
                }
            }
        }

        // Per-symbol fallback, fanned out concurrently; each fetch takes its
        // own rate-limit token.
        let singles = join_all(misses.iter().map(|s| self.fetch_quote(s))).await;
        for quote in singles.into_iter().flatten() {
            out.insert(quote.symbol.clone(), quote);
        }
        out
    }

    /// Fetch a single symbol's quote.
    pub async fn fetch_quote(&self, symbol: &str) -> Option<Quote> {
        if let Some(q) = self.quote_cache.get(symbol) {
            return Some(q);
        }

        if !self.limiter.acquire(ACQUIRE_TIMEOUT).await {
            warn!(symbol, "rate-limit acquire timed out for quote fetch");
            return None;
        }

        let key = format!("{}:{}", exchange_for(symbol), symbol);
        match self.broker.quote(&[key]).await {
            Ok(payloads) => payloads
                .get(symbol)
                .and_then(|p| self.admit_quote(symbol, p, Utc::now())),
            Err(e) => {
                warn!(symbol, error = %e, "quote fetch failed");
                None
            }
        }
    }

    /// Validate a quote payload and admit it into the cache.
    fn admit_quote(
        &self,
        symbol: &str,
        payload: &QuotePayload,
        now: chrono::DateTime<Utc>,
    ) -> Option<Quote> {
        if !(payload.last_price > 0.0 && payload.last_price < MAX_SANE_PRICE) {
            warn!(symbol, last_price = payload.last_price, "quote rejected as insane");
            return None;
        }
        let quote = Quote {
            symbol: symbol.to_string(),
            last_price: payload.last_price,
            bid: payload.bid,
            ask: payload.ask,
            as_of: now,
        };
        self.quote_cache.set(symbol, quote.clone());
        Some(quote)
    }

    // -------------------------------------------------------------------------
    // Instrument lookup
    // -------------------------------------------------------------------------

    /// O(1) lookup of `(exchange, token, lot_size)` backed by a periodically
    /// rebuilt map of the NSE / NFO / BFO instrument dumps.
    pub async fn instrument_lookup(&self, symbol: &str) -> Option<TokenEntry> {
        if let Some(map) = self.token_cache.get(TOKEN_MAP_KEY) {
            return map.get(symbol).cloned();
        }

        let map = self.rebuild_token_map().await?;
        map.get(symbol).cloned()
    }

    async fn rebuild_token_map(&self) -> Option<Arc<HashMap<String, TokenEntry>>> {
        let mut map: HashMap<String, TokenEntry> = HashMap::new();

        for exchange in ["NSE", "NFO", "BFO"] {
            if !self.limiter.acquire(ACQUIRE_TIMEOUT).await {
                warn!(exchange, "rate-limit acquire timed out for instrument dump");
                continue;
            }
            match self.broker.instruments(exchange).await {
                Ok(rows) => {
                    for row in rows {
                        map.insert(
                            row.tradingsymbol.clone(),
                            TokenEntry {
                                exchange: row.exchange.clone(),
                                token: row.instrument_token,
                                lot_size: row.lot_size.max(1),
                            },
                        );
                    }
                }
                Err(e) => {
                    warn!(exchange, error = %e, "instrument dump fetch failed");
                }
            }
        }

        if map.is_empty() {
            return None;
        }

        debug!(entries = map.len(), "instrument token map rebuilt");
        let shared = Arc::new(map);
        self.token_cache.set(TOKEN_MAP_KEY, Arc::clone(&shared));
        // A fresh dump means previously-missing symbols deserve another try.
        self.missing_tokens.lock().clear();
        Some(shared)
    }
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("bars_cache", &self.bars_cache)
            .field("quote_cache", &self.quote_cache)
            .field("missing_tokens", &self.missing_tokens.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testkit::MockBroker;
    use crate::config::RateLimitConfig;
    use std::sync::atomic::Ordering;

    fn provider(broker: Arc<MockBroker>) -> DataProvider {
        // Generous limits so tests never wait on the limiter.
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
            burst: 100,
            per_second: 100,
            per_minute: 10_000,
        }));
        DataProvider::new(
            broker,
            limiter,
            Duration::from_secs(60),
            Duration::from_secs(1800),
        )
    }

    fn sample_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                ts: Utc::now() + chrono::Duration::minutes(5 * i as i64),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 10_000.0,
            })
            .collect()
    }

    #[tokio::test]
    async fn ohlcv_fetch_and_cache() {
        let broker = Arc::new(MockBroker::new());
        broker.add_instrument("NSE", "RELIANCE", 738561, 1);
        broker.bars_by_token.lock().insert(738561, sample_bars(10));

        let dp = provider(Arc::clone(&broker));
        let bars = dp.fetch_ohlcv("RELIANCE", Interval::M5, 5).await;
        assert_eq!(bars.len(), 10);

        // Second call is served from cache: remove the broker data and the
        // result is unchanged.
        broker.bars_by_token.lock().clear();
        let again = dp.fetch_ohlcv("RELIANCE", Interval::M5, 5).await;
        assert_eq!(again.len(), 10);
    }

    #[tokio::test]
    async fn ohlcv_retries_then_succeeds() {
        let broker = Arc::new(MockBroker::new());
        broker.add_instrument("NSE", "RELIANCE", 738561, 1);
        broker.bars_by_token.lock().insert(738561, sample_bars(4));
        broker.historical_failures.store(2, Ordering::SeqCst);

        let dp = provider(Arc::clone(&broker));
        let bars = dp.fetch_ohlcv("RELIANCE", Interval::M5, 5).await;
        assert_eq!(bars.len(), 4, "third attempt should succeed");
    }

    #[tokio::test]
    async fn unknown_symbol_enters_missing_set_once() {
        let broker = Arc::new(MockBroker::new());
        broker.add_instrument("NSE", "RELIANCE", 738561, 1);

        let dp = provider(Arc::clone(&broker));
        assert!(dp.fetch_ohlcv("GHOST", Interval::M5, 5).await.is_empty());
        // Second fetch short-circuits on the missing set (no token lookup).
        assert!(dp.fetch_ohlcv("GHOST", Interval::M5, 5).await.is_empty());
    }

    #[tokio::test]
    async fn quotes_batch_path() {
        let broker = Arc::new(MockBroker::new());
        broker.set_quote("NIFTY24AUGFUT", 22450.0);
        broker.set_quote("RELIANCE", 2950.0);

        let dp = provider(Arc::clone(&broker));
        let quotes = dp
            .fetch_quotes(&["NIFTY24AUGFUT".to_string(), "RELIANCE".to_string()])
            .await;
        assert_eq!(quotes.len(), 2);
        assert!((quotes["RELIANCE"].last_price - 2950.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quotes_fall_back_per_symbol_on_batch_failure() {
        let broker = Arc::new(MockBroker::new());
        broker.set_quote("NIFTY24AUGFUT", 22450.0);
        broker.set_quote("RELIANCE", 2950.0);
        broker.quote_batch_failures.store(1, Ordering::SeqCst);

        let dp = provider(Arc::clone(&broker));
        let quotes = dp
            .fetch_quotes(&["NIFTY24AUGFUT".to_string(), "RELIANCE".to_string()])
            .await;
        assert_eq!(quotes.len(), 2, "per-symbol fallback should recover both");
    }

    #[tokio::test]
    async fn insane_quotes_rejected() {
        let broker = Arc::new(MockBroker::new());
        broker.set_quote("BAD", 0.0);
        broker.set_quote("WILD", 2e7);
        broker.set_quote("FINE", 150.0);

        let dp = provider(Arc::clone(&broker));
        let quotes = dp
            .fetch_quotes(&["BAD".to_string(), "WILD".to_string(), "FINE".to_string()])
            .await;
        assert_eq!(quotes.len(), 1);
        assert!(quotes.contains_key("FINE"));
    }

    #[tokio::test]
    async fn instrument_lookup_resolves_lot_size() {
        let broker = Arc::new(MockBroker::new());
        broker.add_instrument("NFO", "NIFTY24AUGFUT", 12345, 75);

        let dp = provider(Arc::clone(&broker));
        let entry = dp.instrument_lookup("NIFTY24AUGFUT").await.unwrap();
        assert_eq!(entry.token, 12345);
        assert_eq!(entry.lot_size, 75);
        assert_eq!(entry.exchange, "NFO");
        assert!(dp.instrument_lookup("NOPE").await.is_none());
    }
}
