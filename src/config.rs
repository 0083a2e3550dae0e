// =============================================================================
// Engine Configuration — serde-backed settings with atomic save
// =============================================================================
//
// Every tunable parameter of the engine lives here. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file. Persistence uses the tmp + rename pattern to prevent
// corruption on crash.
//
// Validation is fatal at startup: an out-of-range capital or nonsensical
// limit refuses to run rather than trading with broken parameters.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TradingMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_initial_capital() -> f64 {
    1_000_000.0
}

fn default_universe() -> Vec<String> {
    vec![
        "NIFTY".to_string(),
        "BANKNIFTY".to_string(),
        "FINNIFTY".to_string(),
        "SENSEX".to_string(),
    ]
}

fn default_reference_index() -> String {
    "NIFTY".to_string()
}

fn default_max_positions() -> usize {
    5
}

fn default_min_position_size() -> f64 {
    0.10
}

fn default_mid_position_size() -> f64 {
    0.18
}

fn default_max_position_size() -> f64 {
    0.25
}

fn default_risk_per_trade_pct() -> f64 {
    0.01
}

fn default_atr_stop_multiplier() -> f64 {
    1.5
}

fn default_atr_target_multiplier() -> f64 {
    2.5
}

fn default_trailing_activation_multiplier() -> f64 {
    1.0
}

fn default_trailing_stop_multiplier() -> f64 {
    1.2
}

fn default_min_agreement() -> f64 {
    0.4
}

fn default_min_confidence() -> f64 {
    0.35
}

fn default_top_n() -> usize {
    3
}

fn default_cooldown_minutes() -> i64 {
    10
}

fn default_stop_loss_cooldown_minutes() -> i64 {
    20
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_price_ttl_secs() -> u64 {
    60
}

fn default_instrument_ttl_secs() -> u64 {
    1800
}

fn default_per_second() -> usize {
    3
}

fn default_per_minute() -> usize {
    1000
}

fn default_burst() -> usize {
    5
}

fn default_max_iterations() -> u64 {
    10_000
}

fn default_exit_score_threshold() -> f64 {
    0.5
}

fn default_state_root() -> String {
    "state".to_string()
}

fn default_archive_root() -> String {
    "trade_archives".to_string()
}

// =============================================================================
// RateLimitConfig
// =============================================================================

/// Broker API call budget across the three sliding windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per 100 ms burst window.
    #[serde(default = "default_burst")]
    pub burst: usize,
    /// Calls allowed per second.
    #[serde(default = "default_per_second")]
    pub per_second: usize,
    /// Calls allowed per minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            per_second: default_per_second(),
            per_minute: default_per_minute(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Operational mode ----------------------------------------------------

    /// Paper, live, or backtest. Persisted state is only restored when the
    /// saved mode matches this one.
    #[serde(default)]
    pub mode: TradingMode,

    /// Starting capital in rupees. Validated to [1_000, 100_000_000].
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    // --- Universe ------------------------------------------------------------

    /// Symbols the engine scans for entries.
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,

    /// Index symbol driving the market-regime detector.
    #[serde(default = "default_reference_index")]
    pub reference_index: String,

    // --- Position limits -----------------------------------------------------

    /// Maximum number of concurrently open positions.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    /// Position value as a fraction of cash for low-confidence entries.
    #[serde(default = "default_min_position_size")]
    pub min_position_size: f64,

    /// Position value fraction for mid-confidence entries (>= 0.5).
    #[serde(default = "default_mid_position_size")]
    pub mid_position_size: f64,

    /// Position value fraction for high-confidence entries (>= 0.7).
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    // --- Risk knobs ----------------------------------------------------------

    /// Fraction of cash risked per trade (1% paper, 0.5% live profile).
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,

    #[serde(default = "default_atr_stop_multiplier")]
    pub atr_stop_multiplier: f64,

    #[serde(default = "default_atr_target_multiplier")]
    pub atr_target_multiplier: f64,

    /// Profit (in ATRs) required before the trailing stop activates.
    #[serde(default = "default_trailing_activation_multiplier")]
    pub trailing_activation_multiplier: f64,

    /// Trailing distance in ATRs once active.
    #[serde(default = "default_trailing_stop_multiplier")]
    pub trailing_stop_multiplier: f64,

    /// Composite exit score at which a position is closed.
    #[serde(default = "default_exit_score_threshold")]
    pub exit_score_threshold: f64,

    // --- Signal thresholds ---------------------------------------------------

    /// Minimum fraction of strategies that must agree for an entry.
    #[serde(default = "default_min_agreement")]
    pub min_agreement: f64,

    /// Minimum aggregate confidence for an entry.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Entry candidates taken per iteration, best-confidence first.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    // --- Cooldowns -----------------------------------------------------------

    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,

    /// Extended cooldown after a stop-loss exit (>= 2x base).
    #[serde(default = "default_stop_loss_cooldown_minutes")]
    pub stop_loss_cooldown_minutes: i64,

    // --- Cadence -------------------------------------------------------------

    /// Seconds between controller iterations (30 paper, 60 live).
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Hard cap on iterations per start.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    // --- Caching & throttling ------------------------------------------------

    #[serde(default = "default_price_ttl_secs")]
    pub price_ttl_secs: u64,

    #[serde(default = "default_instrument_ttl_secs")]
    pub instrument_ttl_secs: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    // --- F&O structures ------------------------------------------------------

    /// Open one regime-selected option structure per day on the reference
    /// index (straddle / condor / strangle / butterfly).
    #[serde(default)]
    pub enable_fno_structures: bool,

    // --- Overrides -----------------------------------------------------------

    /// Trade outside exchange hours. Requires an explicit true; used by the
    /// backtest harness and for dry runs only.
    #[serde(default)]
    pub bypass_market_hours: bool,

    // --- Persistence & telemetry ---------------------------------------------

    /// Root directory for snapshots, archives and trade logs.
    #[serde(default = "default_state_root")]
    pub state_root: String,

    /// Root directory for enriched end-of-day trade archives.
    #[serde(default = "default_archive_root")]
    pub archive_root: String,

    /// Dashboard base URL; `None` disables the sink entirely.
    #[serde(default)]
    pub dashboard_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Deserialising an empty object exercises every serde default and
        // keeps Default and the file format in lockstep.
        serde_json::from_str("{}").expect("empty config object must deserialise")
    }
}

/// A configuration problem that refuses startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("initial_capital {0} outside [1000, 100000000]")]
    CapitalOutOfRange(f64),
    #[error("position size fractions must satisfy 0 < min <= mid <= max <= 1, got {0}/{1}/{2}")]
    PositionSizeOrder(f64, f64, f64),
    #[error("risk_per_trade_pct {0} outside (0, 0.1]")]
    RiskPerTrade(f64),
    #[error("universe is empty")]
    EmptyUniverse,
    #[error("min_agreement {0} outside (0, 1]")]
    MinAgreement(f64),
    #[error("stop_loss_cooldown_minutes {0} must be >= 2x cooldown_minutes {1}")]
    CooldownOrder(i64, i64),
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            mode = %config.mode,
            universe = ?config.universe,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration using an atomic write (tmp then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Validate the configuration. Errors here are fatal at startup.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(1_000.0..=100_000_000.0).contains(&self.initial_capital) {
            return Err(ConfigError::CapitalOutOfRange(self.initial_capital));
        }
        if self.universe.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        let (lo, mid, hi) = (
            self.min_position_size,
            self.mid_position_size,
            self.max_position_size,
        );
        if !(lo > 0.0 && lo <= mid && mid <= hi && hi <= 1.0) {
            return Err(ConfigError::PositionSizeOrder(lo, mid, hi));
        }
        if !(self.risk_per_trade_pct > 0.0 && self.risk_per_trade_pct <= 0.1) {
            return Err(ConfigError::RiskPerTrade(self.risk_per_trade_pct));
        }
        if !(self.min_agreement > 0.0 && self.min_agreement <= 1.0) {
            return Err(ConfigError::MinAgreement(self.min_agreement));
        }
        if self.stop_loss_cooldown_minutes < 2 * self.cooldown_minutes {
            return Err(ConfigError::CooldownOrder(
                self.stop_loss_cooldown_minutes,
                self.cooldown_minutes,
            ));
        }
        Ok(())
    }

    /// Apply the live trading profile: halved per-trade risk and a slower
    /// iteration cadence.
    pub fn apply_live_profile(&mut self) {
        if self.mode == TradingMode::Live {
            self.risk_per_trade_pct = self.risk_per_trade_pct.min(0.005);
            self.check_interval_secs = self.check_interval_secs.max(60);
        }
    }
}
