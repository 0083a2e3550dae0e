// =============================================================================
// State Manager — crash-safe snapshots, daily archives, trade logs
// =============================================================================
//
// File layout under the state root:
//
//   current_state.json             atomic snapshot, schema-tagged
//   archive/state_YYYY-MM-DD.json  per-day snapshot copies
//   archive/summary_YYYY-MM-DD.json
//   trades/trades_YYYY-MM-DD.jsonl one JSON line per fill
//   backup/                        fallback writes when the primary fails
//
// Enriched end-of-day archives land in
//   <archive_root>/YYYY/MM/trades_YYYY-MM-DD_<mode>.json
// with a SHA-256 checksum over the trade array and a mirror copy in
// <archive_root>_backup/.
//
// Atomicity: write tmp -> fsync -> rename. A crash mid-write leaves either
// the previous snapshot or the new one, never a truncated file. Restore
// never crashes: a corrupt or mode-mismatched snapshot is set aside and the
// engine starts fresh.
// =============================================================================

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::portfolio::position::Position;
use crate::portfolio::{PortfolioStats, TradeRecord};
use crate::types::TradingMode;

pub const SCHEMA_VERSION: u32 = 2;
/// Write retries before falling back to the backup path.
const WRITE_ATTEMPTS: u32 = 3;

/// The full persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub mode: TradingMode,
    pub iteration: u64,
    pub trading_day: NaiveDate,
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    pub stats: PortfolioStats,
    /// Cooldown expiry instants per symbol.
    pub cooldowns: HashMap<String, DateTime<Utc>>,
    pub last_prices: HashMap<String, f64>,
    /// Whether the day-close liquidation has already run for `trading_day`.
    pub day_closed: bool,
    pub last_archive_day: Option<NaiveDate>,
}

/// Per-day summary written next to the archived snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub trading_day: NaiveDate,
    pub mode: TradingMode,
    pub trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub realized_pnl: f64,
    pub ending_cash: f64,
    pub open_positions: usize,
}

pub struct StateManager {
    root: PathBuf,
    archive_root: PathBuf,
    archive_backup_root: PathBuf,
}

impl StateManager {
    pub fn new(state_root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Result<Self> {
        let root = state_root.into();
        let archive_root: PathBuf = archive_root.into();
        let archive_backup_root = PathBuf::from(format!(
            "{}_backup",
            archive_root.to_string_lossy()
        ));

        for dir in [
            root.clone(),
            root.join("archive"),
            root.join("trades"),
            root.join("backup"),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create state dir {}", dir.display()))?;
        }

        Ok(Self {
            root,
            archive_root,
            archive_backup_root,
        })
    }

    fn current_path(&self) -> PathBuf {
        self.root.join("current_state.json")
    }

    // -------------------------------------------------------------------------
    // Current snapshot
    // -------------------------------------------------------------------------

    /// Persist the snapshot atomically, retrying with backoff and finally
    /// degrading to the backup directory.
    pub fn save_current(&self, state: &EngineState) -> Result<()> {
        let payload = serde_json::to_vec_pretty(state).context("serialise engine state")?;
        let target = self.current_path();

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..WRITE_ATTEMPTS {
            match atomic_write(&target, &payload) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "state write failed");
                    last_err = Some(e);
                    std::thread::sleep(std::time::Duration::from_millis(50u64 << attempt));
                }
            }
        }

        // Primary path is broken; keep the data somewhere and say so loudly.
        let fallback = self.root.join("backup").join("current_state.json");
        match atomic_write(&fallback, &payload) {
            Ok(()) => {
                error!(
                    path = %fallback.display(),
                    "primary state write failed repeatedly; snapshot degraded to backup path"
                );
                Ok(())
            }
            Err(e) => Err(e).context(format!(
                "state write failed everywhere (primary error: {})",
                last_err.map(|e| e.to_string()).unwrap_or_default()
            )),
        }
    }

    /// Load the last snapshot if it exists, parses, and matches `mode`.
    /// Never returns an error: anything unusable is archived aside and the
    /// caller starts fresh.
    pub fn load_current(&self, mode: TradingMode) -> Option<EngineState> {
        let path = self.current_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return None,
        };

        let state: EngineState = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "corrupt state snapshot; archiving and starting fresh");
                self.quarantine(&path);
                return None;
            }
        };

        if state.mode != mode {
            warn!(
                saved_mode = %state.mode,
                current_mode = %mode,
                "state snapshot mode mismatch; starting fresh"
            );
            return None;
        }

        info!(
            iteration = state.iteration,
            trading_day = %state.trading_day,
            positions = state.positions.len(),
            "state snapshot restored"
        );
        Some(state)
    }

    /// Move an unusable file into backup/ with a timestamped name.
    fn quarantine(&self, path: &Path) {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let dest = self
            .root
            .join("backup")
            .join(format!("corrupt_{stamp}.json"));
        if let Err(e) = fs::rename(path, &dest) {
            error!(error = %e, "failed to quarantine corrupt state file");
        }
    }

    // -------------------------------------------------------------------------
    // Trade log
    // -------------------------------------------------------------------------

    /// Append one trade as a JSON line to the day's log.
    pub fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        let path = self
            .root
            .join("trades")
            .join(format!("trades_{}.jsonl", record.trading_day));
        let mut line = serde_json::to_string(record).context("serialise trade record")?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open trade log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append to trade log {}", path.display()))?;
        Ok(())
    }

    /// Read back a day's trade log (tolerates a truncated final line).
    pub fn read_trades(&self, day: NaiveDate) -> Vec<TradeRecord> {
        let path = self.root.join("trades").join(format!("trades_{day}.jsonl"));
        let Ok(content) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Daily archive
    // -------------------------------------------------------------------------

    /// Archive the day's snapshot and summary. Called once per trading day,
    /// on the first iteration after market close.
    pub fn archive_day(&self, state: &EngineState, summary: &DailySummary) -> Result<()> {
        let day = state.trading_day;
        let state_path = self.root.join("archive").join(format!("state_{day}.json"));
        let summary_path = self
            .root
            .join("archive")
            .join(format!("summary_{day}.json"));

        atomic_write(&state_path, &serde_json::to_vec_pretty(state)?)?;
        atomic_write(&summary_path, &serde_json::to_vec_pretty(summary)?)?;

        info!(day = %day, "daily state archived");
        Ok(())
    }

    /// Write the enriched end-of-day trade archive with per-symbol
    /// aggregates and a SHA-256 checksum, plus a backup mirror.
    pub fn archive_trades(
        &self,
        day: NaiveDate,
        mode: TradingMode,
        trades: &[TradeRecord],
    ) -> Result<PathBuf> {
        let trades_json = serde_json::to_value(trades).context("serialise trades")?;
        let checksum = hex::encode(Sha256::digest(trades_json.to_string().as_bytes()));

        // Per-symbol aggregates.
        let mut by_symbol: HashMap<String, (u64, f64, f64)> = HashMap::new();
        for t in trades {
            let entry = by_symbol.entry(t.symbol.clone()).or_insert((0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += t.shares as f64 * t.price;
            entry.2 += t.pnl.unwrap_or(0.0);
        }
        let aggregates: HashMap<String, serde_json::Value> = by_symbol
            .into_iter()
            .map(|(symbol, (count, notional, pnl))| {
                (
                    symbol,
                    serde_json::json!({
                        "trades": count,
                        "notional": notional,
                        "realized_pnl": pnl,
                    }),
                )
            })
            .collect();

        let archive = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "saved_at": Utc::now(),
            "trading_day": day,
            "mode": mode,
            "trade_count": trades.len(),
            "per_symbol": aggregates,
            "checksum_sha256": checksum,
            "trades": trades_json,
        });
        let payload = serde_json::to_vec_pretty(&archive)?;

        let rel = PathBuf::from(format!("{:04}", day.year()))
            .join(format!("{:02}", day.month()))
            .join(format!("trades_{day}_{mode}.json"));

        let primary = self.archive_root.join(&rel);
        write_with_dirs(&primary, &payload)?;

        // Backup mirror failures are logged, not fatal.
        let backup = self.archive_backup_root.join(&rel);
        if let Err(e) = write_with_dirs(&backup, &payload) {
            warn!(error = %e, "trade archive backup mirror failed");
        }

        info!(day = %day, path = %primary.display(), trades = trades.len(), "trade archive written");
        Ok(primary)
    }
}

/// Write `payload` to `path` atomically: tmp file, fsync, rename.
fn atomic_write(path: &Path, payload: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("create tmp file {}", tmp.display()))?;
        file.write_all(payload)
            .with_context(|| format!("write tmp file {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("fsync tmp file {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} into place", tmp.display()))?;
    Ok(())
}

fn write_with_dirs(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create archive dir {}", parent.display()))?;
    }
    atomic_write(path, payload)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProductType, Side};
    use chrono::TimeZone;

    fn sample_state(mode: TradingMode) -> EngineState {
        let mut positions = HashMap::new();
        positions.insert(
            "NIFTY24AUGFUT".to_string(),
            Position {
                symbol: "NIFTY24AUGFUT".to_string(),
                shares: 75,
                entry_price: 22_000.0,
                invested_amount: 1_650_000.0,
                stop_loss: 21_900.0,
                take_profit: 22_200.0,
                entry_time: Utc::now(),
                confidence: 0.7,
                strategy: "enhanced_momentum".to_string(),
                sector: "index".to_string(),
                atr: 60.0,
                product: ProductType::IndexFuture,
                gtt_id: Some(42),
                peak_price: 22_050.0,
            },
        );
        let mut cooldowns = HashMap::new();
        cooldowns.insert(
            "BANKNIFTY24AUGFUT".to_string(),
            Utc::now() + chrono::Duration::minutes(7),
        );
        let mut last_prices = HashMap::new();
        last_prices.insert("NIFTY24AUGFUT".to_string(), 22_040.0);

        EngineState {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            mode,
            iteration: 50,
            trading_day: NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            cash: 3_350_000.0,
            positions,
            stats: PortfolioStats {
                trades_count: 4,
                winning_trades: 3,
                losing_trades: 1,
                total_pnl: 12_500.0,
                best_trade: 8_000.0,
                worst_trade: -1_500.0,
            },
            cooldowns,
            last_prices,
            day_closed: false,
            last_archive_day: None,
        }
    }

    fn record(day: NaiveDate, pnl: Option<f64>) -> TradeRecord {
        TradeRecord {
            ts: Utc.with_ymd_and_hms(2026, 8, 3, 6, 0, 0).unwrap(),
            symbol: "NIFTY24AUGFUT".to_string(),
            side: Side::Buy,
            shares: 75,
            price: 22_000.0,
            fees: 45.0,
            pnl,
            mode: TradingMode::Paper,
            confidence: 0.7,
            sector: "index".to_string(),
            cash_after: 100_000.0,
            atr: Some(60.0),
            trading_day: day,
        }
    }

    #[test]
    fn save_restore_round_trip_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();

        let state = sample_state(TradingMode::Paper);
        sm.save_current(&state).unwrap();
        let restored = sm.load_current(TradingMode::Paper).unwrap();

        assert_eq!(restored.iteration, state.iteration);
        assert_eq!(restored.trading_day, state.trading_day);
        assert!((restored.cash - state.cash).abs() < 1e-9);
        assert_eq!(restored.positions.len(), 1);
        let pos = &restored.positions["NIFTY24AUGFUT"];
        assert_eq!(pos.shares, 75);
        assert_eq!(pos.gtt_id, Some(42));
        assert_eq!(restored.stats.trades_count, 4);
        assert_eq!(restored.cooldowns.len(), 1);
        // No tmp file left behind.
        assert!(!dir.path().join("state/current_state.json.tmp").exists());
    }

    #[test]
    fn save_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        let state = sample_state(TradingMode::Paper);
        sm.save_current(&state).unwrap();
        sm.save_current(&state).unwrap();
        let restored = sm.load_current(TradingMode::Paper).unwrap();
        assert_eq!(restored.iteration, 50);
    }

    #[test]
    fn mode_mismatch_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        sm.save_current(&sample_state(TradingMode::Paper)).unwrap();
        assert!(sm.load_current(TradingMode::Live).is_none());
        // The paper snapshot is untouched for a paper restart.
        assert!(sm.load_current(TradingMode::Paper).is_some());
    }

    #[test]
    fn corrupt_snapshot_is_quarantined_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        fs::write(
            dir.path().join("state/current_state.json"),
            b"{ truncated garbage",
        )
        .unwrap();

        assert!(sm.load_current(TradingMode::Paper).is_none());
        // Original removed, quarantined copy exists in backup/.
        assert!(!dir.path().join("state/current_state.json").exists());
        let quarantined: Vec<_> = fs::read_dir(dir.path().join("state/backup"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("corrupt_"))
            .collect();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn missing_snapshot_is_simply_none() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        assert!(sm.load_current(TradingMode::Paper).is_none());
    }

    #[test]
    fn trade_log_appends_one_line_per_fill() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();

        sm.append_trade(&record(day, None)).unwrap();
        sm.append_trade(&record(day, Some(1_200.0))).unwrap();

        let path = dir.path().join("state/trades/trades_2026-08-03.jsonl");
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let read_back = sm.read_trades(day);
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[1].pnl, Some(1_200.0));
    }

    #[test]
    fn truncated_trade_line_is_skipped_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        sm.append_trade(&record(day, None)).unwrap();

        // Simulate a crash mid-append.
        let path = dir.path().join("state/trades/trades_2026-08-03.jsonl");
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"symbol\": \"NIF").unwrap();

        assert_eq!(sm.read_trades(day).len(), 1);
    }

    #[test]
    fn daily_archive_writes_state_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        let state = sample_state(TradingMode::Paper);
        let summary = DailySummary {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            trading_day: state.trading_day,
            mode: state.mode,
            trades: 4,
            winning_trades: 3,
            losing_trades: 1,
            realized_pnl: 12_500.0,
            ending_cash: state.cash,
            open_positions: 1,
        };
        sm.archive_day(&state, &summary).unwrap();

        assert!(dir.path().join("state/archive/state_2026-08-03.json").exists());
        let summary_content =
            fs::read_to_string(dir.path().join("state/archive/summary_2026-08-03.json")).unwrap();
        let parsed: DailySummary = serde_json::from_str(&summary_content).unwrap();
        assert_eq!(parsed.trades, 4);
    }

    #[test]
    fn trade_archive_carries_checksum_and_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("state"), dir.path().join("arch")).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        let trades = vec![record(day, None), record(day, Some(950.0))];

        let path = sm.archive_trades(day, TradingMode::Paper, &trades).unwrap();
        assert_eq!(
            path,
            dir.path().join("arch/2026/08/trades_2026-08-03_paper.json")
        );

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["trade_count"], 2);
        assert_eq!(parsed["schema_version"], SCHEMA_VERSION);

        // Checksum verifies against the embedded trade array.
        let embedded = parsed["trades"].to_string();
        let expected = hex::encode(Sha256::digest(embedded.as_bytes()));
        assert_eq!(parsed["checksum_sha256"].as_str().unwrap(), expected);

        // Per-symbol aggregate sums realised pnl.
        let agg = &parsed["per_symbol"]["NIFTY24AUGFUT"];
        assert_eq!(agg["trades"], 2);
        assert!((agg["realized_pnl"].as_f64().unwrap() - 950.0).abs() < 1e-9);

        // Backup mirror exists.
        assert!(dir
            .path()
            .join("arch_backup/2026/08/trades_2026-08-03_paper.json")
            .exists());
    }
}
