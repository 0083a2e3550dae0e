// =============================================================================
// Meridian Engine — Main Entry Point
// =============================================================================
//
// Automated intraday and F&O trading for Indian equity indices. The engine
// starts in paper mode unless the config explicitly says otherwise; live
// mode additionally requires broker credentials in the environment.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod broker;
mod cache;
mod config;
mod controller;
mod dashboard;
mod data;
mod fno;
mod indicators;
mod instruments;
mod market_hours;
mod orders;
mod portfolio;
mod regime;
mod risk;
mod state_store;
mod strategy;
mod throttle;
mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::client::KiteClient;
use crate::broker::BrokerApi;
use crate::config::EngineConfig;
use crate::controller::TradingController;
use crate::dashboard::DashboardSink;
use crate::data::DataProvider;
use crate::fno::ChainFetcher;
use crate::orders::ExecutionEngine;
use crate::portfolio::reconcile::Reconciler;
use crate::portfolio::Portfolio;
use crate::risk::{RiskConfig, RiskManager};
use crate::state_store::StateManager;
use crate::throttle::RateLimiter;
use crate::types::TradingMode;

/// Cache sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian engine starting up");

    let config_path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "engine_config.json".into());
    let mut config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // Env overrides for the universe.
    if let Ok(symbols) = std::env::var("MERIDIAN_UNIVERSE") {
        config.universe = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    // Configuration errors are fatal: refuse to trade on broken parameters.
    if let Err(e) = config.validate() {
        error!(error = %e, "configuration invalid, refusing to start");
        return Err(e.into());
    }
    config.apply_live_profile();

    info!(
        mode = %config.mode,
        universe = ?config.universe,
        initial_capital = config.initial_capital,
        check_interval_secs = config.check_interval_secs,
        "engine configured"
    );

    // ── 2. Broker client ─────────────────────────────────────────────────
    let api_key = std::env::var("KITE_API_KEY").unwrap_or_default();
    let access_token = std::env::var("KITE_ACCESS_TOKEN").unwrap_or_default();
    if config.mode == TradingMode::Live && (api_key.is_empty() || access_token.is_empty()) {
        error!("live mode requires KITE_API_KEY and KITE_ACCESS_TOKEN");
        anyhow::bail!("missing broker credentials for live mode");
    }
    let broker: Arc<dyn BrokerApi> = Arc::new(KiteClient::new(api_key, access_token));

    // ── 3. Core components ───────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let data = Arc::new(DataProvider::new(
        Arc::clone(&broker),
        Arc::clone(&limiter),
        Duration::from_secs(config.price_ttl_secs),
        Duration::from_secs(config.instrument_ttl_secs),
    ));
    let portfolio = Arc::new(Portfolio::new(config.mode, config.initial_capital));
    let reconciler = Arc::new(Reconciler::new(Arc::clone(&broker)));
    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&broker),
        Arc::clone(&portfolio),
        Arc::clone(&reconciler),
        Arc::clone(&limiter),
    ));
    let risk = RiskManager::new(RiskConfig::from_engine(&config));
    let state = Arc::new(StateManager::new(
        config.state_root.clone(),
        config.archive_root.clone(),
    )?);
    let dashboard = Arc::new(DashboardSink::new(config.dashboard_url.clone()));

    // ── 4. Background cache sweeper ──────────────────────────────────────
    let sweeper_data = Arc::clone(&data);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            sweeper_data.sweep_caches();
        }
    });

    // ── 5. Initial reconciliation (live mode picks up broker truth) ─────
    if config.mode == TradingMode::Live {
        match reconciler.sync_positions(&portfolio).await {
            Ok(summary) => info!(?summary, "initial reconciliation complete"),
            Err(e) => warn!(error = %e, "initial reconciliation failed, continuing"),
        }
    }

    // ── 6. Controller: restore and run ───────────────────────────────────
    let chain_fetcher = ChainFetcher::new(Arc::clone(&broker), Arc::clone(&limiter));
    let mut controller = TradingController::new(
        config,
        data,
        portfolio,
        engine,
        risk,
        state,
        dashboard,
        chain_fetcher,
    );
    controller.restore();

    // ── 7. Graceful shutdown: drain the current iteration, persist, exit ─
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, draining current iteration");
            shutdown_signal.store(true, Ordering::SeqCst);
        }
    });

    controller.run(shutdown).await;

    info!("Meridian engine shut down complete");
    Ok(())
}
