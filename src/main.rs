// =============================================================================
// Kira Signal Engine — Main Entry Point
// =============================================================================
//
// Loads the engine configuration, starts one session for the configured
// instrument and timeframe, and serves the control API. Instrument, timeframe
// and parameter changes arrive through the API and each build a new session.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod error;
mod feed;
mod indicators;
mod instruments;
mod market_data;
mod notifier;
mod providers;
mod runtime_config;
mod session;
mod signal;
mod structure;
mod timeframe;
mod trading_hours;
mod types;
mod yahoo;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::{BinanceClient, BinanceProvider};
use crate::notifier::Notifier;
use crate::providers::ProviderSet;
use crate::runtime_config::EngineConfig;
use crate::session::SessionManager;
use crate::yahoo::{YahooClient, YahooProvider};

const DEFAULT_CONFIG_PATH: &str = "engine_config.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Kira Signal Engine — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = std::env::var("KIRA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    if let Ok(instrument) = std::env::var("KIRA_INSTRUMENT") {
        config.instrument = instrument.trim().to_uppercase();
    }
    if let Ok(timeframe) = std::env::var("KIRA_TIMEFRAME") {
        config.timeframe = timeframe.trim().to_lowercase();
    }
    if let Ok(url) = std::env::var("KIRA_WEBHOOK_URL") {
        config.webhook_url = Some(url).filter(|u| !u.trim().is_empty());
    }

    info!(
        instrument = %config.instrument,
        timeframe = %config.timeframe,
        structure = config.structure_enabled,
        session_filter = config.session_filter_enabled,
        webhook = config.webhook_url.is_some(),
        "Engine configuration"
    );

    // ── 2. Providers ─────────────────────────────────────────────────────
    let binance = BinanceProvider::new(BinanceClient::new()?);
    let yahoo = YahooProvider::new(YahooClient::new()?);
    let providers = ProviderSet::new(Arc::new(binance), Arc::new(yahoo));

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("failed to build webhook client")?;

    // ── 3. Session manager & shared state ────────────────────────────────
    let sessions = Arc::new(SessionManager::new(providers, config, Some(Notifier::new(http))));
    let state = Arc::new(AppState::new(sessions.clone(), &config_path));

    match sessions.start().await {
        Ok(session) => info!(
            session = %session.id,
            instrument = %session.instrument.display_name,
            timeframe = %session.timeframe,
            "Initial session running"
        ),
        Err(e) => {
            error!(error = %e, "Initial session rejected; waiting for a valid request on the API");
            state.push_error_with_code(e.to_string(), Some("startup".into()));
        }
    }

    // ── 4. Start the API server ──────────────────────────────────────────
    let bind_addr = std::env::var("KIRA_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    sessions.shutdown().await;
    if let Err(e) = sessions.config().save(&config_path) {
        error!(error = %e, "Failed to save engine config on shutdown");
    }

    info!("Kira Signal Engine shut down complete.");
    Ok(())
}
