// =============================================================================
// Central Application State — Kira Signal Engine
// =============================================================================
//
// Ties the session manager to the control surface. The manager owns all market
// state; AppState adds the operational bits the dashboard wants (error log,
// uptime, WebSocket counters) and builds the unified snapshot served by
// `GET /api/v1/state` and the WebSocket push feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for the error ring.
// =============================================================================

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::indicators::rsi::rsi_label;
use crate::runtime_config::EngineConfig;
use crate::session::{SessionManager, SessionSummary};
use crate::signal::Signal;
use crate::structure::OrderBlock;
use crate::trading_hours::MarketSession;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Optional machine-readable error kind.
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    pub sessions: Arc<SessionManager>,

    /// Local changes (errors, WebSocket connects). Added to the manager's
    /// version so either side bumps what clients see.
    local_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,
    pub ws_clients: AtomicU64,

    pub recent_errors: RwLock<VecDeque<ErrorRecord>>,

    /// Where parameter changes are persisted.
    pub config_path: PathBuf,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            sessions,
            local_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),
            ws_clients: AtomicU64::new(0),
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
            config_path: config_path.into(),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.local_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.local_version.load(Ordering::SeqCst) + self.sessions.state_version()
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    /// Record an error; the ring is capped at [`MAX_RECENT_ERRORS`].
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push_back(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.pop_front();
        }
        drop(errors);

        self.increment_version();
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Best-effort save of the active configuration.
    pub fn persist_config(&self) {
        let config = self.sessions.config();
        if let Err(e) = config.save(&self.config_path) {
            warn!(error = %e, path = %self.config_path.display(), "failed to save engine config");
            self.push_error(format!("config save failed: {e:#}"));
        }
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a serialisable snapshot of the active session.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();
        let session = self.sessions.current();

        let (latest, latest_order_block, signal) = match session.as_ref().and_then(|s| s.analysis()) {
            Some(analysis) => {
                let ind = &analysis.indicators;
                let rsi = ind.rsi.latest().ok();
                let latest = LatestIndicators {
                    ema_fast: ind.ema_fast.latest().ok(),
                    ema_mid: ind.ema_mid.as_ref().and_then(|s| s.latest().ok()),
                    ema_slow: ind.ema_slow.latest().ok(),
                    sma: ind.sma.latest().ok(),
                    rsi,
                    rsi_zone: rsi.map(rsi_label),
                    macd: ind.macd.latest().ok(),
                    macd_signal: ind.macd_signal.latest().ok(),
                    macd_histogram: ind.macd_histogram.latest().ok(),
                    ema_stack: ind.ema_stack().ok().map(|s| s.to_string()),
                };
                let block = analysis
                    .structure
                    .as_ref()
                    .and_then(|s| s.latest_order_block().copied());
                (Some(latest), block, Some(analysis.signal))
            }
            None => (None, None, None),
        };

        StateSnapshot {
            state_version: self.current_state_version(),
            ws_sequence_number: self.ws_sequence_number.load(Ordering::Relaxed),
            server_time: now.timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            market_session: MarketSession::at(now).to_string(),
            session: session.as_ref().map(|s| s.summary()),
            last_price: session.as_ref().and_then(|s| s.candles().last().map(|c| c.close)),
            signal,
            indicators: latest,
            latest_order_block,
            config: self.sessions.config(),
            recent_errors: self.recent_errors.read().iter().cloned().collect(),
        }
    }
}

// =============================================================================
// Snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LatestIndicators {
    pub ema_fast: Option<f64>,
    pub ema_mid: Option<f64>,
    pub ema_slow: Option<f64>,
    pub sma: Option<f64>,
    pub rsi: Option<f64>,
    pub rsi_zone: Option<&'static str>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub ema_stack: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    /// Regional trading session at `server_time` (UTC).
    pub market_session: String,
    pub session: Option<SessionSummary>,
    pub last_price: Option<f64>,
    pub signal: Option<Signal>,
    pub indicators: Option<LatestIndicators>,
    pub latest_order_block: Option<OrderBlock>,
    pub config: EngineConfig,
    pub recent_errors: Vec<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::providers::ProviderSet;
    use crate::types::FeedKind;

    fn state() -> AppState {
        let providers = ProviderSet::new(
            Arc::new(MockProvider::new(FeedKind::Push)),
            Arc::new(MockProvider::new(FeedKind::Poll)),
        );
        let manager = SessionManager::new(providers, EngineConfig::default(), None);
        AppState::new(Arc::new(manager), std::env::temp_dir().join("kira-unused.json"))
    }

    #[test]
    fn error_ring_is_bounded_and_bumps_version() {
        let s = state();
        let v0 = s.current_state_version();
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            s.push_error(format!("e{i}"));
        }
        let errors = s.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.front().unwrap().message, "e5");
        assert!(s.current_state_version() > v0);
    }

    #[test]
    fn snapshot_without_session() {
        let s = state();
        let snap = s.build_snapshot();
        assert!(snap.session.is_none());
        assert!(snap.signal.is_none());
        assert_eq!(snap.config.instrument, "BTC");
        assert!(["London", "New York", "Tokyo", "Asian Killzone"].contains(&snap.market_session.as_str()));
    }
}
