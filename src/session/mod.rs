// =============================================================================
// Session — one instrument + timeframe + parameter set
// =============================================================================
//
// A session exclusively owns its candle store and everything derived from it.
// Two writers reach the store: the backfill task and the feed consumer. Both
// go through the store mutex, and both check the generation and retired flag
// first so nothing lands on a session that has been switched away from.
// =============================================================================

pub mod manager;

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::feed::{FeedEnvelope, FeedMessage, FeedSnapshot, FeedStatus};
use crate::indicators::IndicatorSet;
use crate::instruments::Instrument;
use crate::market_data::{Candle, CandleStore};
use crate::runtime_config::EngineConfig;
use crate::signal::{self, Signal};
use crate::structure::SmcAnalysis;
use crate::timeframe::Timeframe;
use crate::types::{Bias, SessionHealth};

pub use manager::SessionManager;

/// Derived state, rebuilt on every closed bar.
#[derive(Debug, Clone, Serialize)]
pub struct SessionAnalysis {
    pub indicators: IndicatorSet,
    /// `None` when structure mode is off.
    pub structure: Option<SmcAnalysis>,
    pub signal: Signal,
    pub bars: usize,
    pub computed_at: DateTime<Utc>,
}

/// Result of handing a feed message to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    /// Wrong generation or retired session; dropped.
    Stale,
    Applied { closed_bar: bool },
    /// Store refused the update (out of order).
    Rejected,
    /// The feed dropped; carries [`EngineError::ConnectionLost`].
    ConnectionLost(EngineError),
}

/// Result of a recompute: the signal before and after.
#[derive(Debug, Clone)]
pub struct Recomputed {
    pub previous_bias: Bias,
    pub signal: Signal,
}

pub struct Session {
    pub id: Uuid,
    pub generation: u64,
    pub instrument: Instrument,
    pub timeframe: Timeframe,
    pub config: EngineConfig,
    pub created_at: DateTime<Utc>,
    store: Mutex<CandleStore>,
    analysis: RwLock<Option<SessionAnalysis>>,
    health: RwLock<SessionHealth>,
    feed: RwLock<Option<FeedStatus>>,
    retired: AtomicBool,
}

impl Session {
    pub fn new(generation: u64, instrument: Instrument, timeframe: Timeframe, config: EngineConfig) -> Self {
        let store = CandleStore::new(config.retention_cap, timeframe.seconds());
        Self {
            id: Uuid::new_v4(),
            generation,
            instrument,
            timeframe,
            config,
            created_at: Utc::now(),
            store: Mutex::new(store),
            analysis: RwLock::new(None),
            health: RwLock::new(SessionHealth::Loading),
            feed: RwLock::new(None),
            retired: AtomicBool::new(false),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn retire(&self) {
        if !self.retired.swap(true, Ordering::AcqRel) {
            *self.health.write() = SessionHealth::Retired;
            info!(session = %self.id, generation = self.generation, instrument = %self.instrument.key, "session retired");
        }
    }

    pub fn health(&self) -> SessionHealth {
        self.health.read().clone()
    }

    /// Set health unless the session is already retired.
    pub fn set_health(&self, health: SessionHealth) {
        if self.is_retired() {
            return;
        }
        let mut current = self.health.write();
        if *current != health {
            debug!(session = %self.id, from = %*current, to = %health, "session health");
            *current = health;
        }
    }

    /// Publish the transport state of the feed currently serving this session.
    pub fn attach_feed(&self, status: FeedStatus) {
        *self.feed.write() = Some(status);
    }

    fn accepts(&self, generation: u64) -> bool {
        generation == self.generation && !self.is_retired()
    }

    // ── Writers ───────────────────────────────────────────────────────────

    /// Apply one feed message.
    pub fn ingest(&self, envelope: FeedEnvelope) -> Ingest {
        if !self.accepts(envelope.generation) {
            debug!(
                session = %self.id,
                generation = self.generation,
                incoming = envelope.generation,
                "stale feed message dropped"
            );
            return Ingest::Stale;
        }

        match envelope.message {
            FeedMessage::Update(event) => {
                let mut store = self.store.lock();
                // Re-check under the lock: retire() may have raced us.
                if self.is_retired() {
                    return Ingest::Stale;
                }
                match store.apply_update(event.candle, event.is_final) {
                    Ok(outcome) => Ingest::Applied { closed_bar: outcome.closed_bar() },
                    Err(EngineError::OutOfOrderUpdate { .. }) => Ingest::Rejected,
                    Err(e) => {
                        debug!(error = %e, "update refused");
                        Ingest::Rejected
                    }
                }
            }
            FeedMessage::ConnectionLost(reason) => Ingest::ConnectionLost(EngineError::ConnectionLost(reason)),
        }
    }

    /// Merge a backfill. Returns `false` if it was discarded as stale. A
    /// session still `Loading` becomes `Ready`.
    pub fn seed(&self, generation: u64, history: Vec<Candle>) -> bool {
        if !self.accepts(generation) {
            debug!(session = %self.id, "stale backfill discarded");
            return false;
        }
        let mut store = self.store.lock();
        if self.is_retired() {
            return false;
        }
        let bars = store.seed_history(history);
        drop(store);
        {
            let mut health = self.health.write();
            if *health == SessionHealth::Loading {
                *health = SessionHealth::Ready;
            }
        }
        info!(session = %self.id, instrument = %self.instrument.key, timeframe = %self.timeframe, bars, "history seeded");
        true
    }

    /// Rebuild indicators, structure and signal from the closed bars. Called
    /// only from the session's consumer task, so results land in bar order.
    pub fn recompute(&self, now: DateTime<Utc>) -> Recomputed {
        let candles = self.store.lock().closed_candles();

        let indicators = IndicatorSet::compute(&candles, &self.config);
        let structure = self
            .config
            .structure_enabled
            .then(|| SmcAnalysis::analyze(&candles, &self.config));
        let signal = if candles.is_empty() {
            Signal::neutral("no data", self.config.risk_reward_ratio, now)
        } else {
            signal::aggregate(&indicators, structure.as_ref(), &self.config, now)
        };

        let analysis = SessionAnalysis {
            indicators,
            structure,
            signal: signal.clone(),
            bars: candles.len(),
            computed_at: now,
        };

        let previous_bias = {
            let mut slot = self.analysis.write();
            let previous = slot.as_ref().map(|a| a.signal.bias).unwrap_or_default();
            *slot = Some(analysis);
            previous
        };

        if previous_bias != signal.bias {
            info!(
                session = %self.id,
                instrument = %self.instrument.key,
                from = %previous_bias,
                to = %signal.bias,
                reason = %signal.reason,
                "bias changed"
            );
        }
        Recomputed { previous_bias, signal }
    }

    // ── Readers ───────────────────────────────────────────────────────────

    pub fn candles(&self) -> Vec<Candle> {
        self.store.lock().candles()
    }

    pub fn analysis(&self) -> Option<SessionAnalysis> {
        self.analysis.read().clone()
    }

    pub fn signal(&self) -> Option<Signal> {
        self.analysis.read().as_ref().map(|a| a.signal.clone())
    }

    pub fn stats(&self) -> StoreStats {
        let store = self.store.lock();
        StoreStats {
            bars: store.len(),
            closed_bars: store.closed_len(),
            capacity: store.capacity(),
            head_open: store.head_is_open(),
            last_time: store.head().map(|c| c.time),
            rejected_updates: store.rejected_count(),
            gaps: store.gap_count(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            generation: self.generation,
            instrument: self.instrument.clone(),
            timeframe: self.timeframe.token().to_string(),
            health: self.health(),
            feed: self.feed.read().as_ref().map(FeedStatus::snapshot),
            created_at: self.created_at,
            store: self.stats(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub bars: usize,
    pub closed_bars: usize,
    pub capacity: usize,
    pub head_open: bool,
    pub last_time: Option<i64>,
    pub rejected_updates: u64,
    pub gaps: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub generation: u64,
    pub instrument: Instrument,
    pub timeframe: String,
    pub health: SessionHealth,
    pub feed: Option<FeedSnapshot>,
    pub created_at: DateTime<Utc>,
    pub store: StoreStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedEvent;
    use crate::instruments;

    fn session(generation: u64) -> Session {
        Session::new(
            generation,
            instruments::resolve("BTC").unwrap(),
            Timeframe::M1,
            EngineConfig::default(),
        )
    }

    fn update(generation: u64, time: i64, close: f64, is_final: bool) -> FeedEnvelope {
        FeedEnvelope {
            generation,
            message: FeedMessage::Update(FeedEvent {
                candle: Candle::new(time, close, close, close, close),
                is_final,
            }),
        }
    }

    #[test]
    fn updates_from_other_generations_are_dropped() {
        let s = session(2);
        assert_eq!(s.ingest(update(1, 60, 1.0, true)), Ingest::Stale);
        assert_eq!(s.ingest(update(3, 60, 1.0, true)), Ingest::Stale);
        assert!(s.candles().is_empty());

        assert_eq!(s.ingest(update(2, 60, 1.0, true)), Ingest::Applied { closed_bar: true });
        assert_eq!(s.candles().len(), 1);
    }

    #[test]
    fn retired_session_ignores_everything() {
        let s = session(1);
        s.retire();
        assert_eq!(s.ingest(update(1, 60, 1.0, true)), Ingest::Stale);
        assert!(!s.seed(1, vec![Candle::new(60, 1.0, 1.0, 1.0, 1.0)]));
        assert!(s.candles().is_empty());
        assert_eq!(s.health(), SessionHealth::Retired);

        s.set_health(SessionHealth::Live);
        assert_eq!(s.health(), SessionHealth::Retired);
    }

    #[test]
    fn out_of_order_update_is_rejected_and_counted() {
        let s = session(1);
        s.ingest(update(1, 120, 1.0, true));
        assert_eq!(s.ingest(update(1, 60, 2.0, false)), Ingest::Rejected);
        assert_eq!(s.candles().len(), 1);
        assert_eq!(s.stats().rejected_updates, 1);
    }

    #[test]
    fn partial_updates_do_not_close_bars() {
        let s = session(1);
        assert_eq!(s.ingest(update(1, 60, 1.0, false)), Ingest::Applied { closed_bar: false });
        assert_eq!(s.ingest(update(1, 60, 1.1, false)), Ingest::Applied { closed_bar: false });
        assert_eq!(s.ingest(update(1, 60, 1.2, true)), Ingest::Applied { closed_bar: true });
        assert!(!s.stats().head_open);
    }

    #[test]
    fn connection_lost_is_passed_up() {
        let s = session(1);
        let env = FeedEnvelope { generation: 1, message: FeedMessage::ConnectionLost("eof".into()) };
        assert_eq!(s.ingest(env), Ingest::ConnectionLost(EngineError::ConnectionLost("eof".into())));
    }

    #[test]
    fn recompute_on_empty_store_is_no_data() {
        let s = session(1);
        let r = s.recompute(Utc::now());
        assert_eq!(r.signal.bias, Bias::Neutral);
        assert_eq!(r.signal.reason, "no data");
        assert_eq!(s.analysis().unwrap().bars, 0);
    }

    #[test]
    fn recompute_reports_previous_bias() {
        let s = session(1);
        let history: Vec<Candle> = (0..200)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 1.5 } else { -1.5 };
                Candle::new((i + 1) * 60, c, c, c, c)
            })
            .collect();
        assert_eq!(s.health(), SessionHealth::Loading);
        assert!(s.seed(1, history));
        assert_eq!(s.health(), SessionHealth::Ready);

        let first = s.recompute(Utc::now());
        assert_eq!(first.previous_bias, Bias::Neutral);
        let second = s.recompute(Utc::now());
        assert_eq!(second.previous_bias, first.signal.bias);
        assert_eq!(s.summary().store.closed_bars, 200);
    }

    #[test]
    fn summary_shows_attached_feed() {
        let s = session(1);
        assert!(s.summary().feed.is_none());

        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let feed = crate::feed::LiveFeed::new(crate::types::FeedKind::Poll, 1, tx);
        s.attach_feed(feed.status());
        let snap = s.summary().feed.unwrap();
        assert_eq!(snap.state, crate::feed::FeedState::Idle);
        assert_eq!(snap.generation, 1);
        assert_eq!(s.summary().store.capacity, EngineConfig::default().retention_cap);
    }
}
