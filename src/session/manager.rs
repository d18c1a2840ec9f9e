// =============================================================================
// Session Manager — switch protocol and per-session tasks
// =============================================================================
//
// Exactly one session is active. A switch, serialised by an async mutex:
//   1. validate the request (instrument, timeframe, parameters) before any
//      network call,
//   2. bump the generation and retire the outgoing session,
//   3. stop its consumer task, which stops and joins its feed,
//   4. build the new session, start its feed and consumer.
//
// The consumer task owns the live feed and runs the backfill inline, so every
// store write after seeding and every recompute happens on one task in arrival
// order. On `ConnectionLost` it restarts the feed with bounded exponential
// backoff; exhaustion marks the session Degraded.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::feed::{FeedEnvelope, LiveFeed, ReconnectPolicy};
use crate::market_data::Candle;
use crate::instruments::{self, Instrument};
use crate::notifier::{Notifier, SignalNotification};
use crate::providers::{FeedRequest, MarketProvider, ProviderSet};
use crate::runtime_config::EngineConfig;
use crate::session::{Ingest, Session};
use crate::timeframe::Timeframe;
use crate::types::SessionHealth;

/// Feed channel depth per session.
const FEED_CHANNEL_CAPACITY: usize = 1024;

/// Grace period for the consumer task to finish after a stop signal.
const TASK_STOP_GRACE: Duration = Duration::from_secs(10);

/// Callbacks shared by the tasks of every session.
#[derive(Clone)]
struct SessionHooks {
    version: Arc<AtomicU64>,
    notifier: Option<Notifier>,
}

impl SessionHooks {
    fn changed(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Recompute and publish; notify on a flip to BUY/SELL.
    fn recompute(&self, session: &Session) {
        let result = session.recompute(Utc::now());
        self.changed();

        let (Some(notifier), Some(url)) = (&self.notifier, session.config.webhook_url.as_deref()) else {
            return;
        };
        if let Some(payload) = SignalNotification::for_change(
            result.previous_bias,
            &result.signal,
            &session.instrument.key,
            session.timeframe.token(),
        ) {
            notifier.send(url, payload);
        }
    }
}

/// Tasks belonging to the active session.
struct ActiveSession {
    session: Arc<Session>,
    stop_tx: watch::Sender<bool>,
    consumer: JoinHandle<()>,
}

impl ActiveSession {
    async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(TASK_STOP_GRACE, &mut self.consumer).await.is_err() {
            warn!(session = %self.session.id, "consumer did not stop in time, aborting");
            self.consumer.abort();
            let _ = self.consumer.await;
        }
        debug!(session = %self.session.id, "session tasks stopped");
    }
}

pub struct SessionManager {
    providers: ProviderSet,
    active: Mutex<Option<ActiveSession>>,
    current: RwLock<Option<Arc<Session>>>,
    config: RwLock<EngineConfig>,
    generation: AtomicU64,
    hooks: SessionHooks,
}

impl SessionManager {
    pub fn new(providers: ProviderSet, config: EngineConfig, notifier: Option<Notifier>) -> Self {
        Self {
            providers,
            active: Mutex::new(None),
            current: RwLock::new(None),
            config: RwLock::new(config),
            generation: AtomicU64::new(0),
            hooks: SessionHooks {
                version: Arc::new(AtomicU64::new(0)),
                notifier,
            },
        }
    }

    // ── Readers ───────────────────────────────────────────────────────────

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    /// Configuration of the active (or next) session.
    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Bumped on every observable change (new session, new bar, health).
    pub fn state_version(&self) -> u64 {
        self.hooks.version.load(Ordering::Relaxed)
    }

    /// Generation of the most recent switch; 0 before the first session.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // ── Public operations ─────────────────────────────────────────────────

    /// Start a session for the stored configuration.
    pub async fn start(&self) -> Result<Arc<Session>, EngineError> {
        let config = self.config();
        self.switch(config).await
    }

    pub async fn change_instrument(&self, key: &str) -> Result<Arc<Session>, EngineError> {
        let instrument = instruments::resolve(key)?;
        let config = EngineConfig { instrument: instrument.key, ..self.config() };
        self.switch(config).await
    }

    pub async fn change_timeframe(&self, token: &str) -> Result<Arc<Session>, EngineError> {
        let timeframe = Timeframe::parse(token)?;
        let config = EngineConfig { timeframe: timeframe.token().to_string(), ..self.config() };
        self.switch(config).await
    }

    /// Replace the parameter set. Instrument and timeframe come from `config`.
    pub async fn change_params(&self, config: EngineConfig) -> Result<Arc<Session>, EngineError> {
        self.switch(config).await
    }

    /// Retire the active session and stop all of its tasks.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(old) = active.take() {
            old.session.retire();
            old.shutdown().await;
        }
        *self.current.write() = None;
        self.hooks.changed();
    }

    // ── Switch protocol ───────────────────────────────────────────────────

    async fn switch(&self, config: EngineConfig) -> Result<Arc<Session>, EngineError> {
        // Validation only; nothing has been torn down yet.
        let (instrument, timeframe) = Self::resolve(&config)?;
        let provider = self.providers.for_asset(instrument.asset_class);

        let mut active = self.active.lock().await;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(old) = active.take() {
            old.session.retire();
            old.shutdown().await;
        }

        let session = Arc::new(Session::new(generation, instrument, timeframe, config.clone()));
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let request = FeedRequest {
            instrument: session.instrument.clone(),
            timeframe,
            generation,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        };
        let feed = match provider.start_live_feed(request.clone(), tx.clone()) {
            Ok(feed) => {
                session.attach_feed(feed.status());
                Some(feed)
            }
            Err(e) => {
                error!(error = %e, "live feed failed to start");
                session.set_health(SessionHealth::Degraded { reason: e.to_string() });
                None
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        info!(
            session = %session.id,
            generation,
            instrument = %session.instrument.key,
            timeframe = %timeframe,
            provider = provider.name(),
            feed = ?provider.kind(),
            "session started"
        );

        let consumer = tokio::spawn(run_consumer(ConsumerTask {
            session: session.clone(),
            provider,
            request,
            history_limit: config.history_limit,
            feed,
            tx,
            rx,
            stop_rx,
            policy: ReconnectPolicy::from_config(&config),
            attempt: 0,
            hooks: self.hooks.clone(),
        }));

        *active = Some(ActiveSession { session: session.clone(), stop_tx, consumer });
        *self.current.write() = Some(session.clone());
        *self.config.write() = config;
        self.hooks.changed();
        Ok(session)
    }

    fn resolve(config: &EngineConfig) -> Result<(Instrument, Timeframe), EngineError> {
        config.validate()?;
        let instrument = instruments::resolve(&config.instrument)?;
        let timeframe = Timeframe::parse(&config.timeframe)?;
        timeframe.provider_interval(instrument.asset_class)?;
        Ok((instrument, timeframe))
    }
}

// =============================================================================
// Consumer task
// =============================================================================

struct ConsumerTask {
    session: Arc<Session>,
    provider: Arc<dyn MarketProvider>,
    request: FeedRequest,
    history_limit: usize,
    feed: Option<LiveFeed>,
    tx: mpsc::Sender<FeedEnvelope>,
    rx: mpsc::Receiver<FeedEnvelope>,
    stop_rx: watch::Receiver<bool>,
    policy: ReconnectPolicy,
    /// Reconnects since the last applied update.
    attempt: u32,
    hooks: SessionHooks,
}

async fn run_consumer(mut task: ConsumerTask) {
    let provider = task.provider.clone();
    let session = task.session.clone();
    let limit = task.history_limit;
    let backfill = async move {
        provider
            .fetch_history(&session.instrument, session.timeframe, limit)
            .await
    };
    tokio::pin!(backfill);
    let mut backfill_pending = true;

    loop {
        tokio::select! {
            _ = task.stop_rx.changed() => break,
            history = &mut backfill, if backfill_pending => {
                backfill_pending = false;
                task.apply_history(history);
            }
            msg = task.rx.recv() => {
                let Some(envelope) = msg else { break };
                if !task.handle(envelope).await {
                    break;
                }
            }
        }
    }

    if let Some(feed) = task.feed.take() {
        feed.stop().await;
    }
    debug!(session = %task.session.id, "consumer stopped");
}

impl ConsumerTask {
    fn apply_history(&self, history: Result<Vec<Candle>, EngineError>) {
        match history {
            Ok(history) => {
                if self.session.seed(self.session.generation, history) {
                    self.hooks.recompute(&self.session);
                }
            }
            Err(e) => {
                warn!(
                    session = %self.session.id,
                    instrument = %self.session.instrument.key,
                    provider = self.provider.name(),
                    error = %e,
                    "history unavailable, waiting for live data"
                );
            }
        }
    }

    /// Apply one envelope. Returns `false` once the task should exit.
    async fn handle(&mut self, envelope: FeedEnvelope) -> bool {
        match self.session.ingest(envelope) {
            Ingest::Stale | Ingest::Rejected => {}
            Ingest::Applied { closed_bar } => {
                if self.attempt > 0 {
                    info!(session = %self.session.id, attempts = self.attempt, "feed recovered");
                    self.attempt = 0;
                }
                if self.session.health() != SessionHealth::Live {
                    self.session.set_health(SessionHealth::Live);
                    self.hooks.changed();
                }
                if closed_bar {
                    self.hooks.recompute(&self.session);
                }
            }
            Ingest::ConnectionLost(lost) => return self.reconnect(lost).await,
        }
        true
    }

    async fn reconnect(&mut self, lost: EngineError) -> bool {
        if let Some(feed) = self.feed.take() {
            feed.stop().await;
        }
        self.attempt += 1;
        let Some(delay) = self.policy.next_delay(self.attempt) else {
            error!(
                session = %self.session.id,
                instrument = %self.session.instrument.key,
                attempts = self.attempt - 1,
                error = %lost,
                "reconnect attempts exhausted, session degraded"
            );
            self.session.set_health(SessionHealth::Degraded { reason: lost.to_string() });
            self.hooks.changed();
            return true;
        };

        warn!(
            session = %self.session.id,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %lost,
            "reconnecting feed"
        );
        self.session.set_health(SessionHealth::Reconnecting { attempt: self.attempt });
        self.hooks.changed();

        tokio::select! {
            _ = self.stop_rx.changed() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        match self.provider.start_live_feed(self.request.clone(), self.tx.clone()) {
            Ok(feed) => {
                self.session.attach_feed(feed.status());
                self.feed = Some(feed);
            }
            Err(e) => {
                error!(error = %e, "feed restart failed, session degraded");
                self.session.set_health(SessionHealth::Degraded { reason: e.to_string() });
                self.hooks.changed();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedEvent, FeedMessage};
    use crate::market_data::Candle;
    use crate::providers::mock::MockProvider;
    use crate::types::FeedKind;

    fn bar(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close + 1.0, close - 1.0, close)
    }

    fn history(n: i64) -> Vec<Candle> {
        (1..=n).map(|i| bar(i * 60, 100.0 + i as f64)).collect()
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            timeframe: "1m".into(),
            reconnect_max_attempts: 2,
            reconnect_base_delay_ms: 1,
            reconnect_max_delay_ms: 2,
            ..EngineConfig::default()
        }
    }

    fn manager(crypto: Arc<MockProvider>, traditional: Arc<MockProvider>, config: EngineConfig) -> SessionManager {
        SessionManager::new(ProviderSet::new(crypto, traditional), config, None)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn start_backfills_and_goes_live() {
        let crypto = Arc::new(
            MockProvider::new(FeedKind::Push)
                .with_history(Ok(history(30)))
                .with_script(vec![FeedMessage::Update(FeedEvent { candle: bar(31 * 60, 131.0), is_final: false })]),
        );
        let mgr = manager(crypto.clone(), Arc::new(MockProvider::new(FeedKind::Poll)), fast_config());

        let session = mgr.start().await.unwrap();
        assert_eq!(session.generation, 1);
        assert_eq!(session.summary().feed.map(|f| f.kind), Some(FeedKind::Push));
        assert!(wait_for(|| session.analysis().map_or(false, |a| a.bars == 30)).await);
        assert!(wait_for(|| session.health() == SessionHealth::Live).await);
        assert!(wait_for(|| session.candles().len() == 31).await);
        assert_eq!(crypto.fetches(), 1);
        assert!(mgr.state_version() > 0);

        mgr.shutdown().await;
        assert_eq!(session.health(), SessionHealth::Retired);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_any_network_call() {
        let crypto = Arc::new(MockProvider::new(FeedKind::Push));
        let traditional = Arc::new(MockProvider::new(FeedKind::Poll));
        let mgr = manager(crypto.clone(), traditional.clone(), fast_config());

        assert!(matches!(mgr.change_instrument("DOGE").await, Err(EngineError::UnknownInstrument(_))));
        assert!(matches!(mgr.change_timeframe("2h").await, Err(EngineError::UnsupportedTimeframe(_))));

        // Yahoo cannot serve 4h bars.
        let gold_4h = EngineConfig { instrument: "GOLD".into(), timeframe: "4h".into(), ..fast_config() };
        assert!(matches!(mgr.change_params(gold_4h).await, Err(EngineError::UnsupportedTimeframe(_))));

        let bad = EngineConfig { ema_fast_period: 90, ..fast_config() };
        assert!(matches!(mgr.change_params(bad).await, Err(EngineError::InvalidParameter(_))));

        assert_eq!(crypto.fetches() + traditional.fetches(), 0);
        assert_eq!(crypto.starts() + traditional.starts(), 0);
        assert!(mgr.current().is_none());
        assert_eq!(mgr.generation(), 0);
    }

    #[tokio::test]
    async fn switch_retires_old_session_and_drops_its_events() {
        let crypto = Arc::new(MockProvider::new(FeedKind::Push).with_history(Ok(history(10))));
        let traditional = Arc::new(MockProvider::new(FeedKind::Poll).with_history(Ok(history(5))));
        let mgr = manager(crypto.clone(), traditional.clone(), fast_config());

        let btc = mgr.start().await.unwrap();
        let gold = mgr.change_instrument("gold").await.unwrap();

        assert!(btc.is_retired());
        assert_eq!(btc.health(), SessionHealth::Retired);
        assert_eq!(gold.generation, 2);
        assert_eq!(gold.instrument.key, "GOLD");
        assert_eq!(mgr.current().unwrap().id, gold.id);
        assert_eq!(mgr.config().instrument, "GOLD");

        // A late event stamped with the old generation goes nowhere.
        let late = FeedEnvelope {
            generation: btc.generation,
            message: FeedMessage::Update(FeedEvent { candle: bar(10_000, 1.0), is_final: true }),
        };
        assert_eq!(gold.ingest(late.clone()), Ingest::Stale);
        assert_eq!(btc.ingest(late), Ingest::Stale);
        assert!(gold.candles().iter().all(|c| c.time != 10_000));

        assert!(wait_for(|| gold.analysis().map_or(false, |a| a.bars == 5)).await);
        assert_eq!(traditional.starts(), 1);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn timeframe_change_keeps_instrument() {
        let crypto = Arc::new(MockProvider::new(FeedKind::Push));
        let mgr = manager(crypto.clone(), Arc::new(MockProvider::new(FeedKind::Poll)), fast_config());

        mgr.start().await.unwrap();
        let s = mgr.change_timeframe("1H").await.unwrap();
        assert_eq!(s.timeframe, Timeframe::H1);
        assert_eq!(s.instrument.key, "BTC");
        assert_eq!(mgr.config().timeframe, "1h");
        assert_eq!(crypto.starts(), 2);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn missing_history_is_not_fatal() {
        let crypto = Arc::new(
            MockProvider::new(FeedKind::Push)
                .with_history(Err(EngineError::DataUnavailable("HTTP 503".into()))),
        );
        let mgr = manager(crypto.clone(), Arc::new(MockProvider::new(FeedKind::Poll)), fast_config());

        let s = mgr.start().await.unwrap();
        assert!(wait_for(|| crypto.fetches() == 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(s.health(), SessionHealth::Loading);
        assert!(s.candles().is_empty());
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_connection_loss_degrades_session() {
        let crypto = Arc::new(
            MockProvider::new(FeedKind::Push)
                .with_script(vec![FeedMessage::ConnectionLost("socket reset".into())]),
        );
        let mgr = manager(crypto.clone(), Arc::new(MockProvider::new(FeedKind::Poll)), fast_config());

        let s = mgr.start().await.unwrap();
        assert!(wait_for(|| matches!(s.health(), SessionHealth::Degraded { .. })).await);
        // Initial feed plus two reconnects.
        assert_eq!(crypto.starts(), 3);
        if let SessionHealth::Degraded { reason } = s.health() {
            assert_eq!(reason, "connection lost: socket reset");
        }
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn feed_that_recovers_keeps_reconnecting() {
        // Every feed delivers one update and then drops. Each update resets the
        // attempt counter, so the two-attempt budget is never exhausted.
        let crypto = Arc::new(MockProvider::new(FeedKind::Push).with_script(vec![
            FeedMessage::Update(FeedEvent { candle: bar(60, 100.0), is_final: false }),
            FeedMessage::ConnectionLost("socket reset".into()),
        ]));
        let mgr = manager(crypto.clone(), Arc::new(MockProvider::new(FeedKind::Poll)), fast_config());

        let s = mgr.start().await.unwrap();
        assert!(wait_for(|| crypto.starts() >= 6).await);
        assert!(!matches!(s.health(), SessionHealth::Degraded { .. }));
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn old_feed_event_sent_after_switch_lands_nowhere() {
        let late = bar(50_000, 999.0);
        let crypto = Arc::new(
            MockProvider::new(FeedKind::Push)
                .with_history(Ok(history(10)))
                .then_after(Duration::from_millis(300), FeedMessage::Update(FeedEvent { candle: late, is_final: true })),
        );
        let traditional = Arc::new(MockProvider::new(FeedKind::Poll).with_history(Ok(history(5))));
        let mgr = manager(crypto.clone(), traditional.clone(), fast_config());

        let btc = mgr.start().await.unwrap();
        assert!(wait_for(|| btc.analysis().map_or(false, |a| a.bars == 10)).await);
        let before = btc.candles();

        // The BTC driver is still holding its delayed update.
        let gold = mgr.change_instrument("GOLD").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(btc.candles(), before);
        assert!(wait_for(|| gold.candles().len() == 5).await);
        assert!(gold.candles().iter().all(|c| c.time != late.time));
        assert_eq!(gold.analysis().map(|a| a.bars), Some(5));
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn late_backfill_and_live_bar_end_in_one_analysis() {
        // The live bar closes before history arrives; the final analysis must
        // cover both.
        let crypto = Arc::new(
            MockProvider::new(FeedKind::Push)
                .with_history(Ok(history(30)))
                .with_history_delay(Duration::from_millis(100))
                .with_script(vec![FeedMessage::Update(FeedEvent { candle: bar(31 * 60, 131.0), is_final: true })]),
        );
        let mgr = manager(crypto.clone(), Arc::new(MockProvider::new(FeedKind::Poll)), fast_config());

        let s = mgr.start().await.unwrap();
        assert!(wait_for(|| s.analysis().map_or(false, |a| a.bars == 1)).await);
        assert!(wait_for(|| s.analysis().map_or(false, |a| a.bars == 31)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(s.analysis().map(|a| a.bars), Some(31));
        assert_eq!(s.stats().closed_bars, 31);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn quiet_market_is_ready_after_backfill() {
        let traditional = Arc::new(MockProvider::new(FeedKind::Poll).with_history(Ok(history(20))));
        let config = EngineConfig { instrument: "GOLD".into(), ..fast_config() };
        let mgr = manager(Arc::new(MockProvider::new(FeedKind::Push)), traditional, config);

        let s = mgr.start().await.unwrap();
        assert!(wait_for(|| s.health() == SessionHealth::Ready).await);
        assert_eq!(s.summary().feed.map(|f| f.kind), Some(FeedKind::Poll));
        mgr.shutdown().await;
    }
}
