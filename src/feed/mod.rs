// =============================================================================
// Live feed — one capability, two transports
// =============================================================================
//
// A feed delivers `{candle, is_final}` updates for one (instrument, timeframe)
// onto the owning session's mpsc channel, each tagged with the session's
// generation id. The transport lives in a spawned driver task; `LiveFeed` is
// the handle that starts it once and stops it (signal + join).
//
// Push state machine:  Disconnected -> Connecting -> Streaming
//                        -> Closing -> Disconnected
//                        -> Error   -> Disconnected
// Poll state machine:  Idle <-> Polling
//
// A driver never reconnects by itself: unexpected closure is reported as a
// `ConnectionLost` message and the driver exits.
// =============================================================================

pub mod reconnect;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::market_data::Candle;
use crate::types::FeedKind;

pub use reconnect::ReconnectPolicy;

/// How long `stop()` waits for the driver before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// One bar update from a live transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub candle: Candle,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Update(FeedEvent),
    /// Transport closed without being asked to.
    ConnectionLost(String),
}

/// A feed message stamped with the generation of the session that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEnvelope {
    pub generation: u64,
    pub message: FeedMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
    Closing,
    Error,
    Idle,
    Polling,
}

impl FeedState {
    /// Resting state for a feed of `kind`.
    pub fn resting(kind: FeedKind) -> Self {
        match kind {
            FeedKind::Push => Self::Disconnected,
            FeedKind::Poll => Self::Idle,
        }
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Streaming => "Streaming",
            Self::Closing => "Closing",
            Self::Error => "Error",
            Self::Idle => "Idle",
            Self::Polling => "Polling",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Driver context
// =============================================================================

/// Everything a driver task needs to talk to its owner.
pub struct FeedContext {
    generation: u64,
    tx: mpsc::Sender<FeedEnvelope>,
    stop_rx: watch::Receiver<bool>,
    state: Arc<RwLock<FeedState>>,
}

impl FeedContext {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_state(&self, state: FeedState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(generation = self.generation, from = %*current, to = %state, "feed state");
            *current = state;
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Resolves once `stop()` has been requested (or the handle is gone).
    pub async fn stopped(&self) {
        let mut rx = self.stop_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Send a message to the owner. Returns `false` when the driver should
    /// exit: stop was requested or the consumer went away.
    pub async fn emit(&self, message: FeedMessage) -> bool {
        if self.is_stopped() {
            return false;
        }
        let envelope = FeedEnvelope { generation: self.generation, message };
        tokio::select! {
            biased;
            _ = self.stopped() => false,
            sent = self.tx.send(envelope) => sent.is_ok(),
        }
    }

    /// Report an unexpected close and drop back to the resting state.
    pub async fn connection_lost(&self, kind: FeedKind, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(generation = self.generation, reason = %reason, "feed connection lost");
        self.set_state(FeedState::Error);
        self.emit(FeedMessage::ConnectionLost(reason)).await;
        self.set_state(FeedState::resting(kind));
    }
}

// =============================================================================
// Feed handle
// =============================================================================

/// Shared read view of a feed's transport state. Cheap to clone; the driver
/// keeps updating it after the handle has been handed out.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    kind: FeedKind,
    generation: u64,
    state: Arc<RwLock<FeedState>>,
}

/// Serialisable point-in-time copy of a [`FeedStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    pub kind: FeedKind,
    pub generation: u64,
    pub state: FeedState,
}

impl FeedStatus {
    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            kind: self.kind,
            generation: self.generation,
            state: self.state(),
        }
    }
}

pub struct LiveFeed {
    status: FeedStatus,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tx: Mutex<Option<mpsc::Sender<FeedEnvelope>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl LiveFeed {
    pub fn new(kind: FeedKind, generation: u64, tx: mpsc::Sender<FeedEnvelope>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            status: FeedStatus {
                kind,
                generation,
                state: Arc::new(RwLock::new(FeedState::resting(kind))),
            },
            stop_tx,
            stop_rx,
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> FeedStatus {
        self.status.clone()
    }

    /// Spawn `driver`. Only the first call succeeds.
    pub fn start<F, Fut>(&self, driver: F) -> Result<(), EngineError>
    where
        F: FnOnce(FeedContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::FeedAlreadyStarted);
        }
        let tx = self.tx.lock().take().ok_or(EngineError::FeedAlreadyStarted)?;

        let ctx = FeedContext {
            generation: self.status.generation,
            tx,
            stop_rx: self.stop_rx.clone(),
            state: self.status.state.clone(),
        };
        let handle = tokio::spawn(driver(ctx));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop the driver and wait for it to finish. Safe to call repeatedly and
    /// in any state; after it returns no further message will be sent.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        self.tx.lock().take();

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!(generation = self.status.generation, "feed driver ignored stop, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        *self.status.state.write() = FeedState::resting(self.status.kind);
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}
