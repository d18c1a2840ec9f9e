// =============================================================================
// WebSocket feed — snapshot push for dashboards
// =============================================================================
//
// `GET /api/v1/ws` upgrades to a socket that receives the full StateSnapshot
// once on connect and again on the next 500 ms tick after any state change
// (new bar, new session, health transition, recorded error). Inbound frames are
// only used for Ping/Close handling.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app_state::AppState;

const PUSH_TICK: Duration = Duration::from_millis(500);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_client(socket, state))
}

/// Keeps `ws_clients` in step with live connections, however the loop exits.
struct ClientSlot(Arc<AppState>);

impl ClientSlot {
    fn claim(state: Arc<AppState>) -> Self {
        let clients = state.ws_clients.fetch_add(1, Ordering::Relaxed) + 1;
        state.increment_version();
        info!(clients, "dashboard client connected");
        Self(state)
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        let clients = self.0.ws_clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        self.0.increment_version();
        info!(clients, "dashboard client disconnected");
    }
}

/// Outbound half plus what has already been sent on it.
struct SnapshotPusher {
    sink: SplitSink<WebSocket, Message>,
    state: Arc<AppState>,
    sent_version: Option<u64>,
}

impl SnapshotPusher {
    /// Send a snapshot if the state moved since the last one.
    async fn push_if_changed(&mut self) -> Result<(), axum::Error> {
        let version = self.state.current_state_version();
        if self.sent_version == Some(version) {
            return Ok(());
        }

        let snapshot = self.state.build_snapshot();
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                // Serialisation problems are ours, not the client's.
                warn!(error = %e, "snapshot serialisation failed");
                return Ok(());
            }
        };

        self.sink.send(Message::Text(json)).await?;
        let seq = self.state.ws_sequence_number.fetch_add(1, Ordering::Relaxed) + 1;
        self.sent_version = Some(version);
        debug!(version, seq, "snapshot pushed");
        Ok(())
    }
}

async fn serve_client(socket: WebSocket, state: Arc<AppState>) {
    let _slot = ClientSlot::claim(state.clone());
    let (sink, mut inbound) = socket.split();
    let mut pusher = SnapshotPusher { sink, state, sent_version: None };

    let mut ticker = interval(PUSH_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick fires immediately and delivers the connect snapshot.
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = pusher.push_if_changed().await {
                    debug!(error = %e, "push failed, closing socket");
                    break;
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Ping(payload))) => {
                    if pusher.sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "socket read error");
                    break;
                }
            },
        }
    }
}
