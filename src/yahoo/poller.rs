// =============================================================================
// Yahoo poll feed driver
// =============================================================================
//
// Every `poll_interval` the driver fetches a short trailing window and diffs
// it against the newest bar it has already emitted as final:
//   - completed bars newer than that are emitted final, oldest first,
//   - the newest bar, if its interval has not elapsed, is emitted partial.
// Fetch failures are logged and retried on the next tick.
// =============================================================================

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::feed::{FeedContext, FeedEvent, FeedMessage, FeedState};
use crate::market_data::Candle;
use crate::timeframe::Timeframe;
use crate::yahoo::client::{poll_range, YahooClient};

/// Diff a fetched window. Returns the events to emit and the new
/// last-final time.
pub fn diff_window(
    window: &[Candle],
    last_final: Option<i64>,
    interval_secs: i64,
    now: i64,
) -> (Vec<FeedEvent>, Option<i64>) {
    let mut events = Vec::new();
    let mut newest_final = last_final;

    for candle in window {
        let complete = candle.time + interval_secs <= now;
        if complete && last_final.map_or(true, |t| candle.time > t) {
            events.push(FeedEvent { candle: *candle, is_final: true });
            newest_final = Some(newest_final.map_or(candle.time, |t| t.max(candle.time)));
        }
    }

    if let Some(last) = window.last() {
        let forming = last.time + interval_secs > now;
        if forming && newest_final.map_or(true, |t| last.time > t) {
            events.push(FeedEvent { candle: *last, is_final: false });
        }
    }

    (events, newest_final)
}

pub async fn run_poll_feed(
    ctx: FeedContext,
    client: YahooClient,
    symbol: String,
    timeframe: Timeframe,
    interval: &'static str,
    poll_interval: Duration,
) {
    let range = poll_range(timeframe);
    let mut last_final: Option<i64> = None;
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ctx.stopped() => break,
            _ = ticker.tick() => {}
        }

        ctx.set_state(FeedState::Polling);
        let fetched = tokio::select! {
            _ = ctx.stopped() => break,
            result = client.fetch_chart(&symbol, interval, range) => result,
        };

        match fetched {
            Ok(window) => {
                let now = chrono::Utc::now().timestamp();
                let (events, newest) = diff_window(&window, last_final, timeframe.seconds(), now);
                debug!(symbol = %symbol, events = events.len(), last_final = ?newest, "poll diff");
                last_final = newest;
                for event in events {
                    if !ctx.emit(FeedMessage::Update(event)).await {
                        ctx.set_state(FeedState::Idle);
                        return;
                    }
                }
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "poll fetch failed, retrying next tick"),
        }
        ctx.set_state(FeedState::Idle);
    }

    ctx.set_state(FeedState::Idle);
}
