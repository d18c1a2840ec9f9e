// =============================================================================
// Binance kline WebSocket — push feed driver
// =============================================================================
//
// One socket per (symbol, interval):
//   wss://stream.binance.com:9443/ws/<symbol>@kline_<interval>
// Every kline frame becomes a `FeedEvent`; `k.x` marks the bar closed.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::binance::client::parse_str_f64;
use crate::feed::{FeedContext, FeedEvent, FeedMessage, FeedState};
use crate::market_data::Candle;
use crate::types::FeedKind;

const WS_BASE: &str = "wss://stream.binance.com:9443/ws";

pub fn kline_url(symbol: &str, interval: &str) -> String {
    format!("{WS_BASE}/{}@kline_{interval}", symbol.to_lowercase())
}

/// Drive the socket until stopped or the connection drops.
pub async fn run_kline_feed(ctx: FeedContext, symbol: String, interval: String) {
    let url = kline_url(&symbol, &interval);
    ctx.set_state(FeedState::Connecting);
    info!(url = %url, symbol = %symbol, interval = %interval, generation = ctx.generation(), "connecting to kline WebSocket");

    let connected = tokio::select! {
        _ = ctx.stopped() => {
            ctx.set_state(FeedState::Disconnected);
            return;
        }
        result = connect_async(&url) => result,
    };

    let ws_stream = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            ctx.connection_lost(FeedKind::Push, format!("connect failed: {e}")).await;
            return;
        }
    };

    info!(symbol = %symbol, interval = %interval, "kline WebSocket connected");
    ctx.set_state(FeedState::Streaming);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = ctx.stopped() => {
                ctx.set_state(FeedState::Closing);
                let _ = write.close().await;
                ctx.set_state(FeedState::Disconnected);
                info!(symbol = %symbol, interval = %interval, "kline WebSocket closed");
                return;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match parse_kline_event(&text) {
                    Ok(Some(event)) => {
                        debug!(
                            symbol = %symbol,
                            time = event.candle.time,
                            close = event.candle.close,
                            closed = event.is_final,
                            "kline update"
                        );
                        if !ctx.emit(FeedMessage::Update(event)).await {
                            ctx.set_state(FeedState::Disconnected);
                            return;
                        }
                    }
                    Ok(None) => warn!(symbol = %symbol, "dropping malformed kline bar"),
                    Err(e) => warn!(error = %e, "failed to parse kline message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    ctx.connection_lost(FeedKind::Push, format!("server closed stream: {frame:?}")).await;
                    return;
                }
                // Ping/Pong/Binary: tungstenite answers pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    ctx.connection_lost(FeedKind::Push, format!("read error: {e}")).await;
                    return;
                }
                None => {
                    ctx.connection_lost(FeedKind::Push, "stream ended").await;
                    return;
                }
            },
        }
    }
}

/// Parse a kline frame. Accepts the single-stream payload and the combined
/// `{stream, data}` envelope. `Ok(None)` means the bar failed validation.
pub fn parse_kline_event(text: &str) -> Result<Option<FeedEvent>> {
    let root: serde_json::Value = serde_json::from_str(text).context("failed to parse kline JSON")?;
    let data = if root.get("data").is_some() { &root["data"] } else { &root };
    let k = &data["k"];

    let open_time = k["t"].as_i64().context("missing field k.t")?;
    let is_final = k["x"].as_bool().context("missing field k.x")?;

    let candle = Candle::new(
        open_time / 1000,
        parse_str_f64(&k["o"], "k.o")?,
        parse_str_f64(&k["h"], "k.h")?,
        parse_str_f64(&k["l"], "k.l")?,
        parse_str_f64(&k["c"], "k.c")?,
    );

    Ok(candle.sanitized().map(|candle| FeedEvent { candle, is_final }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(closed: bool) -> String {
        format!(
            r#"{{"e":"kline","E":1700000030000,"s":"BTCUSDT","k":{{"t":1700000000000,"T":1700000059999,"s":"BTCUSDT","i":"1m","o":"37000.10","c":"37010.00","h":"37020.50","l":"36990.00","v":"12.3","n":120,"x":{closed},"q":"1","V":"1","Q":"1"}}}}"#
        )
    }

    #[test]
    fn url_uses_lowercase_symbol() {
        assert_eq!(
            kline_url("BTCUSDT", "15m"),
            "wss://stream.binance.com:9443/ws/btcusdt@kline_15m"
        );
    }

    #[test]
    fn parses_open_and_closed_frames() {
        let open = parse_kline_event(&frame(false)).unwrap().unwrap();
        assert!(!open.is_final);
        assert_eq!(open.candle.time, 1_700_000_000);
        assert_eq!(open.candle.high, 37020.50);

        let closed = parse_kline_event(&frame(true)).unwrap().unwrap();
        assert!(closed.is_final);
        assert_eq!(closed.candle.close, 37010.00);
    }

    #[test]
    fn parses_combined_envelope() {
        let text = format!(r#"{{"stream":"btcusdt@kline_1m","data":{}}}"#, frame(true));
        let event = parse_kline_event(&text).unwrap().unwrap();
        assert!(event.is_final);
    }

    #[test]
    fn inverted_bar_is_dropped_not_fatal() {
        let text = frame(false).replace(r#""h":"37020.50""#, r#""h":"1.0""#);
        assert!(parse_kline_event(&text).unwrap().is_none());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_kline_event("not json").is_err());
        assert!(parse_kline_event(r#"{"result":null,"id":1}"#).is_err());
    }
}
