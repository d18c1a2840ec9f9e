// =============================================================================
// Binance REST client — public kline history
// =============================================================================
//
// Only unsigned market-data endpoints are used. Kline rows arrive as arrays:
//   [0] open time (ms)  [1..=4] OHLC as strings  [6] close time (ms)
// =============================================================================

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::market_data::candle::{normalize_series, Candle};

const BASE_URL: &str = "https://api.binance.com";

/// Binance caps `limit` at 1000 rows per request.
pub const MAX_KLINE_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = BASE_URL, "BinanceClient initialised");

        Ok(Self {
            base_url: BASE_URL.to_string(),
            client,
        })
    }

    /// GET /api/v3/klines, closed bars only, oldest first.
    #[instrument(skip(self), name = "binance::fetch_klines")]
    pub async fn fetch_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINE_LIMIT);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
        }

        let candles = parse_klines(&body, chrono::Utc::now().timestamp_millis())?;
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

/// Turn a klines response into closed candles. Rows whose close time is not
/// yet in the past (the forming bar) are dropped, as are rows that fail to
/// parse. Only a body that is not an array, or one with no usable rows, is an
/// error.
pub fn parse_klines(body: &serde_json::Value, now_ms: i64) -> Result<Vec<Candle>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    for (i, entry) in raw.iter().enumerate() {
        match parse_kline_row(entry) {
            Ok((close_time, _)) if close_time >= now_ms => {}
            Ok((_, candle)) => candles.push(candle),
            Err(e) => {
                skipped += 1;
                warn!(row = i, error = %e, "skipping malformed kline row");
            }
        }
    }
    if skipped > 0 {
        debug!(skipped, kept = candles.len(), "klines rows filtered");
    }

    let candles = normalize_series(candles);
    if candles.is_empty() {
        anyhow::bail!("klines response contained no usable bars");
    }
    Ok(candles)
}

/// One `[open_time, o, h, l, c, volume, close_time, ...]` row, returned with
/// its close time in milliseconds.
fn parse_kline_row(entry: &serde_json::Value) -> Result<(i64, Candle)> {
    let arr = entry.as_array().context("kline entry is not an array")?;
    if arr.len() < 7 {
        anyhow::bail!("kline entry has {} elements", arr.len());
    }

    let open_time = arr[0].as_i64().context("kline open time is not an integer")?;
    let close_time = arr[6].as_i64().context("kline close time is not an integer")?;
    let candle = Candle::new(
        open_time / 1000,
        parse_str_f64(&arr[1], "open")?,
        parse_str_f64(&arr[2], "high")?,
        parse_str_f64(&arr[3], "low")?,
        parse_str_f64(&arr[4], "close")?,
    );
    Ok((close_time, candle))
}

/// Binance sends numeric values as JSON strings.
pub fn parse_str_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(open_ms: i64, o: &str, h: &str, l: &str, c: &str) -> serde_json::Value {
        json!([open_ms, o, h, l, c, "12.5", open_ms + 59_999, "0", 10, "0", "0", "0"])
    }

    #[test]
    fn parses_rows_and_drops_forming_bar() {
        let body = json!([
            row(60_000, "100.0", "101.0", "99.0", "100.5"),
            row(120_000, "100.5", "102.0", "100.0", "101.5"),
            row(180_000, "101.5", "101.8", "101.0", "101.2"),
        ]);
        // Third bar closes at 239_999; "now" is inside it.
        let candles = parse_klines(&body, 200_000).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, 60);
        assert_eq!(candles[1].time, 120);
        assert_eq!(candles[1].close, 101.5);
    }

    #[test]
    fn malformed_values_clip_or_drop() {
        let body = json!([
            row(60_000, "100.0", "100.2", "99.0", "100.5"), // high below close -> clipped
            row(120_000, "100.0", "98.0", "99.0", "99.5"),  // high < low -> dropped
            row(180_000, "100.0", "101.0", "99.0", "100.0"),
        ]);
        let candles = parse_klines(&body, i64::MAX).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, 100.5);
    }

    #[test]
    fn unsorted_duplicate_rows_are_normalised() {
        let body = json!([
            row(120_000, "1", "2", "0.5", "1.5"),
            row(60_000, "1", "2", "0.5", "1.2"),
            row(120_000, "1", "2", "0.5", "1.7"),
        ]);
        let candles = parse_klines(&body, i64::MAX).unwrap();
        assert_eq!(candles.iter().map(|c| c.time).collect::<Vec<_>>(), vec![60, 120]);
        assert_eq!(candles[1].close, 1.7);
    }

    #[test]
    fn bad_rows_are_skipped_not_fatal() {
        let mut null_high = row(120_000, "100.5", "102.0", "100.0", "101.5");
        null_high[2] = serde_json::Value::Null;
        let mut bad_time = row(180_000, "101.5", "101.8", "101.0", "101.2");
        bad_time[0] = json!("soon");
        let body = json!([
            row(60_000, "100.0", "101.0", "99.0", "100.5"),
            null_high,
            row(240_000, "101.0", "101.5", "100.5", "101.4"),
            bad_time,
            row(300_000, "abc", "101.5", "100.5", "101.4"),
        ]);
        let candles = parse_klines(&body, i64::MAX).unwrap();
        assert_eq!(candles.iter().map(|c| c.time).collect::<Vec<_>>(), vec![60, 240]);
    }

    #[test]
    fn empty_or_wrong_shape_is_an_error() {
        assert!(parse_klines(&json!([]), i64::MAX).is_err());
        assert!(parse_klines(&json!({"code": -1121, "msg": "Invalid symbol."}), i64::MAX).is_err());
        assert!(parse_klines(&json!([["x"]]), i64::MAX).is_err());
    }

    #[test]
    fn parse_str_f64_variants() {
        assert_eq!(parse_str_f64(&json!("1.25"), "x").unwrap(), 1.25);
        assert_eq!(parse_str_f64(&json!(2.5), "x").unwrap(), 2.5);
        assert!(parse_str_f64(&json!(null), "x").is_err());
        assert!(parse_str_f64(&json!("abc"), "x").is_err());
    }
}
