// =============================================================================
// Yahoo Finance chart client
// =============================================================================
//
//   GET https://query1.finance.yahoo.com/v8/finance/chart/<symbol>?interval&range
//
// The payload is columnar: a `timestamp` array plus parallel OHLC arrays in
// `indicators.quote[0]`. Any column entry may be null (no trade in that slot);
// such rows are skipped.
// =============================================================================

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::market_data::candle::{normalize_series, Candle};
use crate::timeframe::Timeframe;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Yahoo rejects requests without a browser-like agent.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";

// ---- wire format --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

// ---- ranges ---------------------------------------------------------------

/// Lookback requested for a backfill. Yahoo limits intraday history
/// (1m: 7 days, other minute bars: 60 days).
pub fn history_range(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "5d",
        Timeframe::M5 | Timeframe::M15 => "1mo",
        Timeframe::M30 => "2mo",
        Timeframe::H1 | Timeframe::H4 => "6mo",
        Timeframe::D1 => "2y",
    }
}

/// Small trailing window fetched on every poll.
pub fn poll_range(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 | Timeframe::M5 => "1d",
        Timeframe::M15 | Timeframe::M30 | Timeframe::H1 | Timeframe::H4 => "5d",
        Timeframe::D1 => "1mo",
    }
}

// ---- client ---------------------------------------------------------------

#[derive(Clone)]
pub struct YahooClient {
    base_url: String,
    client: reqwest::Client,
}

impl YahooClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            base_url: BASE_URL.to_string(),
            client,
        })
    }

    /// Every bar in the window, including a still-forming last bar.
    #[instrument(skip(self), name = "yahoo::fetch_chart")]
    pub async fn fetch_chart(&self, symbol: &str, interval: &str, range: &str) -> Result<Vec<Candle>> {
        let mut url = reqwest::Url::parse(&self.base_url).context("invalid Yahoo base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Yahoo base URL cannot take path segments"))?
            .push(symbol);
        url.query_pairs_mut()
            .append_pair("interval", interval)
            .append_pair("range", range);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("GET chart request failed")?;

        let status = resp.status();
        let body = resp.text().await.context("failed to read chart response")?;
        if !status.is_success() {
            anyhow::bail!("Yahoo chart for {} returned {}: {}", symbol, status, truncate(&body, 200));
        }

        let candles = parse_chart(&body)?;
        debug!(symbol, interval, range, count = candles.len(), "chart fetched");
        Ok(candles)
    }
}

/// Decode a chart payload into normalised candles.
pub fn parse_chart(body: &str) -> Result<Vec<Candle>> {
    let resp: ChartResponse = serde_json::from_str(body).context("failed to parse chart JSON")?;

    if let Some(err) = resp.chart.error {
        anyhow::bail!(
            "Yahoo chart error {}: {}",
            err.code.unwrap_or_default(),
            err.description.unwrap_or_default()
        );
    }

    let result = resp
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .context("chart response has no result")?;
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let cell = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();
    let candles: Vec<Candle> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &time)| {
            Some(Candle::new(
                time,
                cell(&quote.open, i)?,
                cell(&quote.high, i)?,
                cell(&quote.low, i)?,
                cell(&quote.close, i)?,
            ))
        })
        .collect();

    let candles = normalize_series(candles);
    if candles.is_empty() {
        anyhow::bail!("chart response contained no usable bars");
    }
    Ok(candles)
}

/// Keep bars whose interval has fully elapsed by `now`.
pub fn closed_only(candles: Vec<Candle>, interval_secs: i64, now: i64) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| c.time + interval_secs <= now)
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "GC=F", "dataGranularity": "15m"},
                "timestamp": [1700000900, 1700000000, 1700001800, 1700002700],
                "indicators": {"quote": [{
                    "open":  [1991.0, 1990.0, null,   1992.5],
                    "high":  [1993.0, 1991.5, 1994.0, 1993.0],
                    "low":   [1990.5, 1989.0, 1991.0, 1992.0],
                    "close": [1992.0, 1991.0, 1993.5, 1992.8],
                    "volume":[10, 11, 12, 13]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parses_sorts_and_skips_null_rows() {
        let candles = parse_chart(SAMPLE).unwrap();
        assert_eq!(
            candles.iter().map(|c| c.time).collect::<Vec<_>>(),
            vec![1700000000, 1700000900, 1700002700]
        );
        assert_eq!(candles[0].close, 1991.0);
    }

    #[test]
    fn chart_error_is_reported() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_chart(body).unwrap_err().to_string();
        assert!(err.contains("Not Found"), "{err}");
    }

    #[test]
    fn empty_result_is_an_error() {
        let body = r#"{"chart":{"result":[{"timestamp":[],"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse_chart(body).is_err());
        // Weekend responses omit `timestamp` entirely.
        let body = r#"{"chart":{"result":[{"indicators":{"quote":[]}}],"error":null}}"#;
        assert!(parse_chart(body).is_err());
    }

    #[test]
    fn forming_bar_is_dropped() {
        let candles = parse_chart(SAMPLE).unwrap();
        let closed = closed_only(candles, 900, 1700002700 + 300);
        assert_eq!(closed.last().unwrap().time, 1700000900);
    }

    #[test]
    fn every_yahoo_timeframe_has_ranges() {
        for tf in Timeframe::ALL {
            assert!(!history_range(tf).is_empty());
            assert!(!poll_range(tf).is_empty());
        }
    }
}
