use serde::{Deserialize, Serialize};

/// One OHLC bar. `time` is the bar-open timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self { time, open, high, low, close }
    }

    /// Close above open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Close below open.
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Validate a bar coming off the wire.
    ///
    /// Returns `None` for non-finite prices, non-positive timestamps, or
    /// `high < low`. A bar whose wicks do not bracket open/close is clipped:
    /// `high` and `low` are widened so the OHLC invariant holds.
    pub fn sanitized(self) -> Option<Self> {
        let finite = [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.time <= 0 || self.high < self.low {
            return None;
        }
        Some(Self {
            high: self.high.max(self.open).max(self.close),
            low: self.low.min(self.open).min(self.close),
            ..self
        })
    }
}

/// Sort ascending by time, drop malformed bars, keep the last copy of any
/// duplicated timestamp.
pub fn normalize_series(raw: Vec<Candle>) -> Vec<Candle> {
    let mut bars: Vec<Candle> = raw.into_iter().filter_map(Candle::sanitized).collect();
    // Stable sort keeps provider order for equal timestamps; the later copy wins.
    bars.sort_by_key(|c| c.time);
    let mut out: Vec<Candle> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.time == bar.time => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}
