// =============================================================================
// Fractal swing pivots
// =============================================================================
//
// A bar is a High pivot when its high strictly exceeds the highs of the `L`
// bars on each side, and a Low pivot when its low is strictly below the lows
// of those `2L` neighbours. The newest `L` bars have no right-hand neighbours
// yet, so confirmation always lags by `L` bars.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PivotKind {
    High,
    Low,
}

/// A confirmed swing extreme.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub index: usize,
    pub time: i64,
    pub price: f64,
    pub kind: PivotKind,
}

/// Scan `candles` for confirmed pivots, in time order. An outside bar may be
/// both; the High is listed first.
pub fn detect_pivots(candles: &[Candle], lookback: usize) -> Vec<Pivot> {
    if lookback == 0 || candles.len() < 2 * lookback + 1 {
        return Vec::new();
    }

    let mut pivots = Vec::new();
    for i in lookback..candles.len() - lookback {
        let bar = &candles[i];
        let neighbours = (i - lookback..=i + lookback).filter(|&j| j != i);

        let is_high = neighbours.clone().all(|j| bar.high > candles[j].high);
        let is_low = neighbours.clone().all(|j| bar.low < candles[j].low);

        if is_high {
            pivots.push(Pivot { index: i, time: bar.time, price: bar.high, kind: PivotKind::High });
        }
        if is_low {
            pivots.push(Pivot { index: i, time: bar.time, price: bar.low, kind: PivotKind::Low });
        }
    }
    pivots
}
