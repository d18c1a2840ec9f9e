// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the signal engine
// uses. The per-indicator functions work on raw closes; `IndicatorSet` aligns
// their output with candle times and is recomputed whole-series on every new
// closed bar.

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::market_data::Candle;
use crate::runtime_config::EngineConfig;

pub use ema::EmaStack;

/// One indicator value aligned to the candle it was computed on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSample {
    pub time: i64,
    pub value: f64,
}

/// A named indicator series plus the warm-up it needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub name: String,
    pub period: usize,
    pub samples: Vec<IndicatorSample>,
    /// Candles the series was computed from.
    #[serde(skip)]
    source_len: usize,
}

impl IndicatorSeries {
    /// Pair `values` (which start at candle index `period`) with candle times.
    fn aligned(name: impl Into<String>, period: usize, candles: &[Candle], values: Vec<f64>) -> Self {
        let samples = candles
            .iter()
            .skip(period)
            .zip(values)
            .map(|(c, value)| IndicatorSample { time: c.time, value })
            .collect();
        Self {
            name: name.into(),
            period,
            samples,
            source_len: candles.len(),
        }
    }

    /// Most recent value, or `InsufficientHistory` before warm-up.
    pub fn latest(&self) -> Result<f64, EngineError> {
        self.samples
            .last()
            .map(|s| s.value)
            .ok_or(EngineError::InsufficientHistory {
                needed: self.period + 1,
                available: self.source_len,
            })
    }
}

/// Every indicator series for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub ema_fast: IndicatorSeries,
    pub ema_mid: Option<IndicatorSeries>,
    pub ema_slow: IndicatorSeries,
    pub sma: IndicatorSeries,
    pub rsi: IndicatorSeries,
    pub macd: IndicatorSeries,
    pub macd_signal: IndicatorSeries,
    pub macd_histogram: IndicatorSeries,
}

impl IndicatorSet {
    /// Compute all series over `candles` (closed bars, oldest first).
    pub fn compute(candles: &[Candle], config: &EngineConfig) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let ema_series = |period: usize| {
            IndicatorSeries::aligned(
                format!("EMA({period})"),
                period,
                candles,
                ema::calculate_ema(&closes, period),
            )
        };

        let (fast, slow, signal) = (config.macd_fast_period, config.macd_slow_period, config.macd_signal_period);
        let macd = macd::calculate_macd(&closes, fast, slow, signal);
        let macd_label = format!("MACD({fast},{slow},{signal})");

        Self {
            ema_fast: ema_series(config.ema_fast_period),
            ema_mid: config.ema_mid_period.map(&ema_series),
            ema_slow: ema_series(config.ema_slow_period),
            sma: IndicatorSeries::aligned(
                format!("SMA({})", config.sma_period),
                config.sma_period,
                candles,
                sma::calculate_sma(&closes, config.sma_period),
            ),
            rsi: IndicatorSeries::aligned(
                format!("RSI({})", config.rsi_period),
                config.rsi_period,
                candles,
                rsi::calculate_rsi(&closes, config.rsi_period),
            ),
            macd: IndicatorSeries::aligned(macd_label.clone(), slow, candles, macd.line),
            macd_signal: IndicatorSeries::aligned(format!("{macd_label} signal"), slow + signal, candles, macd.signal),
            macd_histogram: IndicatorSeries::aligned(
                format!("{macd_label} histogram"),
                slow + signal,
                candles,
                macd.histogram,
            ),
        }
    }

    /// Ordering of the latest EMA values.
    pub fn ema_stack(&self) -> Result<EmaStack, EngineError> {
        let fast = self.ema_fast.latest()?;
        let mid = self.ema_mid.as_ref().map(IndicatorSeries::latest).transpose()?;
        let slow = self.ema_slow.latest()?;
        Ok(EmaStack::classify(fast, mid, slow))
    }
}
