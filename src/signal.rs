// =============================================================================
// Signal Aggregator
// =============================================================================
//
// Precedence:
//   1. Structure entry candidate     -> its bias and levels
//   2. EMA stack ascending, RSI < 70 -> BUY (trend, no levels)
//   3. EMA stack descending, RSI > 30 -> SELL (trend, no levels)
//   4. Otherwise NEUTRAL
//
// The session filter, when enabled, overrides everything outside the allowed
// UTC hours. Missing warm-up reads as NEUTRAL "no data".
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::indicators::rsi::{OVERBOUGHT, OVERSOLD};
use crate::indicators::{EmaStack, IndicatorSet};
use crate::runtime_config::EngineConfig;
use crate::structure::SmcAnalysis;
use crate::trading_hours;
use crate::types::Bias;

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSource {
    Structure,
    Trend,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub bias: Bias,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward_ratio: f64,
    pub generated_at: DateTime<Utc>,
    pub source: SignalSource,
    pub reason: String,
}

impl Signal {
    pub fn neutral(reason: impl Into<String>, risk_reward_ratio: f64, now: DateTime<Utc>) -> Self {
        Self {
            bias: Bias::Neutral,
            entry: None,
            stop_loss: None,
            take_profit: None,
            risk_reward_ratio,
            generated_at: now,
            source: SignalSource::None,
            reason: reason.into(),
        }
    }

    fn trend(bias: Bias, reason: String, risk_reward_ratio: f64, now: DateTime<Utc>) -> Self {
        Self {
            bias,
            source: SignalSource::Trend,
            ..Self::neutral(reason, risk_reward_ratio, now)
        }
    }

    /// Entry/stop/target are all present.
    pub fn has_levels(&self) -> bool {
        self.entry.is_some() && self.stop_loss.is_some() && self.take_profit.is_some()
    }
}

/// Combine indicators and structure into one bias at time `now`.
pub fn aggregate(
    indicators: &IndicatorSet,
    structure: Option<&SmcAnalysis>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Signal {
    let signal = derive(indicators, structure, config, now);

    if config.session_filter_enabled && !trading_hours::within_ranges(&config.session_hour_ranges, now) {
        return Signal::neutral("outside trading hours", config.risk_reward_ratio, now);
    }
    signal
}

fn derive(
    indicators: &IndicatorSet,
    structure: Option<&SmcAnalysis>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Signal {
    let rr = config.risk_reward_ratio;

    if config.structure_enabled {
        if let Some(cand) = structure.and_then(|s| s.candidate) {
            return Signal {
                bias: cand.bias,
                entry: Some(cand.entry),
                stop_loss: Some(cand.stop_loss),
                take_profit: Some(cand.take_profit),
                risk_reward_ratio: cand.risk_reward_ratio,
                generated_at: now,
                source: SignalSource::Structure,
                reason: format!("price at {:?} order block {:.5}", cand.order_block.kind, cand.order_block.reference_price),
            };
        }
    }

    let trend = indicators
        .ema_stack()
        .and_then(|stack| indicators.rsi.latest().map(|rsi| (stack, rsi)));
    let (stack, rsi) = match trend {
        Ok(pair) => pair,
        Err(EngineError::InsufficientHistory { .. }) => return Signal::neutral("no data", rr, now),
        Err(e) => return Signal::neutral(e.to_string(), rr, now),
    };

    match stack {
        EmaStack::Ascending if rsi < OVERBOUGHT => {
            Signal::trend(Bias::Buy, format!("EMA stack ascending, RSI {rsi:.1}"), rr, now)
        }
        EmaStack::Descending if rsi > OVERSOLD => {
            Signal::trend(Bias::Sell, format!("EMA stack descending, RSI {rsi:.1}"), rr, now)
        }
        _ => Signal::neutral(format!("EMA stack {stack}, RSI {rsi:.1}"), rr, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;
    use crate::trading_hours::HourRange;
    use chrono::TimeZone;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new((i as i64 + 1) * 60, c, c, c, c))
            .collect()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            ema_fast_period: 3,
            ema_mid_period: Some(5),
            ema_slow_period: 8,
            sma_period: 4,
            rsi_period: 5,
            swing_lookback: 2,
            ..EngineConfig::default()
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    /// Rising zigzag: net uptrend with enough pullbacks to keep RSI below 70.
    fn choppy_uptrend() -> Vec<f64> {
        (0..60).map(|i| 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 1.5 } else { -1.5 }).collect()
    }

    #[test]
    fn empty_input_is_no_data() {
        let cfg = config();
        let set = IndicatorSet::compute(&[], &cfg);
        let sig = aggregate(&set, None, &cfg, noon());
        assert_eq!(sig.bias, Bias::Neutral);
        assert_eq!(sig.reason, "no data");
        assert_eq!(sig.source, SignalSource::None);
        assert!(!sig.has_levels());
    }

    #[test]
    fn ascending_stack_with_room_is_buy() {
        let cfg = config();
        let set = IndicatorSet::compute(&candles(&choppy_uptrend()), &cfg);
        assert_eq!(set.ema_stack().unwrap(), EmaStack::Ascending);
        assert!(set.rsi.latest().unwrap() < OVERBOUGHT);

        let sig = aggregate(&set, None, &cfg, noon());
        assert_eq!(sig.bias, Bias::Buy);
        assert_eq!(sig.source, SignalSource::Trend);
        assert!(sig.entry.is_none());
    }

    #[test]
    fn overbought_ascending_stack_stays_neutral() {
        // Straight line up: RSI pinned at 100.
        let cfg = config();
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let set = IndicatorSet::compute(&candles(&closes), &cfg);
        let sig = aggregate(&set, None, &cfg, noon());
        assert_eq!(sig.bias, Bias::Neutral);
    }

    #[test]
    fn descending_stack_with_room_is_sell() {
        let cfg = config();
        let closes: Vec<f64> = choppy_uptrend().iter().map(|c| 300.0 - c).collect();
        let set = IndicatorSet::compute(&candles(&closes), &cfg);
        let sig = aggregate(&set, None, &cfg, noon());
        assert_eq!(sig.bias, Bias::Sell);
    }

    #[test]
    fn structure_candidate_takes_precedence() {
        use crate::structure::order_block::Direction;
        use crate::structure::{EntryCandidate, OrderBlock};

        let cfg = config();
        // Trend alone would say BUY.
        let set = IndicatorSet::compute(&candles(&choppy_uptrend()), &cfg);
        let block = OrderBlock { kind: Direction::Bearish, reference_price: 130.0, time: 60, index: 0 };
        let smc = SmcAnalysis {
            candidate: Some(EntryCandidate {
                bias: Bias::Sell,
                entry: 129.9,
                stop_loss: 130.39,
                take_profit: 128.43,
                risk_reward_ratio: 3.0,
                order_block: block,
            }),
            order_blocks: vec![block],
            ..SmcAnalysis::default()
        };

        let sig = aggregate(&set, Some(&smc), &cfg, noon());
        assert_eq!(sig.bias, Bias::Sell);
        assert_eq!(sig.source, SignalSource::Structure);
        assert!(sig.has_levels());

        // Structure mode off falls back to the trend.
        let off = EngineConfig { structure_enabled: false, ..cfg };
        let sig = aggregate(&set, Some(&smc), &off, noon());
        assert_eq!(sig.bias, Bias::Buy);
    }

    #[test]
    fn session_filter_forces_neutral_outside_hours() {
        let cfg = EngineConfig {
            session_filter_enabled: true,
            session_hour_ranges: vec![HourRange { start: 7, end: 11 }],
            ..config()
        };
        let set = IndicatorSet::compute(&candles(&choppy_uptrend()), &cfg);

        let sig = aggregate(&set, None, &cfg, noon());
        assert_eq!(sig.bias, Bias::Neutral);
        assert_eq!(sig.reason, "outside trading hours");

        let morning = Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap();
        assert_eq!(aggregate(&set, None, &cfg, morning).bias, Bias::Buy);
    }
}
