// =============================================================================
// Runtime Configuration — engine parameters with atomic save
// =============================================================================
//
// Every tunable of the signal engine lives here. A parameter change never
// mutates a running session: the session manager validates the new config and
// builds a fresh session from it.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::trading_hours::HourRange;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_instrument() -> String {
    "BTC".to_string()
}

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_ema_fast_period() -> usize {
    20
}

fn default_ema_mid_period() -> Option<usize> {
    Some(50)
}

fn default_ema_slow_period() -> usize {
    80
}

fn default_sma_period() -> usize {
    100
}

fn default_rsi_period() -> usize {
    14
}

fn default_macd_fast_period() -> usize {
    12
}

fn default_macd_slow_period() -> usize {
    26
}

fn default_macd_signal_period() -> usize {
    9
}

fn default_swing_lookback() -> usize {
    3
}

fn default_risk_reward_ratio() -> f64 {
    3.0
}

fn default_proximity_epsilon() -> f64 {
    0.002
}

fn default_stop_buffer_pct() -> f64 {
    0.003
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_retention_cap() -> usize {
    500
}

fn default_history_limit() -> usize {
    500
}

fn default_session_hour_ranges() -> Vec<HourRange> {
    vec![HourRange { start: 7, end: 21 }]
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

const MIN_POLL_INTERVAL_MS: u64 = 1_000;
const MAX_POLL_INTERVAL_MS: u64 = 600_000;

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Session selection ---------------------------------------------------

    /// Instrument key the engine starts on (see `instruments`).
    #[serde(default = "default_instrument")]
    pub instrument: String,

    /// Timeframe token the engine starts on (e.g. "15m").
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    // --- Indicators ---------------------------------------------------------

    #[serde(default = "default_ema_fast_period")]
    pub ema_fast_period: usize,

    /// Optional middle EMA; `None` makes the stack fast/slow only.
    #[serde(default = "default_ema_mid_period")]
    pub ema_mid_period: Option<usize>,

    #[serde(default = "default_ema_slow_period")]
    pub ema_slow_period: usize,

    #[serde(default = "default_sma_period")]
    pub sma_period: usize,

    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// MACD line is EMA(fast) - EMA(slow); shown, not traded.
    #[serde(default = "default_macd_fast_period")]
    pub macd_fast_period: usize,

    #[serde(default = "default_macd_slow_period")]
    pub macd_slow_period: usize,

    #[serde(default = "default_macd_signal_period")]
    pub macd_signal_period: usize,

    // --- Structure ----------------------------------------------------------

    /// Structure (pivot / BOS / order-block) mode.
    #[serde(default = "default_true")]
    pub structure_enabled: bool,

    /// Pivot lookback/lookahead length `L`.
    #[serde(default = "default_swing_lookback")]
    pub swing_lookback: usize,

    /// Target distance divided by stop distance.
    #[serde(default = "default_risk_reward_ratio")]
    pub risk_reward_ratio: f64,

    /// Relative distance to an order block that counts as "at the zone".
    #[serde(default = "default_proximity_epsilon")]
    pub proximity_epsilon: f64,

    /// Stop placement beyond the order-block reference, as a fraction of it.
    #[serde(default = "default_stop_buffer_pct")]
    pub stop_buffer_pct: f64,

    // --- Feeds & retention --------------------------------------------------

    /// Poll cadence for poll-only providers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum closed bars kept per session (`N_max`).
    #[serde(default = "default_retention_cap")]
    pub retention_cap: usize,

    /// Bars requested from the historical loader.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    // --- Session filter -----------------------------------------------------

    /// Force Neutral outside `session_hour_ranges`.
    #[serde(default)]
    pub session_filter_enabled: bool,

    /// Allowed UTC hour ranges, `[start, end)`.
    #[serde(default = "default_session_hour_ranges")]
    pub session_hour_ranges: Vec<HourRange>,

    // --- Notifications ------------------------------------------------------

    /// Webhook that receives a message whenever the bias turns Buy or Sell.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instrument: default_instrument(),
            timeframe: default_timeframe(),
            ema_fast_period: default_ema_fast_period(),
            ema_mid_period: default_ema_mid_period(),
            ema_slow_period: default_ema_slow_period(),
            sma_period: default_sma_period(),
            rsi_period: default_rsi_period(),
            macd_fast_period: default_macd_fast_period(),
            macd_slow_period: default_macd_slow_period(),
            macd_signal_period: default_macd_signal_period(),
            structure_enabled: true,
            swing_lookback: default_swing_lookback(),
            risk_reward_ratio: default_risk_reward_ratio(),
            proximity_epsilon: default_proximity_epsilon(),
            stop_buffer_pct: default_stop_buffer_pct(),
            poll_interval_ms: default_poll_interval_ms(),
            retention_cap: default_retention_cap(),
            history_limit: default_history_limit(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            session_filter_enabled: false,
            session_hour_ranges: default_session_hour_ranges(),
            webhook_url: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            instrument = %config.instrument,
            timeframe = %config.timeframe,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Check every numeric parameter. Called before any session is built.
    pub fn validate(&self) -> Result<(), EngineError> {
        fn invalid(msg: String) -> Result<(), EngineError> {
            Err(EngineError::InvalidParameter(msg))
        }

        for (name, value) in [
            ("ema_fast_period", self.ema_fast_period),
            ("ema_slow_period", self.ema_slow_period),
            ("sma_period", self.sma_period),
            ("rsi_period", self.rsi_period),
            ("macd_fast_period", self.macd_fast_period),
            ("macd_slow_period", self.macd_slow_period),
            ("macd_signal_period", self.macd_signal_period),
            ("swing_lookback", self.swing_lookback),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be at least 1"));
            }
        }

        match self.ema_mid_period {
            Some(mid) if !(self.ema_fast_period < mid && mid < self.ema_slow_period) => {
                return invalid(format!(
                    "ema periods must satisfy fast < mid < slow (got {} / {} / {})",
                    self.ema_fast_period, mid, self.ema_slow_period
                ));
            }
            None if self.ema_fast_period >= self.ema_slow_period => {
                return invalid(format!(
                    "ema_fast_period ({}) must be below ema_slow_period ({})",
                    self.ema_fast_period, self.ema_slow_period
                ));
            }
            _ => {}
        }

        if self.macd_fast_period >= self.macd_slow_period {
            return invalid(format!(
                "macd_fast_period ({}) must be below macd_slow_period ({})",
                self.macd_fast_period, self.macd_slow_period
            ));
        }

        for (name, value) in [
            ("risk_reward_ratio", self.risk_reward_ratio),
            ("proximity_epsilon", self.proximity_epsilon),
            ("stop_buffer_pct", self.stop_buffer_pct),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{name} must be a positive number (got {value})"));
            }
        }

        if self.retention_cap < 2 {
            return invalid(format!("retention_cap must be at least 2 (got {})", self.retention_cap));
        }
        let warmup = self.warmup_bars();
        if self.retention_cap < warmup {
            return invalid(format!(
                "retention_cap ({}) cannot hold the {warmup} bars the indicators need",
                self.retention_cap
            ));
        }
        if self.history_limit == 0 {
            return invalid("history_limit must be at least 1".to_string());
        }
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return invalid(format!(
                "poll_interval_ms must be within {MIN_POLL_INTERVAL_MS}..={MAX_POLL_INTERVAL_MS} (got {})",
                self.poll_interval_ms
            ));
        }
        if self.reconnect_base_delay_ms == 0 || self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return invalid("reconnect delays must satisfy 0 < base <= max".to_string());
        }
        for range in &self.session_hour_ranges {
            if range.start > 23 || range.end > 24 {
                return invalid(format!("session hour range {range} out of bounds"));
            }
        }

        Ok(())
    }

    /// Closed bars needed before every indicator has a value.
    pub fn warmup_bars(&self) -> usize {
        [
            self.ema_slow_period,
            self.sma_period,
            self.rsi_period,
            self.macd_slow_period + self.macd_signal_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }

    /// Overlay a partial JSON object (as posted by a client) onto this config.
    /// Unknown keys and ill-typed values are `InvalidParameter`; range checks
    /// are left to `validate`.
    pub fn merged(&self, patch: &serde_json::Value) -> Result<Self, EngineError> {
        let serde_json::Value::Object(fields) = patch else {
            return Err(EngineError::InvalidParameter("parameters must be a JSON object".into()));
        };

        let mut base = serde_json::to_value(self).map_err(|e| EngineError::InvalidParameter(e.to_string()))?;
        let Some(target) = base.as_object_mut() else {
            return Err(EngineError::InvalidParameter("config is not an object".into()));
        };
        for (key, value) in fields {
            if !target.contains_key(key) {
                return Err(EngineError::InvalidParameter(format!("unknown parameter {key}")));
            }
            target.insert(key.clone(), value.clone());
        }

        serde_json::from_value(base).map_err(|e| EngineError::InvalidParameter(e.to_string()))
    }
}
