// =============================================================================
// Shared types used across the Kira signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Discrete trading bias produced by the signal aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Buy,
    Sell,
    Neutral,
}

impl Default for Bias {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Market family of an instrument; decides which provider serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    /// Exchange with a kline WebSocket (push-capable).
    Crypto,
    /// Commodities, indices and FX served by a polled chart endpoint.
    Traditional,
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto => write!(f, "Crypto"),
            Self::Traditional => write!(f, "Traditional"),
        }
    }
}

/// How a provider delivers live updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedKind {
    Push,
    Poll,
}

/// Health of the active session as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionHealth {
    /// Backfill in flight, no live data yet.
    Loading,
    /// History loaded; no live update has arrived yet.
    Ready,
    Live,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted; data is frozen until the session changes.
    Degraded { reason: String },
    Retired,
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::Loading
    }
}

impl std::fmt::Display for SessionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading"),
            Self::Ready => write!(f, "Ready"),
            Self::Live => write!(f, "Live"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting(#{attempt})"),
            Self::Degraded { reason } => write!(f, "Degraded({reason})"),
            Self::Retired => write!(f, "Retired"),
        }
    }
}
