// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Typed failures that cross module boundaries inside the engine. Startup and
// plumbing code keeps using `anyhow`; anything a Session has to branch on is
// one of these variants.
// =============================================================================

use thiserror::Error;

/// Every failure the ingestion / signal pipeline can report.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Historical fetch failed or returned nothing usable.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Live feed dropped unexpectedly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Candle store refused an update that would break ordering.
    #[error("out-of-order update: incoming time {incoming} vs head {head}")]
    OutOfOrderUpdate { head: i64, incoming: i64 },

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    /// Indicator or structure requested before warm-up is satisfied.
    #[error("insufficient history: need {needed} candles, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    /// Configuration value outside its accepted range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("live feed already started")]
    FeedAlreadyStarted,
}

impl EngineError {
    /// Configuration errors are fatal to session construction.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownInstrument(_) | Self::UnsupportedTimeframe(_) | Self::InvalidParameter(_)
        )
    }
}
