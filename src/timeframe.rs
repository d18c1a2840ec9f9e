// =============================================================================
// Timeframe tokens
// =============================================================================
//
// The fixed set of bar intervals a session can run on, and their mapping onto
// each provider's interval vocabulary.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::AssetClass;

/// Bar interval of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Parse a user-facing token such as `"15m"` or `"1h"`.
    pub fn parse(token: &str) -> Result<Self, EngineError> {
        match token.trim().to_lowercase().as_str() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            _ => Err(EngineError::UnsupportedTimeframe(token.to_string())),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Bar duration in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1_800,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }

    /// Binance kline interval string. Every token is supported.
    pub fn binance_interval(&self) -> &'static str {
        self.token()
    }

    /// Yahoo chart interval string; Yahoo has no 4h bars.
    pub fn yahoo_interval(&self) -> Option<&'static str> {
        match self {
            Self::M1 => Some("1m"),
            Self::M5 => Some("5m"),
            Self::M15 => Some("15m"),
            Self::M30 => Some("30m"),
            Self::H1 => Some("60m"),
            Self::H4 => None,
            Self::D1 => Some("1d"),
        }
    }

    /// Provider-specific interval for an asset class, or `UnsupportedTimeframe`.
    pub fn provider_interval(&self, asset_class: AssetClass) -> Result<&'static str, EngineError> {
        match asset_class {
            AssetClass::Crypto => Ok(self.binance_interval()),
            AssetClass::Traditional => self.yahoo_interval().ok_or_else(|| {
                EngineError::UnsupportedTimeframe(format!("{} (poll provider)", self.token()))
            }),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.token()).unwrap(), tf);
        }
        assert_eq!(Timeframe::parse(" 1H ").unwrap(), Timeframe::H1);
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert_eq!(
            Timeframe::parse("7m"),
            Err(EngineError::UnsupportedTimeframe("7m".into()))
        );
    }

    #[test]
    fn poll_provider_has_no_four_hour_bars() {
        assert!(Timeframe::H4.provider_interval(AssetClass::Crypto).is_ok());
        let err = Timeframe::H4
            .provider_interval(AssetClass::Traditional)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedTimeframe(_)));
        assert_eq!(
            Timeframe::H1.provider_interval(AssetClass::Traditional).unwrap(),
            "60m"
        );
    }

    #[test]
    fn durations() {
        assert_eq!(Timeframe::M15.seconds(), 900);
        assert_eq!(Timeframe::D1.seconds(), 86_400);
    }
}
