// =============================================================================
// Trading hours — session filter and market-session label
// =============================================================================
//
// All hours are UTC. A range is half-open `[start, end)`; `start > end` wraps
// past midnight (e.g. 22..3).
// =============================================================================

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Allowed trading window in UTC hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start == self.end {
            // Degenerate range covers nothing.
            false
        } else if self.start < self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

impl std::fmt::Display for HourRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.start, self.end)
    }
}

/// `true` when `now` falls inside any of `ranges`.
pub fn within_ranges(ranges: &[HourRange], now: DateTime<Utc>) -> bool {
    let hour = now.hour();
    ranges.iter().any(|r| r.contains(hour))
}

/// Dashboard session label for a UTC hour.
///
/// London 00-08, New York 08-12, Tokyo 13-21. Hour 12 and 21-24 fall
/// through to the Asian killzone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketSession {
    London,
    NewYork,
    Tokyo,
    AsianKillzone,
}

impl MarketSession {
    pub fn at(now: DateTime<Utc>) -> Self {
        match now.hour() {
            0..=7 => Self::London,
            8..=11 => Self::NewYork,
            13..=20 => Self::Tokyo,
            _ => Self::AsianKillzone,
        }
    }
}

impl std::fmt::Display for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::London => write!(f, "London"),
            Self::NewYork => write!(f, "New York"),
            Self::Tokyo => write!(f, "Tokyo"),
            Self::AsianKillzone => write!(f, "Asian Killzone"),
        }
    }
}
