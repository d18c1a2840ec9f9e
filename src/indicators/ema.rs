// =============================================================================
// EMA series and the fast/mid/slow stack
// =============================================================================
//
//   k   = 2 / (period + 1)
//   ema = close * k + ema_prev * (1 - k),  ema_0 = first close
//
// Samples start once `period` candles precede the current one, so the first
// output lines up with close index `period`.
// =============================================================================

use serde::{Deserialize, Serialize};

/// EMA of `closes`; element `j` belongs to `closes[period + j]`. Empty for a
/// zero period or a series no longer than `period`. Stops at the first
/// non-finite value.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let k = 2.0 / (period + 1) as f64;
    let mut ema = closes[0];
    if !ema.is_finite() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(closes.len() - period);
    for (i, &close) in closes.iter().enumerate().skip(1) {
        ema = close * k + ema * (1.0 - k);
        if !ema.is_finite() {
            break;
        }
        if i >= period {
            out.push(ema);
        }
    }
    out
}

/// Ordering of the fast / (mid) / slow EMA stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmaStack {
    /// fast > mid > slow
    Ascending,
    /// fast < mid < slow
    Descending,
    Mixed,
}

impl EmaStack {
    /// Classify the latest EMA values. Equal values never count as ordered.
    pub fn classify(fast: f64, mid: Option<f64>, slow: f64) -> Self {
        let (ascending, descending) = match mid {
            Some(m) => (fast > m && m > slow, fast < m && m < slow),
            None => (fast > slow, fast < slow),
        };
        if ascending {
            Self::Ascending
        } else if descending {
            Self::Descending
        } else {
            Self::Mixed
        }
    }
}

impl std::fmt::Display for EmaStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ascending => write!(f, "ASCENDING"),
            Self::Descending => write!(f, "DESCENDING"),
            Self::Mixed => write!(f, "MIXED"),
        }
    }
}
