// =============================================================================
// MACD — moving average convergence / divergence
// =============================================================================
//
//   line      = EMA(fast) - EMA(slow)
//   signal    = EMA(signal_period) of line
//   histogram = line - signal
//
// Both EMAs are the seeded-with-first-close kind from `ema.rs`, so the line
// starts at close index `slow` and the signal/histogram at `slow + signal`.
// =============================================================================

use super::ema::calculate_ema;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdSeries {
    /// Element `j` belongs to close `slow + j`.
    pub line: Vec<f64>,
    /// Element `j` belongs to close `slow + signal + j`.
    pub signal: Vec<f64>,
    /// Same alignment as `signal`.
    pub histogram: Vec<f64>,
}

/// MACD over `closes`. Empty when any period is zero or `fast >= slow`.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    if fast == 0 || signal == 0 || fast >= slow {
        return MacdSeries::default();
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    // fast_ema[k] is close fast + k; slow_ema[k] is close slow + k.
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .zip(fast_ema.iter().skip(offset))
        .map(|(s, f)| f - s)
        .collect();

    let signal_line = calculate_ema(&line, signal);
    let histogram = line
        .iter()
        .skip(signal)
        .zip(&signal_line)
        .map(|(l, s)| l - s)
        .collect();

    MacdSeries {
        line,
        signal: signal_line,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_periods_are_empty() {
        let closes = vec![1.0; 50];
        assert_eq!(calculate_macd(&closes, 0, 26, 9), MacdSeries::default());
        assert_eq!(calculate_macd(&closes, 26, 26, 9), MacdSeries::default());
        assert_eq!(calculate_macd(&closes, 12, 26, 0), MacdSeries::default());
    }

    #[test]
    fn warmup_alignment() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin()).collect();
        let m = calculate_macd(&closes, 12, 26, 9);
        assert_eq!(m.line.len(), 60 - 26);
        assert_eq!(m.signal.len(), 60 - 26 - 9);
        assert_eq!(m.histogram.len(), m.signal.len());

        // Too short for the signal line, long enough for the MACD line.
        let m = calculate_macd(&closes[..30], 12, 26, 9);
        assert_eq!(m.line.len(), 4);
        assert!(m.signal.is_empty());
    }

    #[test]
    fn line_is_difference_of_emas() {
        let closes: Vec<f64> = (1..=40).map(|i| i as f64 * 1.5).collect();
        let fast = calculate_ema(&closes, 3);
        let slow = calculate_ema(&closes, 6);
        let m = calculate_macd(&closes, 3, 6, 4);
        // Close 6 is fast[3] and slow[0].
        assert!((m.line[0] - (fast[3] - slow[0])).abs() < 1e-12);
        let last = m.line.len() - 1;
        assert!((m.line[last] - (fast.last().unwrap() - slow.last().unwrap())).abs() < 1e-12);
        for (j, h) in m.histogram.iter().enumerate() {
            assert!((h - (m.line[j + 4] - m.signal[j])).abs() < 1e-12);
        }
    }

    #[test]
    fn flat_prices_give_zero_macd() {
        let m = calculate_macd(&vec![250.0; 80], 12, 26, 9);
        assert!(m.line.iter().chain(&m.signal).chain(&m.histogram).all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn uptrend_is_positive() {
        let closes: Vec<f64> = (0..100).map(|i| 50.0 + i as f64).collect();
        let m = calculate_macd(&closes, 12, 26, 9);
        assert!(*m.line.last().unwrap() > 0.0);
    }
}
