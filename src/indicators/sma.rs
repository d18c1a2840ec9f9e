// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
//   SMA_t = (close_{t-period+1} + ... + close_t) / period
//
// Same warm-up rule as the EMA: the first sample is emitted at close index
// `period`.
// =============================================================================

/// Compute the SMA series. Output element `j` corresponds to
/// `closes[period + j]` and averages the `period` closes ending there.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let divisor = period as f64;
    closes
        .windows(period)
        .skip(1)
        .map(|w| w.iter().sum::<f64>() / divisor)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_insufficient_data() {
        assert!(calculate_sma(&[1.0, 2.0], 2).is_empty());
        assert!(calculate_sma(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn sma_constant_series() {
        for period in [1, 3, 20, 100] {
            let closes = vec![7.25; 150];
            for v in calculate_sma(&closes, period) {
                assert!((v - 7.25).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn sma_matches_reference_mean() {
        let closes = vec![3.0, 8.0, 1.0, 9.0, 4.0, 6.0, 2.0, 7.0];
        let period = 3;
        let sma = calculate_sma(&closes, period);
        assert_eq!(sma.len(), closes.len() - period);
        for (j, v) in sma.iter().enumerate() {
            let end = period + j;
            let reference: f64 = closes[end + 1 - period..=end].iter().sum::<f64>() / period as f64;
            assert!((v - reference).abs() < 1e-12, "index {end}: {v} vs {reference}");
        }
        // Last sample = mean of the last three closes.
        assert!((sma.last().unwrap() - 5.0).abs() < 1e-12);
    }
}
