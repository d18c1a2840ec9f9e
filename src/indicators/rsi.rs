// =============================================================================
// RSI — Wilder-smoothed relative strength
// =============================================================================
//
// The first `period` close-to-close moves seed the average gain and average
// loss with a plain mean. Every later move folds in as
//
//     avg = (avg * (period - 1) + move) / period
//
// and RSI = 100 - 100 / (1 + avg_gain / avg_loss). No losses at all (including
// a motionless run) reads as 100.
//
// Output is aligned with the other indicators: sample `i` belongs to close
// `period + i`.
// =============================================================================

pub const OVERBOUGHT: f64 = 70.0;
pub const OVERSOLD: f64 = 30.0;

/// Running Wilder averages of upward and downward moves.
#[derive(Debug, Clone, Copy)]
struct WilderAverages {
    period: f64,
    gain: f64,
    loss: f64,
}

impl WilderAverages {
    fn seed(moves: &[f64]) -> Self {
        let period = moves.len() as f64;
        let gain = moves.iter().filter(|m| **m > 0.0).sum::<f64>() / period;
        let loss = moves.iter().filter(|m| **m < 0.0).map(|m| -m).sum::<f64>() / period;
        Self { period, gain, loss }
    }

    fn push(&mut self, change: f64) {
        let keep = self.period - 1.0;
        self.gain = (self.gain * keep + change.max(0.0)) / self.period;
        self.loss = (self.loss * keep + (-change).max(0.0)) / self.period;
    }

    fn value(&self) -> Option<f64> {
        if self.loss == 0.0 {
            return Some(100.0);
        }
        let rsi = 100.0 - 100.0 / (1.0 + self.gain / self.loss);
        rsi.is_finite().then_some(rsi)
    }
}

/// RSI series over `closes`. Empty when `period` is zero or there are fewer
/// than `period + 1` closes; a non-finite value ends the series early.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let mut averages = WilderAverages::seed(seed);
    let mut out = Vec::with_capacity(rest.len() + 1);
    let Some(first) = averages.value() else {
        return out;
    };
    out.push(first);

    for &change in rest {
        averages.push(change);
        match averages.value() {
            Some(v) => out.push(v),
            None => break,
        }
    }
    out
}

/// Zone name shown next to the latest RSI.
pub fn rsi_label(value: f64) -> &'static str {
    match value {
        v if v >= OVERBOUGHT => "OVERBOUGHT",
        v if v <= OVERSOLD => "OVERSOLD",
        _ => "NEUTRAL",
    }
}
