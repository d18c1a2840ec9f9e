// =============================================================================
// Signal webhook
// =============================================================================
//
// Fire-and-forget POST when a session's bias flips to BUY or SELL. Delivery
// failures are logged and never reach the session.
// =============================================================================

use serde::Serialize;
use tracing::{debug, warn};

use crate::signal::Signal;
use crate::types::Bias;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SignalNotification {
    pub message: String,
    pub instrument: String,
    pub timeframe: String,
    pub bias: Bias,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl SignalNotification {
    /// Payload for a bias change, or `None` when the new bias is NEUTRAL or
    /// unchanged.
    pub fn for_change(previous: Bias, signal: &Signal, instrument: &str, timeframe: &str) -> Option<Self> {
        if signal.bias == previous || signal.bias == Bias::Neutral {
            return None;
        }
        let levels = if signal.has_levels() {
            format!(
                " entry {:.5} SL {:.5} TP {:.5}",
                signal.entry.unwrap_or_default(),
                signal.stop_loss.unwrap_or_default(),
                signal.take_profit.unwrap_or_default()
            )
        } else {
            String::new()
        };
        Some(Self {
            message: format!("{} {} {}{} ({})", signal.bias, instrument, timeframe, levels, signal.reason),
            instrument: instrument.to_string(),
            timeframe: timeframe.to_string(),
            bias: signal.bias,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
        })
    }
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Spawn the POST and return immediately.
    pub fn send(&self, url: &str, payload: SignalNotification) {
        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(instrument = %payload.instrument, bias = %payload.bias, "webhook delivered");
                }
                Ok(resp) => warn!(status = %resp.status(), "webhook rejected signal notification"),
                Err(e) => warn!(error = %e, "webhook delivery failed"),
            }
        });
    }
}
