// =============================================================================
// Order-block entry candidate
// =============================================================================
//
// When the latest close sits within `epsilon` (relative) of the most recent
// order block's reference price, propose a trade in the block's direction:
//
//   Bullish:  stop = R * (1 - buffer)   take = entry + rr * (entry - stop)
//   Bearish:  stop = R * (1 + buffer)   take = entry - rr * (stop - entry)
//
// A non-positive risk (price already through the stop) yields nothing.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::structure::order_block::{Direction, OrderBlock};
use crate::types::Bias;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryCandidate {
    pub bias: Bias,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
    /// Order block the entry was taken from.
    pub order_block: OrderBlock,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryParams {
    pub proximity_epsilon: f64,
    pub stop_buffer_pct: f64,
    pub risk_reward_ratio: f64,
}

pub fn entry_candidate(block: &OrderBlock, close: f64, params: &EntryParams) -> Option<EntryCandidate> {
    if !close.is_finite() || close <= 0.0 {
        return None;
    }
    let reference = block.reference_price;
    if (close - reference).abs() / close >= params.proximity_epsilon {
        return None;
    }

    let entry = close;
    let rr = params.risk_reward_ratio;
    let (bias, stop_loss, take_profit) = match block.kind {
        Direction::Bullish => {
            let stop = reference * (1.0 - params.stop_buffer_pct);
            let risk = entry - stop;
            if risk <= 0.0 {
                return None;
            }
            (Bias::Buy, stop, entry + rr * risk)
        }
        Direction::Bearish => {
            let stop = reference * (1.0 + params.stop_buffer_pct);
            let risk = stop - entry;
            if risk <= 0.0 {
                return None;
            }
            (Bias::Sell, stop, entry - rr * risk)
        }
    };

    Some(EntryCandidate {
        bias,
        entry,
        stop_loss,
        take_profit,
        risk_reward_ratio: rr,
        order_block: *block,
    })
}
