// =============================================================================
// Smart-money structure engine
// =============================================================================
//
// pivots -> break of structure -> order blocks -> entry candidate.
// Recomputed whole-series on every closed bar, like the indicators.

pub mod entry;
pub mod order_block;
pub mod pivots;

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::runtime_config::EngineConfig;

pub use entry::{EntryCandidate, EntryParams};
pub use order_block::{BreakOfStructure, OrderBlock};
pub use pivots::Pivot;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmcAnalysis {
    pub pivots: Vec<Pivot>,
    pub breaks: Vec<BreakOfStructure>,
    pub order_blocks: Vec<OrderBlock>,
    /// Entry from the most recent order block, if price is on it.
    pub candidate: Option<EntryCandidate>,
}

impl SmcAnalysis {
    pub fn analyze(candles: &[Candle], config: &EngineConfig) -> Self {
        let pivots = pivots::detect_pivots(candles, config.swing_lookback);
        let events = order_block::detect_structure(candles, &pivots);

        let params = EntryParams {
            proximity_epsilon: config.proximity_epsilon,
            stop_buffer_pct: config.stop_buffer_pct,
            risk_reward_ratio: config.risk_reward_ratio,
        };
        let candidate = match (events.order_blocks.last(), candles.last()) {
            (Some(block), Some(last)) => entry::entry_candidate(block, last.close, &params),
            _ => None,
        };

        Self {
            pivots,
            breaks: events.breaks,
            order_blocks: events.order_blocks,
            candidate,
        }
    }

    pub fn latest_order_block(&self) -> Option<&OrderBlock> {
        self.order_blocks.last()
    }
}
