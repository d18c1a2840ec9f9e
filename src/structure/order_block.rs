// =============================================================================
// Break of structure and order blocks
// =============================================================================
//
// Walking pivots in time order:
//   - a High pivot above the last confirmed High is a bullish BOS,
//   - a Low pivot below the last confirmed Low is a bearish BOS.
//
// Each BOS looks back from the breaking pivot to the prior opposite-type pivot
// (both ends inclusive) for the most recent candle coloured against the break:
// bearish for a bullish BOS (reference = its low), bullish for a bearish BOS
// (reference = its high). No such candle, or no prior opposite pivot, means no
// order block for that leg.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::structure::pivots::{Pivot, PivotKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

/// A break beyond the previous same-type pivot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakOfStructure {
    pub direction: Direction,
    /// Pivot that made the break.
    pub pivot: Pivot,
    /// Level that was broken.
    pub broken_price: f64,
}

/// Supply/demand zone left behind by a BOS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub kind: Direction,
    pub reference_price: f64,
    pub time: i64,
    pub index: usize,
}

/// BOS events and the order blocks they produced, in time order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureEvents {
    pub breaks: Vec<BreakOfStructure>,
    pub order_blocks: Vec<OrderBlock>,
}

/// Walk `pivots` (time ordered, from `detect_pivots`) over `candles`.
pub fn detect_structure(candles: &[Candle], pivots: &[Pivot]) -> StructureEvents {
    let mut events = StructureEvents::default();
    let mut last_high: Option<Pivot> = None;
    let mut last_low: Option<Pivot> = None;

    for &pivot in pivots {
        match pivot.kind {
            PivotKind::High => {
                if let Some(prev) = last_high {
                    if pivot.price > prev.price {
                        events.breaks.push(BreakOfStructure {
                            direction: Direction::Bullish,
                            pivot,
                            broken_price: prev.price,
                        });
                        if let Some(ob) = last_low.and_then(|low| {
                            find_order_block(candles, low.index, pivot.index, Direction::Bullish)
                        }) {
                            events.order_blocks.push(ob);
                        }
                    }
                }
                last_high = Some(pivot);
            }
            PivotKind::Low => {
                if let Some(prev) = last_low {
                    if pivot.price < prev.price {
                        events.breaks.push(BreakOfStructure {
                            direction: Direction::Bearish,
                            pivot,
                            broken_price: prev.price,
                        });
                        if let Some(ob) = last_high.and_then(|high| {
                            find_order_block(candles, high.index, pivot.index, Direction::Bearish)
                        }) {
                            events.order_blocks.push(ob);
                        }
                    }
                }
                last_low = Some(pivot);
            }
        }
    }

    events
}

/// Most recent candle in `[from, to]` coloured against `direction`.
fn find_order_block(candles: &[Candle], from: usize, to: usize, direction: Direction) -> Option<OrderBlock> {
    if from > to || to >= candles.len() {
        return None;
    }
    (from..=to).rev().find_map(|i| {
        let c = &candles[i];
        match direction {
            Direction::Bullish if c.is_bearish() => Some(OrderBlock {
                kind: Direction::Bullish,
                reference_price: c.low,
                time: c.time,
                index: i,
            }),
            Direction::Bearish if c.is_bullish() => Some(OrderBlock {
                kind: Direction::Bearish,
                reference_price: c.high,
                time: c.time,
                index: i,
            }),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::pivots::detect_pivots;

    fn c(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new((i + 1) * 60, open, high, low, close)
    }

    /// Rally to a high, pull back to a low through a down candle, then break
    /// the first high.
    fn bullish_leg() -> Vec<Candle> {
        vec![
            c(0, 10.0, 10.5, 9.5, 10.2),
            c(1, 10.2, 12.0, 10.1, 11.8), // high pivot 12.0
            c(2, 11.8, 11.9, 10.8, 11.0),
            c(3, 11.0, 11.1, 9.6, 9.8),   // bearish, low pivot 9.6
            c(4, 9.8, 11.5, 9.7, 11.4),
            c(5, 11.4, 13.0, 11.3, 12.9), // high pivot 13.0 breaks 12.0
            c(6, 12.9, 12.95, 12.0, 12.2),
        ]
    }

    #[test]
    fn bullish_bos_produces_order_block_at_last_down_candle() {
        let candles = bullish_leg();
        let pivots = detect_pivots(&candles, 1);
        let events = detect_structure(&candles, &pivots);

        assert_eq!(events.breaks.len(), 1);
        let bos = events.breaks[0];
        assert_eq!(bos.direction, Direction::Bullish);
        assert_eq!(bos.pivot.index, 5);
        assert_eq!(bos.broken_price, 12.0);

        assert_eq!(events.order_blocks.len(), 1);
        let ob = events.order_blocks[0];
        assert_eq!(ob.kind, Direction::Bullish);
        assert_eq!(ob.index, 3);
        assert_eq!(ob.reference_price, 9.6);
    }

    #[test]
    fn bearish_bos_uses_last_up_candle_high() {
        let candles = vec![
            c(0, 10.0, 10.5, 9.5, 9.8),
            c(1, 9.8, 9.9, 8.0, 8.2),    // low pivot 8.0
            c(2, 8.2, 9.0, 8.1, 8.9),
            c(3, 8.9, 10.4, 8.8, 10.2),  // bullish, high pivot 10.4
            c(4, 10.2, 10.3, 8.5, 8.6),
            c(5, 8.6, 8.7, 7.0, 7.1),    // low pivot 7.0 breaks 8.0
            c(6, 7.1, 7.9, 7.05, 7.8),
        ];
        let pivots = detect_pivots(&candles, 1);
        let events = detect_structure(&candles, &pivots);

        assert_eq!(events.breaks.len(), 1);
        assert_eq!(events.breaks[0].direction, Direction::Bearish);
        let ob = events.order_blocks[0];
        assert_eq!(ob.kind, Direction::Bearish);
        assert_eq!(ob.index, 3);
        assert_eq!(ob.reference_price, 10.4);
    }

    #[test]
    fn no_opposite_candle_means_no_order_block() {
        // Every candle in the leg closes up, so a bullish BOS finds nothing.
        let candles = vec![
            c(0, 10.0, 10.5, 9.5, 10.2),
            c(1, 10.2, 12.0, 10.1, 11.8),
            c(2, 11.0, 11.9, 10.8, 11.1),
            c(3, 9.7, 11.1, 9.6, 9.8),
            c(4, 9.8, 11.5, 9.7, 11.4),
            c(5, 11.4, 13.0, 11.3, 12.9),
            c(6, 12.2, 12.95, 12.0, 12.3),
        ];
        let pivots = detect_pivots(&candles, 1);
        let events = detect_structure(&candles, &pivots);
        assert_eq!(events.breaks.len(), 1);
        assert!(events.order_blocks.is_empty());
    }

    #[test]
    fn lower_high_is_not_a_break() {
        let pivots = vec![
            Pivot { index: 1, time: 120, price: 12.0, kind: PivotKind::High },
            Pivot { index: 3, time: 240, price: 9.0, kind: PivotKind::Low },
            Pivot { index: 5, time: 360, price: 11.0, kind: PivotKind::High },
        ];
        let candles: Vec<Candle> = (0..7).map(|i| c(i, 10.0, 10.0, 10.0, 10.0)).collect();
        let events = detect_structure(&candles, &pivots);
        assert!(events.breaks.is_empty());
    }
}
