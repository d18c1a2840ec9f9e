use std::collections::VecDeque;

use tracing::debug;

use crate::error::EngineError;
use crate::market_data::candle::{normalize_series, Candle};

// ---------------------------------------------------------------------------
// CandleStore -- bounded, time-ordered series for one session
// ---------------------------------------------------------------------------

/// What a successful [`CandleStore::apply_update`] did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The in-progress head bar was revised in place.
    Revised,
    /// A new in-progress head bar was opened.
    Opened,
    /// A bar was closed (appended closed, or head finalized).
    Closed,
}

impl UpdateOutcome {
    /// Whether downstream indicators must be recomputed.
    pub fn closed_bar(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Ring of the most recent candles for a single (instrument, timeframe)
/// session. Holds at most `capacity` closed bars plus one in-progress head.
/// Times are strictly increasing; the head is the only element ever mutated.
///
/// Not internally synchronised: the owning session serialises writers.
#[derive(Debug)]
pub struct CandleStore {
    bars: VecDeque<Candle>,
    head_open: bool,
    capacity: usize,
    interval_secs: i64,
    rejected: u64,
    gaps: u64,
}

impl CandleStore {
    /// `interval_secs` is only used to count time gaps; pass 0 to disable.
    pub fn new(capacity: usize, interval_secs: i64) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity + 1),
            head_open: false,
            capacity: capacity.max(1),
            interval_secs,
            rejected: 0,
            gaps: 0,
        }
    }

    /// Apply a live update.
    ///
    /// * partial, same time as an open head: revise in place.
    /// * final, same time as an open head: finalize in place.
    /// * final, newer than head: append closed (an abandoned open head is
    ///   treated as closed).
    /// * partial, newer than head: open a new head (closing the previous one
    ///   if it was still open).
    ///
    /// Anything else is rejected with `OutOfOrderUpdate` and leaves the series
    /// untouched.
    pub fn apply_update(&mut self, candle: Candle, is_final: bool) -> Result<UpdateOutcome, EngineError> {
        let Some(head) = self.bars.back().copied() else {
            self.bars.push_back(candle);
            self.head_open = !is_final;
            return Ok(if is_final { UpdateOutcome::Closed } else { UpdateOutcome::Opened });
        };

        use std::cmp::Ordering::{Equal, Greater};
        let outcome = match (is_final, candle.time.cmp(&head.time)) {
            (false, Equal) if self.head_open => {
                self.replace_head(candle);
                UpdateOutcome::Revised
            }
            (true, Equal) if self.head_open => {
                self.replace_head(candle);
                self.head_open = false;
                UpdateOutcome::Closed
            }
            (true, Greater) => {
                if self.head_open {
                    debug!(head = head.time, incoming = candle.time, "open head superseded by a closed bar");
                }
                self.note_gap(head.time, candle.time);
                self.bars.push_back(candle);
                self.head_open = false;
                UpdateOutcome::Closed
            }
            (false, Greater) => {
                let closed_previous = self.head_open;
                self.note_gap(head.time, candle.time);
                self.bars.push_back(candle);
                self.head_open = true;
                if closed_previous {
                    UpdateOutcome::Closed
                } else {
                    UpdateOutcome::Opened
                }
            }
            _ => {
                self.rejected += 1;
                debug!(
                    head = head.time,
                    incoming = candle.time,
                    is_final,
                    rejected = self.rejected,
                    "out-of-order candle update dropped"
                );
                return Err(EngineError::OutOfOrderUpdate { head: head.time, incoming: candle.time });
            }
        };

        self.trim();
        Ok(outcome)
    }

    /// Merge a historical backfill into the series.
    ///
    /// History is authoritative for every time it covers; live bars newer than
    /// the last historical bar (including an open head) are kept after it.
    /// Returns the resulting number of bars.
    pub fn seed_history(&mut self, history: Vec<Candle>) -> usize {
        let history = normalize_series(history);
        let Some(last_hist) = history.last().map(|c| c.time) else {
            return self.bars.len();
        };

        let live: Vec<Candle> = self.bars.drain(..).filter(|c| c.time > last_hist).collect();
        self.head_open = self.head_open && !live.is_empty();

        self.bars.extend(history);
        self.bars.extend(live);
        self.trim();
        self.bars.len()
    }

    /// Closed bars only, oldest first.
    pub fn closed_candles(&self) -> Vec<Candle> {
        let n = self.closed_len();
        self.bars.iter().take(n).copied().collect()
    }

    /// Every bar including an in-progress head, oldest first.
    pub fn candles(&self) -> Vec<Candle> {
        self.bars.iter().copied().collect()
    }

    pub fn head(&self) -> Option<&Candle> {
        self.bars.back()
    }

    pub fn head_is_open(&self) -> bool {
        self.head_open && !self.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closed_len(&self) -> usize {
        self.bars.len() - usize::from(self.head_is_open())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Updates dropped as out-of-order since the store was created.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Appends that skipped at least one interval.
    pub fn gap_count(&self) -> u64 {
        self.gaps
    }

    fn replace_head(&mut self, candle: Candle) {
        if let Some(last) = self.bars.back_mut() {
            *last = candle;
        }
    }

    fn note_gap(&mut self, head_time: i64, incoming: i64) {
        if self.interval_secs > 0 && incoming - head_time > self.interval_secs {
            self.gaps += 1;
            debug!(head = head_time, incoming, "time gap in candle series");
        }
    }

    fn trim(&mut self) {
        while self.closed_len() > self.capacity {
            self.bars.pop_front();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
