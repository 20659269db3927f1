//! Closing-line selection.
//!
//! Quotes captured in the last few minutes before kick-off are candidates.
//! For every (event, market, outcome) with candidates exactly one is picked:
//!
//! 1. the first bookmaker of the priority list that quoted the outcome;
//! 2. otherwise the bookmaker holding the batch-wide best price, if it has a
//!    candidate in the window;
//! 3. otherwise the highest-priced candidate.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::db::models::Outcome;
use crate::engine::{BestQuote, EventMarketKey};

pub const CLOSING_WINDOW_SECS: i64 = 300;

/// `start` falls within `[captured_at, captured_at + window]`.
pub fn in_closing_window(captured_at: DateTime<Utc>, start: DateTime<Utc>) -> bool {
    start >= captured_at && start <= captured_at + Duration::seconds(CLOSING_WINDOW_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    /// Position of the snapshot in the batch's snapshot list
    snapshot: usize,
    odds: f64,
}

/// In-window quotes accumulated during one batch.
#[derive(Debug, Default)]
pub struct ClosingCandidates {
    pool: BTreeMap<(EventMarketKey, Outcome), BTreeMap<String, Candidate>>,
}

impl ClosingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot as a candidate. A later quote from the same
    /// bookmaker for the same outcome replaces the earlier one.
    pub fn add(
        &mut self,
        key: EventMarketKey,
        outcome: Outcome,
        bookmaker: &str,
        odds: f64,
        snapshot: usize,
    ) {
        self.pool
            .entry((key, outcome))
            .or_default()
            .insert(bookmaker.to_string(), Candidate { snapshot, odds });
    }

    /// Indices of the snapshots chosen as closing lines, one per
    /// (event, market, outcome) that has candidates.
    pub fn select(
        &self,
        priority: &[String],
        best: &BTreeMap<(EventMarketKey, Outcome), BestQuote>,
    ) -> Vec<usize> {
        self.pool
            .iter()
            .filter_map(|(slot, by_bookmaker)| {
                let from_priority = priority.iter().find_map(|b| by_bookmaker.get(b));
                let from_best = || {
                    best.get(slot)
                        .and_then(|q| by_bookmaker.get(&q.bookmaker_key))
                };
                let highest = || {
                    by_bookmaker.values().fold(None::<&Candidate>, |acc, c| match acc {
                        Some(a) if c.odds <= a.odds => Some(a),
                        _ => Some(c),
                    })
                };
                from_priority
                    .or_else(from_best)
                    .or_else(highest)
                    .map(|c| c.snapshot)
            })
            .collect()
    }
}
