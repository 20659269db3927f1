pub mod bets;
pub mod closing_line;
pub mod identity;
pub mod ingestion;
pub mod normalization;
pub mod probability;
pub mod query;
pub mod value;

pub use ingestion::{IngestionEngine, IngestionSettings};
pub use probability::MarketConsensus;

use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::db::models::MarketType;

/// Grouping key for everything computed per market of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventMarketKey {
    pub event_id: i64,
    pub market: MarketType,
}

/// Highest price seen for one outcome and who offered it.
#[derive(Debug, Clone, PartialEq)]
pub struct BestQuote {
    pub odds: f64,
    pub bookmaker_key: String,
    pub bookmaker_id: Option<i64>,
}

/// Keep the higher of the held and offered prices. Ties keep the held quote,
/// so the first bookmaker to post a price holds it.
pub fn offer_best<K: Ord>(best: &mut BTreeMap<K, BestQuote>, key: K, candidate: BestQuote) {
    match best.entry(key) {
        Entry::Occupied(mut held) => {
            if candidate.odds > held.get().odds {
                held.insert(candidate);
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bookmaker: &str, odds: f64) -> BestQuote {
        BestQuote {
            odds,
            bookmaker_key: bookmaker.into(),
            bookmaker_id: None,
        }
    }

    #[test]
    fn test_offer_best_keeps_first_on_tie() {
        let mut best = BTreeMap::new();
        offer_best(&mut best, 1, quote("a", 2.0));
        offer_best(&mut best, 1, quote("b", 2.0));
        offer_best(&mut best, 1, quote("c", 1.9));
        assert_eq!(best[&1].bookmaker_key, "a");
        offer_best(&mut best, 1, quote("d", 2.1));
        assert_eq!(best[&1].bookmaker_key, "d");
    }
}
