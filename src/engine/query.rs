use anyhow::Result;
use std::collections::BTreeMap;

use crate::db::models::{
    EventOdds, MarketOdds, MarketType, OddsSnapshot, OutcomeOdds, ValueBetFilter, ValueOpportunity,
};
use crate::db::OddsStore;
use crate::engine::normalization::{aggregate, remove_vig, ProbabilityMap};
use crate::engine::probability::ProbabilityEstimator;
use crate::engine::value::{closing_line_value, round_probability};
use crate::engine::{offer_best, BestQuote};

/// How many stored snapshots the odds view looks back over.
pub const RECENT_SNAPSHOT_LIMIT: i64 = 200;
const MAX_PAGE: i64 = 500;

/// Odds summary of one stored event, or `None` if it does not exist.
///
/// Works like a batch over stored data: the latest quote per
/// (market, bookmaker, outcome) is de-vigged per bookmaker, aggregated by
/// median and passed through the estimator.
pub fn event_odds<S: OddsStore + ?Sized>(
    store: &S,
    estimator: &dyn ProbabilityEstimator,
    event_id: i64,
) -> Result<Option<EventOdds>> {
    let Some(event) = store.get_event(event_id)? else {
        return Ok(None);
    };

    // Newest first, so the first sighting of a key is the latest quote
    let mut latest: BTreeMap<(MarketType, String), BTreeMap<_, OddsSnapshot>> = BTreeMap::new();
    for snapshot in store.recent_snapshots(event_id, RECENT_SNAPSHOT_LIMIT)? {
        latest
            .entry((snapshot.market, snapshot.bookmaker.clone()))
            .or_default()
            .entry(snapshot.outcome)
            .or_insert(snapshot);
    }

    let mut by_market: BTreeMap<MarketType, Vec<&BTreeMap<_, OddsSnapshot>>> = BTreeMap::new();
    for ((market, _), quotes) in &latest {
        by_market.entry(*market).or_default().push(quotes);
    }

    let mut markets = Vec::with_capacity(by_market.len());
    for (market, books) in by_market {
        let fair: Vec<ProbabilityMap> = books
            .iter()
            .map(|quotes| {
                let implied: ProbabilityMap =
                    quotes.iter().map(|(&o, s)| (o, 1.0 / s.odds)).collect();
                remove_vig(&implied)
            })
            .collect();
        let consensus = aggregate(&fair);
        let true_probabilities = estimator.estimate(&event, market, &consensus);

        let mut best = BTreeMap::new();
        for s in books.iter().flat_map(|quotes| quotes.values()) {
            offer_best(
                &mut best,
                s.outcome,
                BestQuote {
                    odds: s.odds,
                    bookmaker_key: s.bookmaker.clone(),
                    bookmaker_id: None,
                },
            );
        }

        let mut outcomes = Vec::with_capacity(consensus.len());
        for (&outcome, &p) in &consensus {
            let best_quote = best.get(&outcome);
            let closing = store.latest_closing_snapshot(event_id, market, outcome)?;
            let closing_odds = closing.map(|c| c.odds);
            outcomes.push(OutcomeOdds {
                outcome,
                best_bookmaker: best_quote.map(|q| q.bookmaker_key.clone()),
                best_odds: best_quote.map(|q| q.odds),
                closing_odds,
                closing_line_value: best_quote
                    .zip(closing_odds)
                    .and_then(|(q, close)| closing_line_value(q.odds, close))
                    .map(round_probability),
                consensus_probability: round_probability(p),
                true_probability: round_probability(
                    true_probabilities.get(&outcome).copied().unwrap_or(0.0),
                ),
            });
        }

        markets.push(MarketOdds {
            market,
            latest: books.iter().flat_map(|q| q.values().cloned()).collect(),
            outcomes,
        });
    }

    Ok(Some(EventOdds { event, markets }))
}

/// Persisted opportunities matching `filter`, newest first.
pub fn value_bets<S: OddsStore + ?Sized>(
    store: &S,
    filter: &ValueBetFilter,
) -> Result<Vec<ValueOpportunity>> {
    let filter = ValueBetFilter {
        limit: filter.limit.clamp(1, MAX_PAGE),
        offset: filter.offset.max(0),
        ..filter.clone()
    };
    store.list_opportunities(&filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Event, Outcome};
    use crate::db::Database;
    use crate::engine::probability::MarketConsensus;
    use approx::assert_relative_eq;
    use chrono::{Duration, Utc};

    fn seed(db: &Database) -> i64 {
        let now = Utc::now();
        db.transaction(|repo| {
            let event = repo.insert_event(&Event {
                id: None,
                external_id: "epl|arsenal_chelsea|t".into(),
                name: "Arsenal vs Chelsea".into(),
                competition: Some("EPL".into()),
                home_team: Some("Arsenal".into()),
                away_team: Some("Chelsea".into()),
                start_time: now + Duration::hours(2),
                created_at: now,
                updated_at: now,
            })?;
            let id = event.id.unwrap();
            let snap = |bookmaker: &str, outcome, odds: f64, age_min: i64, closing| OddsSnapshot {
                id: None,
                event_id: id,
                market: MarketType::OneXTwo,
                outcome,
                bookmaker: bookmaker.into(),
                odds,
                implied_probability: round_probability(1.0 / odds),
                captured_at: now - Duration::minutes(age_min),
                closing_line: closing,
            };
            repo.insert_snapshots(&[
                // stale pinnacle prices, superseded below
                snap("pinnacle", Outcome::One, 1.50, 30, false),
                snap("pinnacle", Outcome::Draw, 4.00, 30, false),
                snap("pinnacle", Outcome::Two, 6.00, 30, false),
                snap("pinnacle", Outcome::One, 2.00, 5, false),
                snap("pinnacle", Outcome::Draw, 3.60, 5, false),
                snap("pinnacle", Outcome::Two, 4.00, 5, true),
                snap("bet365", Outcome::One, 1.95, 5, false),
                snap("bet365", Outcome::Draw, 3.50, 5, false),
                snap("bet365", Outcome::Two, 4.20, 5, false),
            ])?;
            Ok(id)
        })
        .unwrap()
    }

    #[test]
    fn test_event_odds_uses_latest_quotes() {
        let db = Database::open(":memory:").unwrap();
        let id = seed(&db);
        let view = db
            .read(|repo| event_odds(repo, &MarketConsensus, id))
            .unwrap()
            .unwrap();

        assert_eq!(view.event.name, "Arsenal vs Chelsea");
        assert_eq!(view.markets.len(), 1);
        let market = &view.markets[0];
        assert_eq!(market.latest.len(), 6);
        assert!(market.latest.iter().all(|s| s.odds != 1.50 && s.odds != 6.00));

        let outcomes: Vec<Outcome> = market.outcomes.iter().map(|o| o.outcome).collect();
        assert_eq!(outcomes, vec![Outcome::One, Outcome::Draw, Outcome::Two]);

        let one = &market.outcomes[0];
        assert_eq!(one.best_bookmaker.as_deref(), Some("pinnacle"));
        assert_eq!(one.best_odds, Some(2.0));
        assert_relative_eq!(one.consensus_probability, 0.4906, epsilon = 1e-9);
        assert_eq!(one.true_probability, one.consensus_probability);
        assert_eq!(one.closing_odds, None);
        assert_eq!(one.closing_line_value, None);

        let two = &market.outcomes[2];
        assert_eq!(two.best_bookmaker.as_deref(), Some("bet365"));
        assert_eq!(two.closing_odds, Some(4.0));
        // 4.00 / 4.20 − 1
        assert_eq!(two.closing_line_value, Some(-0.0476));
    }

    #[test]
    fn test_event_odds_unknown_event() {
        let db = Database::open(":memory:").unwrap();
        assert!(db
            .read(|repo| event_odds(repo, &MarketConsensus, 42))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_value_bets_clamps_paging() {
        let db = Database::open(":memory:").unwrap();
        let rows = db
            .read(|repo| {
                value_bets(
                    repo,
                    &ValueBetFilter {
                        limit: 0,
                        offset: -5,
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert!(rows.is_empty());
    }
}
