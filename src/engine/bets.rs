//! Bet ledger: recording stakes, settling them and measuring them against
//! the closing line.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::{Bet, BetResult, ClvSummary, MarketType, Outcome};
use crate::db::OddsStore;
use crate::engine::value::{closing_line_value, round_money, round_odds};
use crate::error::BetRejection;

/// A bet as submitted, before validation and rounding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewBet {
    pub event_id: i64,
    pub market: MarketType,
    pub outcome: Outcome,
    pub stake: f64,
    pub odds_taken: f64,
    pub bookmaker_id: Option<i64>,
}

/// Validate and store a bet as `PENDING`. Stake is rounded to 2 places and
/// odds to 3 before the range checks.
pub fn place_bet<S: OddsStore + ?Sized>(
    store: &S,
    request: &NewBet,
    now: DateTime<Utc>,
) -> Result<Bet> {
    let stake = round_money(request.stake)
        .filter(|&s| s > 0.0)
        .ok_or(BetRejection::InvalidStake(request.stake))?;
    let odds_taken = round_odds(request.odds_taken)
        .filter(|&o| o > 1.0)
        .ok_or(BetRejection::InvalidOdds(request.odds_taken))?;

    if store.get_event(request.event_id)?.is_none() {
        return Err(BetRejection::UnknownEvent(request.event_id).into());
    }
    if let Some(id) = request.bookmaker_id {
        if store.get_bookmaker(id)?.is_none() {
            return Err(BetRejection::UnknownBookmaker(id).into());
        }
    }

    store.insert_bet(&Bet {
        id: None,
        event_id: request.event_id,
        market: request.market,
        outcome: request.outcome,
        stake,
        odds_taken,
        bookmaker_id: request.bookmaker_id,
        result: BetResult::Pending,
        created_at: now,
        updated_at: now,
    })
}

pub fn settle_bet<S: OddsStore + ?Sized>(
    store: &S,
    id: i64,
    result: BetResult,
    now: DateTime<Utc>,
) -> Result<Bet> {
    if !store.set_bet_result(id, result, now)? {
        return Err(BetRejection::UnknownBet(id).into());
    }
    store
        .get_bet(id)?
        .ok_or_else(|| BetRejection::UnknownBet(id).into())
}

/// Settled profit of one bet. Pending bets have none yet.
pub fn profit(result: BetResult, stake: f64, odds_taken: f64) -> f64 {
    match result {
        BetResult::Won => stake * (odds_taken - 1.0),
        BetResult::Lost => -stake,
        BetResult::Pending => 0.0,
    }
}

/// Average closing-line value and ROI over every recorded bet.
///
/// CLV is averaged only over bets whose (event, market, outcome) has a
/// closing-line snapshot; ROI divides settled profit by all stakes,
/// pending included. Both are 0 when there is nothing to divide by.
pub fn clv_summary<S: OddsStore + ?Sized>(store: &S) -> Result<ClvSummary> {
    let bets = store.bets_by_result(&BetResult::ALL)?;

    let mut clv_sum = 0.0;
    let mut clv_count = 0usize;
    let mut total_stake = 0.0;
    let mut total_profit = 0.0;

    for bet in &bets {
        total_stake += bet.stake;
        total_profit += profit(bet.result, bet.stake, bet.odds_taken);

        let closing = store.latest_closing_snapshot(bet.event_id, bet.market, bet.outcome)?;
        if let Some(clv) = closing.and_then(|c| closing_line_value(bet.odds_taken, c.odds)) {
            clv_sum += clv;
            clv_count += 1;
        }
    }

    Ok(ClvSummary {
        average_clv: if clv_count == 0 {
            0.0
        } else {
            clv_sum / clv_count as f64
        },
        roi: if total_stake == 0.0 {
            0.0
        } else {
            total_profit / total_stake
        },
        bets_count: bets.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Event, OddsSnapshot};
    use crate::db::Database;
    use approx::assert_relative_eq;

    fn seed_event(db: &Database) -> (i64, i64) {
        let now = Utc::now();
        db.transaction(|repo| {
            let event = repo.insert_event(&Event {
                id: None,
                external_id: "league|home_away|t".into(),
                name: "Home vs Away".into(),
                competition: Some("League".into()),
                home_team: Some("Home".into()),
                away_team: Some("Away".into()),
                start_time: now,
                created_at: now,
                updated_at: now,
            })?;
            let bookmaker = repo.upsert_bookmaker("sharp")?;
            Ok((event.id.unwrap(), bookmaker.id))
        })
        .unwrap()
    }

    fn closing(event_id: i64, outcome: Outcome, odds: f64) -> OddsSnapshot {
        OddsSnapshot {
            id: None,
            event_id,
            market: MarketType::OneXTwo,
            outcome,
            bookmaker: "sharp".into(),
            odds,
            implied_probability: 1.0 / odds,
            captured_at: Utc::now(),
            closing_line: true,
        }
    }

    fn request(event_id: i64, outcome: Outcome, stake: f64, odds: f64) -> NewBet {
        NewBet {
            event_id,
            market: MarketType::OneXTwo,
            outcome,
            stake,
            odds_taken: odds,
            bookmaker_id: None,
        }
    }

    fn rejection(err: anyhow::Error) -> BetRejection {
        err.downcast::<BetRejection>().unwrap()
    }

    #[test]
    fn test_place_bet_rounds_and_starts_pending() {
        let db = Database::open(":memory:").unwrap();
        let (event_id, bookmaker_id) = seed_event(&db);
        let bet = db
            .transaction(|repo| {
                place_bet(
                    repo,
                    &NewBet {
                        bookmaker_id: Some(bookmaker_id),
                        ..request(event_id, Outcome::One, 10.005, 2.4004)
                    },
                    Utc::now(),
                )
            })
            .unwrap();
        assert!(bet.id.is_some());
        assert_eq!(bet.stake, 10.01);
        assert_eq!(bet.odds_taken, 2.4);
        assert_eq!(bet.result, BetResult::Pending);
        assert_eq!(bet.bookmaker_id, Some(bookmaker_id));
    }

    #[test]
    fn test_place_bet_rejects_bad_input() {
        let db = Database::open(":memory:").unwrap();
        let (event_id, _) = seed_event(&db);
        let now = Utc::now();
        let place = |req: NewBet| db.transaction(|repo| place_bet(repo, &req, now));

        let err = place(request(event_id, Outcome::One, 0.0, 2.0)).unwrap_err();
        assert_eq!(rejection(err), BetRejection::InvalidStake(0.0));
        let err = place(request(event_id, Outcome::One, 0.004, 2.0)).unwrap_err();
        assert_eq!(rejection(err), BetRejection::InvalidStake(0.004));
        let err = place(request(event_id, Outcome::One, 10.0, 1.0)).unwrap_err();
        assert_eq!(rejection(err), BetRejection::InvalidOdds(1.0));
        let err = place(request(event_id + 1, Outcome::One, 10.0, 2.0)).unwrap_err();
        assert_eq!(rejection(err), BetRejection::UnknownEvent(event_id + 1));
        let err = place(NewBet {
            bookmaker_id: Some(404),
            ..request(event_id, Outcome::One, 10.0, 2.0)
        })
        .unwrap_err();
        assert_eq!(rejection(err), BetRejection::UnknownBookmaker(404));

        assert!(db.read(|repo| repo.bets_by_result(&BetResult::ALL)).unwrap().is_empty());
    }

    #[test]
    fn test_settle_unknown_bet() {
        let db = Database::open(":memory:").unwrap();
        let err = db
            .transaction(|repo| settle_bet(repo, 9, BetResult::Won, Utc::now()))
            .unwrap_err();
        assert_eq!(rejection(err), BetRejection::UnknownBet(9));
    }

    #[test]
    fn test_profit_by_result() {
        assert_relative_eq!(profit(BetResult::Won, 100.0, 2.4), 140.0, epsilon = 1e-9);
        assert_eq!(profit(BetResult::Lost, 50.0, 3.1), -50.0);
        assert_eq!(profit(BetResult::Pending, 75.0, 2.8), 0.0);
    }

    #[test]
    fn test_clv_summary_with_no_bets_is_zero() {
        let db = Database::open(":memory:").unwrap();
        let summary = db.read(|repo| clv_summary(repo)).unwrap();
        assert_eq!(
            summary,
            ClvSummary {
                average_clv: 0.0,
                roi: 0.0,
                bets_count: 0
            }
        );
    }

    #[test]
    fn test_clv_summary_averages_closing_and_profit() {
        let db = Database::open(":memory:").unwrap();
        let (event_id, bookmaker_id) = seed_event(&db);
        db.transaction(|repo| {
            repo.insert_snapshots(&[
                closing(event_id, Outcome::One, 2.20),
                closing(event_id, Outcome::Draw, 3.30),
                closing(event_id, Outcome::Two, 3.00),
            ])
        })
        .unwrap();

        let now = Utc::now();
        let ids: Vec<i64> = [
            (Outcome::One, 100.0, 2.40),
            (Outcome::Draw, 50.0, 3.10),
            (Outcome::Two, 75.0, 2.80),
        ]
        .into_iter()
        .map(|(outcome, stake, odds)| {
            let req = NewBet {
                bookmaker_id: Some(bookmaker_id),
                ..request(event_id, outcome, stake, odds)
            };
            db.transaction(|repo| place_bet(repo, &req, now))
                .unwrap()
                .id
                .unwrap()
        })
        .collect();

        db.transaction(|repo| {
            settle_bet(repo, ids[0], BetResult::Won, now)?;
            settle_bet(repo, ids[1], BetResult::Lost, now)
        })
        .unwrap();

        let summary = db.read(|repo| clv_summary(repo)).unwrap();
        let expected_clv = ((2.20 / 2.40 - 1.0) + (3.30 / 3.10 - 1.0) + (3.00 / 2.80 - 1.0)) / 3.0;
        let expected_roi = (100.0 * (2.40 - 1.0) - 50.0) / (100.0 + 50.0 + 75.0);
        assert_eq!(summary.bets_count, 3);
        assert_relative_eq!(summary.average_clv, expected_clv, epsilon = 1e-9);
        assert_relative_eq!(summary.roi, expected_roi, epsilon = 1e-9);
        assert_relative_eq!(summary.roi, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_clv_ignores_bets_without_closing_line() {
        let db = Database::open(":memory:").unwrap();
        let (event_id, _) = seed_event(&db);
        db.transaction(|repo| repo.insert_snapshots(&[closing(event_id, Outcome::One, 2.2)]))
            .unwrap();
        let now = Utc::now();
        db.transaction(|repo| {
            place_bet(repo, &request(event_id, Outcome::One, 10.0, 2.0), now)?;
            place_bet(repo, &request(event_id, Outcome::Two, 10.0, 3.0), now)
        })
        .unwrap();

        let summary = db.read(|repo| clv_summary(repo)).unwrap();
        assert_eq!(summary.bets_count, 2);
        // only the ONE bet has a close: 2.2 / 2.0 − 1
        assert_relative_eq!(summary.average_clv, 0.1, epsilon = 1e-9);
        assert_eq!(summary.roi, 0.0);
    }
}
