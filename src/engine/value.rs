//! Value detection and stake sizing.
//!
//! For a price `o` and true probability `p`:
//!   edge   = o·p − 1
//!   min(t) = (1 + t) / p            lowest odds still returning EV ≥ t
//!   kelly  = cap · (o·p − 1) / (o − 1)
//!
//! The raw calculators never fail; degenerate inputs resolve to 0 (stakes)
//! or +∞ (minimum odds). Published figures are rounded half-up: odds to 3
//! places, probabilities, edge and Kelly to 4. A non-finite minimum odds is
//! published as `None`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::db::models::{MarketType, Outcome, ValueOpportunity};
use crate::engine::BestQuote;

pub const ODDS_DP: u32 = 3;
pub const PROBABILITY_DP: u32 = 4;
pub const MONEY_DP: u32 = 2;

/// Expected value of a unit stake.
pub fn edge(odds: f64, true_probability: f64) -> f64 {
    odds * true_probability - 1.0
}

/// Lowest decimal odds whose EV still reaches `threshold`.
///
/// Returns `f64::INFINITY` when `true_probability <= 0`.
pub fn min_odds_for_ev(true_probability: f64, threshold: f64) -> f64 {
    if true_probability <= 0.0 || !true_probability.is_finite() {
        return f64::INFINITY;
    }
    (1.0 + threshold) / true_probability
}

/// Fractional Kelly stake, zero when there is no edge or the inputs are degenerate.
pub fn kelly_fraction(odds: f64, true_probability: f64, cap: f64) -> f64 {
    if odds <= 1.0 || true_probability <= 0.0 || cap <= 0.0 {
        return 0.0;
    }
    let numerator = odds * true_probability - 1.0;
    let denominator = odds - 1.0;
    if numerator <= 0.0 || denominator <= 0.0 {
        return 0.0;
    }
    let f = cap * numerator / denominator;
    if f.is_finite() {
        f
    } else {
        0.0
    }
}

/// Closing-line value: `closing / taken − 1`.
///
/// Positive when the market closed at a longer price than the one taken.
/// `None` unless both prices are finite and positive.
pub fn closing_line_value(odds_taken: f64, closing_odds: f64) -> Option<f64> {
    let valid = |o: f64| o.is_finite() && o > 0.0;
    if !valid(odds_taken) || !valid(closing_odds) {
        return None;
    }
    Some(closing_odds / odds_taken - 1.0)
}

// ── Rounding ──────────────────────────────────────────────────────────────────

fn round_half_up(value: f64, dp: u32) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let d: Decimal = value.to_string().parse().ok()?;
    d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
}

/// Odds to 3 places; `None` for infinite, NaN or unrepresentable values.
pub fn round_odds(value: f64) -> Option<f64> {
    round_half_up(value, ODDS_DP)
}

/// Stakes to 2 places.
pub fn round_money(value: f64) -> Option<f64> {
    round_half_up(value, MONEY_DP)
}

/// Probabilities, edge and Kelly to 4 places; non-finite values become 0.
pub fn round_probability(value: f64) -> f64 {
    round_half_up(value, PROBABILITY_DP).unwrap_or(0.0)
}

// ── Detection ─────────────────────────────────────────────────────────────────

/// Thresholds applied when turning a best price into an opportunity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueDetector {
    /// Minimum edge an opportunity must reach to be emitted
    pub min_ev: f64,
    /// EV target for the second minimum-odds figure
    pub secondary_ev: f64,
    pub kelly_cap: f64,
}

impl ValueDetector {
    /// Price one outcome at its best available odds. Pure calculator: the
    /// result is returned whether or not it clears [`Self::passes`].
    pub fn detect(
        &self,
        event_id: i64,
        market: MarketType,
        outcome: Outcome,
        best: &BestQuote,
        true_probability: f64,
        created_at: DateTime<Utc>,
    ) -> ValueOpportunity {
        ValueOpportunity {
            id: None,
            event_id,
            market,
            outcome,
            odds: round_odds(best.odds).unwrap_or(best.odds),
            true_probability: round_probability(true_probability),
            edge: round_probability(edge(best.odds, true_probability)),
            bookmaker_id: best.bookmaker_id,
            source: best.bookmaker_key.clone(),
            min_odds_ev0: round_odds(min_odds_for_ev(true_probability, 0.0)),
            min_odds_ev2: round_odds(min_odds_for_ev(true_probability, self.secondary_ev)),
            kelly_fraction: round_probability(kelly_fraction(
                best.odds,
                true_probability,
                self.kelly_cap,
            )),
            created_at,
        }
    }

    /// Gate on the unrounded edge; invalid prices or probabilities never pass.
    pub fn passes(&self, odds: f64, true_probability: f64) -> bool {
        if odds <= 1.0 || true_probability <= 0.0 {
            return false;
        }
        edge(odds, true_probability) >= self.min_ev
    }
}
