//! Vig removal and cross-bookmaker consensus.
//!
//! Every function here is total: degenerate input (zero sums, negative or
//! non-finite values, empty samples) maps to zero probabilities instead of
//! an error.

use std::collections::BTreeMap;

use crate::db::models::Outcome;

/// Outcome → probability for one market.
pub type ProbabilityMap = BTreeMap<Outcome, f64>;

/// Negative and non-finite values count as zero.
pub fn sanitize(p: f64) -> f64 {
    if p.is_finite() && p > 0.0 {
        p
    } else {
        0.0
    }
}

/// Rescale one bookmaker's implied probabilities so they sum to 1.
///
/// If the sanitized sum is not positive every outcome maps to 0.
pub fn remove_vig(implied: &ProbabilityMap) -> ProbabilityMap {
    let total: f64 = implied.values().copied().map(sanitize).sum();
    implied
        .iter()
        .map(|(&outcome, &p)| {
            let fair = if total > 0.0 { sanitize(p) / total } else { 0.0 };
            (outcome, fair)
        })
        .collect()
}

/// Median of each outcome's sample across bookmakers.
///
/// Outcomes are aggregated independently and the result is not
/// renormalized, so it need not sum to 1.
pub fn aggregate(per_bookmaker: &[ProbabilityMap]) -> ProbabilityMap {
    let mut samples: BTreeMap<Outcome, Vec<f64>> = BTreeMap::new();
    for map in per_bookmaker {
        for (&outcome, &p) in map {
            samples.entry(outcome).or_default().push(sanitize(p));
        }
    }
    samples
        .into_iter()
        .map(|(outcome, mut values)| (outcome, median(&mut values)))
        .collect()
}

/// Median of `values`; the mean of the two middle values for an even count.
/// Sorts in place. An empty slice yields 0.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
