use crate::db::models::{Event, MarketType};
use crate::engine::normalization::ProbabilityMap;

/// Turns a market's consensus probabilities into "true" probabilities.
///
/// Implementations must return values in `[0, 1]` keyed by the same outcomes
/// they were given; an empty input yields an empty map.
pub trait ProbabilityEstimator: Send + Sync {
    fn estimate(&self, event: &Event, market: MarketType, consensus: &ProbabilityMap)
        -> ProbabilityMap;

    fn name(&self) -> &str;
}

/// Trusts the cross-bookmaker consensus as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarketConsensus;

impl ProbabilityEstimator for MarketConsensus {
    fn estimate(
        &self,
        _event: &Event,
        _market: MarketType,
        consensus: &ProbabilityMap,
    ) -> ProbabilityMap {
        consensus.clone()
    }

    fn name(&self) -> &str {
        "market-consensus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Outcome;
    use chrono::Utc;

    fn event() -> Event {
        let now = Utc::now();
        Event {
            id: Some(1),
            external_id: "epl|a_b|t".into(),
            name: "A vs B".into(),
            competition: Some("EPL".into()),
            home_team: Some("A".into()),
            away_team: Some("B".into()),
            start_time: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_market_consensus_is_identity() {
        let consensus = ProbabilityMap::from([(Outcome::One, 0.48), (Outcome::Two, 0.31)]);
        let out = MarketConsensus.estimate(&event(), MarketType::OneXTwo, &consensus);
        assert_eq!(out, consensus);
        assert!(MarketConsensus
            .estimate(&event(), MarketType::OneXTwo, &ProbabilityMap::new())
            .is_empty());
    }
}
