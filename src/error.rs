use std::time::Duration;
use thiserror::Error;

/// Reasons a single provider quote is dropped from a batch.
///
/// These are never propagated: the quote is logged and skipped, and the
/// batch carries on with the remaining quotes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteRejection {
    #[error("quote has no start time")]
    MissingStartTime,

    #[error("decimal odds {0} are not a valid price (must be > 1.0)")]
    InvalidOdds(f64),

    #[error("quote has no bookmaker key")]
    MissingBookmaker,
}

/// Reasons a bet cannot be recorded or settled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BetRejection {
    #[error("stake must be positive, got {0}")]
    InvalidStake(f64),

    #[error("odds taken must be greater than 1.0, got {0}")]
    InvalidOdds(f64),

    #[error("event {0} not found")]
    UnknownEvent(i64),

    #[error("bookmaker {0} not found")]
    UnknownBookmaker(i64),

    #[error("bet {0} not found")]
    UnknownBet(i64),
}

/// Transport-level failures of an odds feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{provider} request for '{league}' timed out after {timeout:?}")]
    Timeout {
        provider: String,
        league: String,
        timeout: Duration,
    },

    #[error("{provider} returned HTTP {status} for '{league}': {body}")]
    Status {
        provider: String,
        league: String,
        status: u16,
        body: String,
    },

    #[error("{provider} gave up on '{league}' after {attempts} attempt(s): {last}")]
    Exhausted {
        provider: String,
        league: String,
        attempts: u32,
        #[source]
        last: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A stored or user-supplied label that does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        UnknownVariant {
            kind,
            value: value.to_string(),
        }
    }
}
