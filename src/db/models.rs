use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownVariant;

/// Betting market a quote belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarketType {
    /// Full-time result: home win / draw / away win
    #[serde(rename = "ONE_X_TWO")]
    OneXTwo,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::OneXTwo => "ONE_X_TWO",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ONE_X_TWO" | "1X2" | "H2H" => Ok(MarketType::OneXTwo),
            _ => Err(UnknownVariant::new("market type", s)),
        }
    }
}

/// Outcome within a market. Ordering follows the 1X2 convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "ONE")]
    One,
    #[serde(rename = "DRAW")]
    Draw,
    #[serde(rename = "TWO")]
    Two,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::One => "ONE",
            Outcome::Draw => "DRAW",
            Outcome::Two => "TWO",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ONE" | "1" | "HOME" => Ok(Outcome::One),
            "DRAW" | "X" => Ok(Outcome::Draw),
            "TWO" | "2" | "AWAY" => Ok(Outcome::Two),
            _ => Err(UnknownVariant::new("outcome", s)),
        }
    }
}

/// Settlement state of a recorded bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetResult {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "WON")]
    Won,
    #[serde(rename = "LOST")]
    Lost,
}

impl BetResult {
    pub const ALL: [BetResult; 3] = [BetResult::Pending, BetResult::Won, BetResult::Lost];

    pub fn as_str(&self) -> &'static str {
        match self {
            BetResult::Pending => "PENDING",
            BetResult::Won => "WON",
            BetResult::Lost => "LOST",
        }
    }
}

impl fmt::Display for BetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BetResult {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(BetResult::Pending),
            "WON" | "WIN" => Ok(BetResult::Won),
            "LOST" | "LOSS" => Ok(BetResult::Lost),
            _ => Err(UnknownVariant::new("bet result", s)),
        }
    }
}

// ── SQLite conversions ────────────────────────────────────────────────────────

impl ToSql for MarketType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MarketType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Outcome {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Outcome {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for BetResult {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BetResult {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

/// One observed price as delivered by an odds feed. Consumed once per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuote {
    /// League / competition label, e.g. "English Premier League"
    pub league: Option<String>,
    /// Team names, home first when known
    pub teams: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub market: MarketType,
    pub outcome: Outcome,
    pub bookmaker_key: String,
    pub decimal_odds: f64,
}

/// A sporting fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    /// Deterministic identity derived from league, teams and start time
    pub external_id: String,
    pub name: String,
    pub competition: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub start_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A quote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmaker {
    pub id: i64,
    pub external_key: String,
}

/// One persisted observed price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub id: Option<i64>,
    pub event_id: i64,
    pub market: MarketType,
    pub outcome: Outcome,
    /// Bookmaker external key
    pub bookmaker: String,
    /// Decimal odds, 3 decimal places
    pub odds: f64,
    /// 1 / odds, 4 decimal places
    pub implied_probability: f64,
    pub captured_at: DateTime<Utc>,
    pub closing_line: bool,
}

/// A detected edge between the best available price and the true probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueOpportunity {
    pub id: Option<i64>,
    pub event_id: i64,
    pub market: MarketType,
    pub outcome: Outcome,
    /// Best available decimal odds, 3 decimal places
    pub odds: f64,
    pub true_probability: f64,
    /// odds × true_probability − 1, 4 decimal places
    pub edge: f64,
    pub bookmaker_id: Option<i64>,
    /// Bookmaker external key holding the best price
    pub source: String,
    /// Lowest odds still break-even; `None` when undefined
    pub min_odds_ev0: Option<f64>,
    /// Lowest odds still clearing the secondary EV threshold; `None` when undefined
    pub min_odds_ev2: Option<f64>,
    pub kelly_fraction: f64,
    pub created_at: DateTime<Utc>,
}

/// A stake placed by the user, measured later against the closing line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: Option<i64>,
    pub event_id: i64,
    pub market: MarketType,
    pub outcome: Outcome,
    /// 2 decimal places
    pub stake: f64,
    /// Decimal odds taken, 3 decimal places
    pub odds_taken: f64,
    pub bookmaker_id: Option<i64>,
    pub result: BetResult,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closing-line value and return over the recorded bets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClvSummary {
    /// Mean of closing/taken − 1 over bets that have a closing line
    pub average_clv: f64,
    /// Settled profit over total stake; pending bets stake but earn nothing
    pub roi: f64,
    pub bets_count: usize,
}

/// Filters for listing persisted value opportunities.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBetFilter {
    /// Case-insensitive substring of the event competition
    pub league: Option<String>,
    pub market: Option<MarketType>,
    pub outcome: Option<Outcome>,
    pub min_edge: Option<f64>,
    pub event_id: Option<i64>,
    pub start_from: Option<DateTime<Utc>>,
    pub start_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ValueBetFilter {
    fn default() -> Self {
        ValueBetFilter {
            league: None,
            market: None,
            outcome: None,
            min_edge: None,
            event_id: None,
            start_from: None,
            start_to: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Read-path view of one event: per-market odds summary.
#[derive(Debug, Clone, Serialize)]
pub struct EventOdds {
    pub event: Event,
    pub markets: Vec<MarketOdds>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketOdds {
    pub market: MarketType,
    /// Latest snapshot per (bookmaker, outcome)
    pub latest: Vec<OddsSnapshot>,
    pub outcomes: Vec<OutcomeOdds>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeOdds {
    pub outcome: Outcome,
    pub best_bookmaker: Option<String>,
    pub best_odds: Option<f64>,
    pub closing_odds: Option<f64>,
    /// best_odds measured against the closing line
    pub closing_line_value: Option<f64>,
    pub consensus_probability: f64,
    pub true_probability: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parse_aliases() {
        assert_eq!("ONE".parse::<Outcome>().unwrap(), Outcome::One);
        assert_eq!("x".parse::<Outcome>().unwrap(), Outcome::Draw);
        assert_eq!(" away ".parse::<Outcome>().unwrap(), Outcome::Two);
        assert!("over".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_market_parse_and_display() {
        assert_eq!("h2h".parse::<MarketType>().unwrap(), MarketType::OneXTwo);
        assert_eq!(MarketType::OneXTwo.to_string(), "ONE_X_TWO");
        let err = "totals".parse::<MarketType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown market type: 'totals'");
    }

    #[test]
    fn test_outcome_serde_uses_wire_names() {
        let json = serde_json::to_string(&Outcome::Draw).unwrap();
        assert_eq!(json, "\"DRAW\"");
        let parsed: Outcome = serde_json::from_str("\"TWO\"").unwrap();
        assert_eq!(parsed, Outcome::Two);
    }

    #[test]
    fn test_bet_result_parse_and_serde() {
        assert_eq!("won".parse::<BetResult>().unwrap(), BetResult::Won);
        assert_eq!(" Loss ".parse::<BetResult>().unwrap(), BetResult::Lost);
        assert!("void".parse::<BetResult>().is_err());
        assert_eq!(serde_json::to_string(&BetResult::Pending).unwrap(), "\"PENDING\"");
    }

    #[test]
    fn test_outcome_order_is_one_draw_two() {
        let mut v = vec![Outcome::Two, Outcome::One, Outcome::Draw];
        v.sort();
        assert_eq!(v, vec![Outcome::One, Outcome::Draw, Outcome::Two]);
    }
}
