use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::db::models::{BetResult, MarketType, Outcome, ValueBetFilter};
use crate::engine::bets::NewBet;
use crate::engine::IngestionSettings;
use crate::feed::TheOddsApiSettings;

/// Multi-bookmaker odds ingestion and value-bet detection
#[derive(Parser, Debug, Clone)]
#[command(name = "valuebet", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "valuebet.db")]
    pub database_path: String,

    /// Where odds come from
    #[arg(long, env = "ODDS_FEED", value_enum, default_value = "the-odds-api")]
    pub feed: FeedSource,

    /// The Odds API base URL
    #[arg(
        long,
        env = "ODDS_API_URL",
        default_value = "https://api.the-odds-api.com/v4"
    )]
    pub odds_api_url: String,

    /// The Odds API key (required for the-odds-api feed)
    #[arg(long, env = "ODDS_API_KEY")]
    pub odds_api_key: Option<String>,

    /// Bookmaker regions requested from The Odds API
    #[arg(long, env = "ODDS_API_REGIONS", default_value = "eu")]
    pub odds_api_regions: String,

    /// Sport key fetched when no league is tracked
    #[arg(long, env = "DEFAULT_SPORT", default_value = "soccer_epl")]
    pub default_sport: String,

    /// Comma-separated sport keys, fetched and merged in this order
    #[arg(long, env = "TRACKED_LEAGUES", value_delimiter = ',')]
    pub tracked_leagues: Vec<String>,

    /// Directory holding odds-<league>.json files for the fixtures feed
    #[arg(long, env = "FIXTURES_DIR", default_value = "fixtures")]
    pub fixtures_dir: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// Time limit for one league fetch attempt in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "30")]
    pub fetch_timeout_secs: u64,

    /// Attempts per league before the batch fails
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "3")]
    pub max_attempts: u32,

    /// Base wait between attempts in milliseconds (jitter is added)
    #[arg(long, env = "RETRY_WAIT_MS", default_value = "500")]
    pub retry_wait_ms: u64,

    /// Only fixtures starting within this many hours are ingested
    #[arg(long, env = "INGESTION_HORIZON_HOURS", default_value = "12")]
    pub ingestion_horizon_hours: u64,

    /// Comma-separated bookmaker keys trusted for the closing line, most trusted first
    #[arg(long, env = "CLOSING_PRIORITY_BOOKMAKERS", value_delimiter = ',')]
    pub closing_priority_bookmakers: Vec<String>,

    /// Minimum edge for a value bet (e.g. 0.015 = 1.5%)
    #[arg(long, env = "MIN_EV", default_value = "0.015")]
    pub min_ev: f64,

    /// EV target of the second minimum-odds figure (e.g. 0.02 = 2%)
    #[arg(long, env = "SECONDARY_EV", default_value = "0.02")]
    pub secondary_ev: f64,

    /// Fractional Kelly multiplier (0.0–1.0)
    #[arg(long, env = "KELLY_CAP", default_value = "0.5")]
    pub kelly_cap: f64,

    /// Seconds between ingestion batches
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeedSource {
    /// Live odds from The Odds API
    TheOddsApi,
    /// Offline JSON fixtures
    Fixtures,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch odds and detect value bets on a schedule
    Ingest {
        /// Run a single batch and exit
        #[arg(long)]
        once: bool,
    },
    /// Print the odds summary of one event as JSON
    Event {
        /// Internal event id
        id: i64,
    },
    /// List detected value bets as JSON, newest first
    ValueBets(ValueBetArgs),
    /// Record, settle and review placed bets
    #[command(subcommand)]
    Bet(BetCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum BetCommand {
    /// Record a bet as PENDING and print it as JSON
    Place(PlaceBetArgs),
    /// Mark a bet as WON, LOST or back to PENDING
    Settle {
        /// Bet id
        id: i64,
        result: BetResult,
    },
    /// Print average closing-line value and ROI over all bets as JSON
    Clv,
}

#[derive(Args, Debug, Clone)]
pub struct PlaceBetArgs {
    #[arg(long)]
    pub event_id: i64,

    #[arg(long, default_value = "ONE_X_TWO")]
    pub market: MarketType,

    /// ONE / DRAW / TWO (or 1 / X / 2)
    #[arg(long)]
    pub outcome: Outcome,

    /// Amount staked, rounded to 2 places
    #[arg(long)]
    pub stake: f64,

    /// Decimal odds taken, rounded to 3 places
    #[arg(long)]
    pub odds: f64,

    /// Internal bookmaker id the bet was placed with
    #[arg(long)]
    pub bookmaker_id: Option<i64>,
}

impl PlaceBetArgs {
    pub fn request(&self) -> NewBet {
        NewBet {
            event_id: self.event_id,
            market: self.market,
            outcome: self.outcome,
            stake: self.stake,
            odds_taken: self.odds,
            bookmaker_id: self.bookmaker_id,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ValueBetArgs {
    /// Case-insensitive substring of the competition name
    #[arg(long)]
    pub league: Option<String>,

    #[arg(long)]
    pub market: Option<MarketType>,

    /// ONE / DRAW / TWO (or 1 / X / 2)
    #[arg(long)]
    pub outcome: Option<Outcome>,

    #[arg(long)]
    pub min_edge: Option<f64>,

    #[arg(long)]
    pub event_id: Option<i64>,

    /// Only events starting at or after this RFC 3339 instant
    #[arg(long)]
    pub start_from: Option<DateTime<Utc>>,

    /// Only events starting at or before this RFC 3339 instant
    #[arg(long)]
    pub start_to: Option<DateTime<Utc>>,

    #[arg(long, default_value = "50")]
    pub limit: i64,

    #[arg(long, default_value = "0")]
    pub offset: i64,
}

impl ValueBetArgs {
    pub fn filter(&self) -> ValueBetFilter {
        ValueBetFilter {
            league: self.league.clone(),
            market: self.market,
            outcome: self.outcome,
            min_edge: self.min_edge,
            event_id: self.event_id,
            start_from: self.start_from,
            start_to: self.start_to,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// One year of fixtures is far beyond what any odds feed lists.
const MAX_HORIZON_HOURS: u64 = 24 * 366;

fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feed == FeedSource::TheOddsApi
            && self.odds_api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            anyhow::bail!("ODDS_API_KEY is required for the the-odds-api feed. Use --feed fixtures for offline runs.");
        }
        if !self.min_ev.is_finite() || self.min_ev < 0.0 {
            anyhow::bail!("min_ev must be a non-negative number");
        }
        if !self.secondary_ev.is_finite() || self.secondary_ev < 0.0 {
            anyhow::bail!("secondary_ev must be a non-negative number");
        }
        if !(self.kelly_cap > 0.0 && self.kelly_cap <= 1.0) {
            anyhow::bail!("kelly_cap must be in (0.0, 1.0]");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.ingestion_horizon_hours == 0 || self.ingestion_horizon_hours > MAX_HORIZON_HOURS {
            anyhow::bail!("ingestion_horizon_hours must be in 1..={MAX_HORIZON_HOURS}");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if self.request_timeout_secs == 0 || self.fetch_timeout_secs == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        Ok(())
    }

    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            horizon: Duration::from_secs(self.ingestion_horizon_hours.saturating_mul(60 * 60)),
            priority_bookmakers: clean_list(&self.closing_priority_bookmakers),
            min_ev: self.min_ev,
            secondary_ev: self.secondary_ev,
            kelly_cap: self.kelly_cap,
        }
    }

    pub fn the_odds_api_settings(&self) -> TheOddsApiSettings {
        TheOddsApiSettings {
            base_url: self.odds_api_url.clone(),
            api_key: self.odds_api_key.clone().unwrap_or_default(),
            regions: self.odds_api_regions.clone(),
            leagues: clean_list(&self.tracked_leagues),
            default_sport: self.default_sport.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_attempts: self.max_attempts,
            retry_wait: Duration::from_millis(self.retry_wait_ms),
        }
    }
}
