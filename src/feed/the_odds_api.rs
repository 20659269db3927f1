use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::provider::OddsProvider;
use crate::db::models::{MarketType, Outcome, ProviderQuote};
use crate::error::FeedError;

const PROVIDER: &str = "TheOddsApi";

/// Connection and retry settings for [`TheOddsApi`].
#[derive(Debug, Clone)]
pub struct TheOddsApiSettings {
    pub base_url: String,
    pub api_key: String,
    pub regions: String,
    /// Sport keys to fetch, in merge order
    pub leagues: Vec<String>,
    /// Used when no league is tracked
    pub default_sport: String,
    pub request_timeout: Duration,
    /// Limit on one league attempt, including the body read
    pub fetch_timeout: Duration,
    pub max_attempts: u32,
    pub retry_wait: Duration,
}

/// Odds feed backed by The Odds API v4.
/// Docs: <https://the-odds-api.com/liveapi/guides/v4/>
pub struct TheOddsApi {
    http: Client,
    settings: TheOddsApiSettings,
}

impl TheOddsApi {
    pub fn new(settings: TheOddsApiSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(TheOddsApi { http, settings })
    }

    /// Tracked leagues trimmed and de-duplicated in configured order, or the
    /// default sport when none are set.
    fn league_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for league in &self.settings.leagues {
            let league = league.trim();
            if !league.is_empty() && !keys.iter().any(|k| k == league) {
                keys.push(league.to_string());
            }
        }
        if keys.is_empty() {
            keys.push(self.settings.default_sport.clone());
        }
        keys
    }

    fn odds_url(&self, league: &str, commence_to: DateTime<Utc>) -> Result<Url> {
        let base = self.settings.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/sports/{league}/odds"))
            .with_context(|| format!("invalid odds API base url '{base}'"))?;
        url.query_pairs_mut()
            .append_pair("apiKey", &self.settings.api_key)
            .append_pair("regions", &self.settings.regions)
            .append_pair("markets", "h2h")
            .append_pair("oddsFormat", "decimal")
            .append_pair("dateFormat", "iso")
            .append_pair(
                "commenceTimeTo",
                &commence_to.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        Ok(url)
    }

    async fn fetch_league(&self, league: &str, commence_to: DateTime<Utc>) -> Result<Vec<ProviderQuote>> {
        let url = self.odds_url(league, commence_to)?;
        debug!(league, "Fetching odds");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("{PROVIDER} request for '{league}' failed"))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
            return Err(FeedError::Status {
                provider: PROVIDER.into(),
                league: league.into(),
                status,
                body,
            }
            .into());
        }

        let events: Vec<OddsApiEvent> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse {PROVIDER} response for '{league}'"))?;
        let (quotes, dropped) = map_events(&events, league);
        info!(
            league,
            events = events.len(),
            quotes = quotes.len(),
            dropped,
            "Odds received"
        );
        Ok(quotes)
    }

    /// One league with a per-attempt time limit and jittered retries.
    async fn fetch_league_with_retry(
        &self,
        league: &str,
        commence_to: DateTime<Utc>,
    ) -> Result<Vec<ProviderQuote>> {
        let attempts = self.settings.max_attempts.max(1);
        let mut last: anyhow::Error = anyhow::anyhow!("no attempt made");

        for attempt in 1..=attempts {
            let res = tokio::time::timeout(
                self.settings.fetch_timeout,
                self.fetch_league(league, commence_to),
            )
            .await;
            match res {
                Ok(Ok(quotes)) => return Ok(quotes),
                Ok(Err(e)) => last = e,
                Err(_) => {
                    last = FeedError::Timeout {
                        provider: PROVIDER.into(),
                        league: league.into(),
                        timeout: self.settings.fetch_timeout,
                    }
                    .into()
                }
            }

            if attempt < attempts {
                let base = self.settings.retry_wait;
                let jitter_range = base.as_millis() as u64 / 4;
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_range));
                warn!(
                    league,
                    attempt,
                    "Odds fetch failed: {last:#}; retrying in {:?}",
                    base + jitter
                );
                tokio::time::sleep(base + jitter).await;
            }
        }

        Err(FeedError::Exhausted {
            provider: PROVIDER.into(),
            league: league.into(),
            attempts,
            last: last.into(),
        }
        .into())
    }
}

#[async_trait]
impl OddsProvider for TheOddsApi {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_quotes(&self, horizon: Duration) -> Result<Vec<ProviderQuote>> {
        let commence_to = Utc::now()
            + chrono::Duration::from_std(horizon).context("ingestion horizon out of range")?;
        let leagues = self.league_keys();

        // Leagues are fetched concurrently but merged in configured order
        let results = futures_util::future::join_all(
            leagues
                .iter()
                .map(|league| self.fetch_league_with_retry(league, commence_to)),
        )
        .await;

        let mut quotes = Vec::new();
        for (league, result) in leagues.iter().zip(results) {
            let league_quotes = result.with_context(|| format!("league '{league}'"))?;
            quotes.extend(league_quotes);
        }
        info!(leagues = leagues.len(), quotes = quotes.len(), "Aggregated odds");
        Ok(quotes)
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OddsApiEvent {
    sport_title: Option<String>,
    commence_time: Option<DateTime<Utc>>,
    #[serde(default)]
    teams: Vec<String>,
    home_team: Option<String>,
    away_team: Option<String>,
    #[serde(default)]
    bookmakers: Vec<OddsApiBookmaker>,
}

#[derive(Debug, Deserialize)]
struct OddsApiBookmaker {
    key: Option<String>,
    #[serde(default)]
    markets: Vec<OddsApiMarket>,
}

#[derive(Debug, Deserialize)]
struct OddsApiMarket {
    key: Option<String>,
    #[serde(default)]
    outcomes: Vec<OddsApiOutcome>,
}

#[derive(Debug, Deserialize)]
struct OddsApiOutcome {
    name: Option<String>,
    price: Option<f64>,
}

fn normalize_name(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl OddsApiEvent {
    fn home(&self) -> Option<&str> {
        self.home_team
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// The explicit away team, else the first listed team that is not home.
    fn away(&self) -> Option<&str> {
        if let Some(away) = self.away_team.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Some(away);
        }
        let home = self.home();
        self.teams
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty() && home.map_or(true, |h| !t.eq_ignore_ascii_case(h)))
    }

    /// Home team first.
    fn team_list(&self) -> Vec<String> {
        match (self.home(), self.away()) {
            (Some(home), Some(away)) => vec![home.to_string(), away.to_string()],
            _ => self
                .teams
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    fn outcome(&self, name: Option<&str>) -> Option<Outcome> {
        let name = normalize_name(name)?;
        match name.as_str() {
            "draw" | "tie" => return Some(Outcome::Draw),
            "home" => return Some(Outcome::One),
            "away" => return Some(Outcome::Two),
            _ => {}
        }
        if normalize_name(self.home()).as_deref() == Some(name.as_str()) {
            Some(Outcome::One)
        } else if normalize_name(self.away()).as_deref() == Some(name.as_str()) {
            Some(Outcome::Two)
        } else {
            None
        }
    }
}

fn map_market(key: Option<&str>) -> Option<MarketType> {
    match key?.trim().to_lowercase().as_str() {
        "h2h" => Some(MarketType::OneXTwo),
        _ => None,
    }
}

/// Flatten feed events into quotes, returning how many entries were dropped.
/// Unknown markets and outcomes, blank bookmaker keys and missing prices are
/// logged and skipped.
fn map_events(events: &[OddsApiEvent], league_key: &str) -> (Vec<ProviderQuote>, usize) {
    let mut quotes = Vec::new();
    let mut dropped = 0;
    for event in events {
        let teams = event.team_list();
        let league = event
            .sport_title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| league_key.to_string());

        for bookmaker in &event.bookmakers {
            let Some(bookmaker_key) = bookmaker
                .key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
            else {
                let outcomes: usize = bookmaker.markets.iter().map(|m| m.outcomes.len()).sum();
                warn!(league = %league, ?teams, outcomes, "Dropping odds with no bookmaker key");
                dropped += outcomes;
                continue;
            };
            for market in &bookmaker.markets {
                let Some(market_type) = map_market(market.key.as_deref()) else {
                    debug!(
                        bookmaker = bookmaker_key,
                        market = ?market.key,
                        outcomes = market.outcomes.len(),
                        "Dropping unmapped market"
                    );
                    dropped += market.outcomes.len();
                    continue;
                };
                for o in &market.outcomes {
                    let (Some(outcome), Some(price)) = (event.outcome(o.name.as_deref()), o.price)
                    else {
                        warn!(
                            bookmaker = bookmaker_key,
                            market = ?market.key,
                            outcome = ?o.name,
                            price = ?o.price,
                            "Dropping unmapped outcome or missing price"
                        );
                        dropped += 1;
                        continue;
                    };
                    quotes.push(ProviderQuote {
                        league: Some(league.clone()),
                        teams: teams.clone(),
                        start_time: event.commence_time,
                        market: market_type,
                        outcome,
                        bookmaker_key: bookmaker_key.to_string(),
                        decimal_odds: price,
                    });
                }
            }
        }
    }
    (quotes, dropped)
}
