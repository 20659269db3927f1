use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::provider::OddsProvider;
use crate::db::models::{MarketType, Outcome, ProviderQuote};

/// Most fixtures returned by one fetch.
pub const MAX_EVENTS_PER_FETCH: usize = 20;

#[derive(Debug, Clone, Deserialize)]
struct FixtureEvent {
    league: Option<String>,
    home_team: String,
    away_team: String,
    start_time: DateTime<Utc>,
    #[serde(default)]
    bookmakers: Vec<FixtureBookmaker>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureBookmaker {
    bookmaker_key: String,
    #[serde(default)]
    odds: BTreeMap<Outcome, f64>,
}

impl FixtureEvent {
    fn quotes(&self) -> impl Iterator<Item = ProviderQuote> + '_ {
        let teams = vec![self.home_team.clone(), self.away_team.clone()];
        self.bookmakers.iter().flat_map(move |b| {
            let teams = teams.clone();
            b.odds.iter().map(move |(&outcome, &price)| ProviderQuote {
                league: self.league.clone(),
                teams: teams.clone(),
                start_time: Some(self.start_time),
                market: MarketType::OneXTwo,
                outcome,
                bookmaker_key: b.bookmaker_key.clone(),
                decimal_odds: price,
            })
        })
    }
}

/// Offline feed reading `odds-<league>.json` files from a directory.
///
/// Files are read once at construction, in file-name order, and never
/// change afterwards.
#[derive(Debug)]
pub struct FixtureProvider {
    leagues: Vec<(String, Vec<FixtureEvent>)>,
}

impl FixtureProvider {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading fixtures directory {}", dir.display()))?
        {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(league) = name.strip_prefix("odds-").and_then(|n| n.strip_suffix(".json")) {
                files.push((league.to_string(), path.clone()));
            }
        }
        files.sort();

        let mut leagues = Vec::with_capacity(files.len());
        for (league, path) in files {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading fixture {}", path.display()))?;
            let events: Vec<FixtureEvent> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing fixture {}", path.display()))?;
            debug!(league = %league, events = events.len(), "Loaded odds fixture");
            leagues.push((league, events));
        }
        info!(dir = %dir.display(), leagues = leagues.len(), "Fixture feed ready");
        Ok(FixtureProvider { leagues })
    }

    pub fn league_keys(&self) -> impl Iterator<Item = &str> {
        self.leagues.iter().map(|(l, _)| l.as_str())
    }
}

#[async_trait]
impl OddsProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixtures"
    }

    async fn fetch_quotes(&self, horizon: Duration) -> Result<Vec<ProviderQuote>> {
        let cutoff = Utc::now()
            + chrono::Duration::from_std(horizon).context("ingestion horizon out of range")?;
        Ok(self
            .leagues
            .iter()
            .flat_map(|(_, events)| events.iter())
            .filter(|e| e.start_time <= cutoff)
            .take(MAX_EVENTS_PER_FETCH)
            .flat_map(|e| e.quotes())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "valuebet-fixtures-{}",
            rand::thread_rng().gen::<u64>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn event_json(home: &str, away: &str, start: DateTime<Utc>) -> String {
        format!(
            r#"{{"league":"EPL","home_team":"{home}","away_team":"{away}","start_time":"{}",
                "bookmakers":[{{"bookmaker_key":"pinnacle","odds":{{"ONE":2.1,"DRAW":3.4,"TWO":3.6}}}},
                              {{"bookmaker_key":"bet365","odds":{{"ONE":2.05}}}}]}}"#,
            start.to_rfc3339()
        )
    }

    #[tokio::test]
    async fn test_load_and_fetch_in_file_order() {
        let dir = temp_dir();
        let soon = Utc::now() + chrono::Duration::hours(2);
        let later = Utc::now() + chrono::Duration::days(3);
        std::fs::write(
            dir.join("odds-soccer_spain_la_liga.json"),
            format!("[{}]", event_json("Real", "Barca", soon)),
        )
        .unwrap();
        std::fs::write(
            dir.join("odds-soccer_epl.json"),
            format!("[{},{}]", event_json("Arsenal", "Chelsea", soon), event_json("Leeds", "Everton", later)),
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let feed = FixtureProvider::load(&dir).unwrap();
        assert_eq!(
            feed.league_keys().collect::<Vec<_>>(),
            vec!["soccer_epl", "soccer_spain_la_liga"]
        );

        let quotes = feed.fetch_quotes(Duration::from_secs(12 * 3600)).await.unwrap();
        // Leeds v Everton is outside the horizon
        assert_eq!(quotes.len(), 8);
        assert_eq!(quotes[0].teams, vec!["Arsenal".to_string(), "Chelsea".to_string()]);
        assert_eq!(quotes[0].outcome, Outcome::One);
        assert_eq!(quotes[0].bookmaker_key, "pinnacle");
        assert_eq!(quotes[4].teams[0], "Real");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_caps_events() {
        let dir = temp_dir();
        let soon = Utc::now() + chrono::Duration::hours(1);
        let events: Vec<String> = (0..25)
            .map(|i| event_json(&format!("Home{i}"), &format!("Away{i}"), soon))
            .collect();
        std::fs::write(dir.join("odds-big.json"), format!("[{}]", events.join(","))).unwrap();

        let feed = FixtureProvider::load(&dir).unwrap();
        let quotes = feed.fetch_quotes(Duration::from_secs(3600 * 2)).await.unwrap();
        assert_eq!(quotes.len(), MAX_EVENTS_PER_FETCH * 4);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bad_fixture_fails_load() {
        let dir = temp_dir();
        std::fs::write(dir.join("odds-broken.json"), "{ not json").unwrap();
        assert!(FixtureProvider::load(&dir).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
