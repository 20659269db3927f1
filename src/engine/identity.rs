use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::db::models::{Event, ProviderQuote};
use crate::db::OddsStore;
use crate::error::QuoteRejection;

const UNKNOWN_LEAGUE: &str = "unknown_league";
const UNKNOWN_TEAMS: &str = "unknown_teams";
const UNKNOWN_MATCHUP: &str = "Unknown matchup";

/// Fixture attributes derived from a single quote.
#[derive(Debug, Clone, PartialEq)]
pub struct EventIdentity {
    pub external_id: String,
    pub name: String,
    pub competition: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub start_time: DateTime<Utc>,
}

fn clean(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

/// `league|team_a_team_b|start`, lower-cased, with literal placeholders for
/// a missing or blank league or team list. Only a missing start time leaves
/// the quote without an identity. Quotes merge only if league label, team
/// order and start instant all agree.
pub fn external_event_id(quote: &ProviderQuote) -> Result<String, QuoteRejection> {
    let start = quote.start_time.ok_or(QuoteRejection::MissingStartTime)?;
    let league = quote
        .league
        .as_deref()
        .and_then(clean)
        .map(str::to_lowercase)
        .unwrap_or_else(|| UNKNOWN_LEAGUE.to_string());
    let teams: Vec<String> = quote
        .teams
        .iter()
        .filter_map(|t| clean(t))
        .map(str::to_lowercase)
        .collect();
    let teams = if teams.is_empty() {
        UNKNOWN_TEAMS.to_string()
    } else {
        teams.join("_")
    };
    Ok(format!(
        "{league}|{teams}|{}",
        start.to_rfc3339_opts(SecondsFormat::Secs, true)
    ))
}

/// "Home vs Away", a lone team name, or a placeholder.
pub fn event_name(teams: &[&str]) -> String {
    match teams {
        [] => UNKNOWN_MATCHUP.to_string(),
        [only] => only.to_string(),
        [home, away, ..] => format!("{home} vs {away}"),
    }
}

impl EventIdentity {
    pub fn from_quote(quote: &ProviderQuote) -> Result<Self, QuoteRejection> {
        let external_id = external_event_id(quote)?;
        let start_time = quote.start_time.ok_or(QuoteRejection::MissingStartTime)?;
        let teams: Vec<&str> = quote.teams.iter().filter_map(|t| clean(t)).collect();
        Ok(EventIdentity {
            external_id,
            name: event_name(&teams),
            competition: quote.league.as_deref().and_then(clean).map(String::from),
            home_team: teams.first().map(|t| t.to_string()),
            away_team: teams.get(1).map(|t| t.to_string()),
            start_time,
        })
    }
}

/// Identities already resolved in the current batch. Dropped with the batch.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    events: HashMap<String, Event>,
    bookmakers: HashMap<String, i64>,
}

impl ResolutionCache {
    pub fn events_resolved(&self) -> usize {
        self.events.len()
    }
}

/// Binds external identifiers to stored events and bookmakers, creating
/// them on first sight.
pub struct IdentityResolver<'a, S: OddsStore + ?Sized> {
    store: &'a S,
    cache: ResolutionCache,
}

impl<'a, S: OddsStore + ?Sized> IdentityResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        IdentityResolver {
            store,
            cache: ResolutionCache::default(),
        }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Find or create the event. An existing row is written back only when
    /// one of its descriptive fields changed.
    pub fn resolve_event(&mut self, identity: &EventIdentity, now: DateTime<Utc>) -> Result<Event> {
        if let Some(event) = self.cache.events.get(&identity.external_id) {
            return Ok(event.clone());
        }

        let event = match self
            .store
            .find_event_by_external_id(&identity.external_id)
            .with_context(|| format!("looking up event {}", identity.external_id))?
        {
            Some(mut existing) => {
                let changed = existing.name != identity.name
                    || existing.competition != identity.competition
                    || existing.start_time != identity.start_time
                    || existing.home_team != identity.home_team
                    || existing.away_team != identity.away_team;
                if changed {
                    existing.name = identity.name.clone();
                    existing.competition = identity.competition.clone();
                    existing.start_time = identity.start_time;
                    existing.home_team = identity.home_team.clone();
                    existing.away_team = identity.away_team.clone();
                    existing.updated_at = now;
                    self.store
                        .update_event(&existing)
                        .with_context(|| format!("updating event {}", identity.external_id))?;
                    debug!(external_id = %identity.external_id, "event updated");
                }
                existing
            }
            None => {
                let created = self
                    .store
                    .insert_event(&Event {
                        id: None,
                        external_id: identity.external_id.clone(),
                        name: identity.name.clone(),
                        competition: identity.competition.clone(),
                        home_team: identity.home_team.clone(),
                        away_team: identity.away_team.clone(),
                        start_time: identity.start_time,
                        created_at: now,
                        updated_at: now,
                    })
                    .with_context(|| format!("creating event {}", identity.external_id))?;
                debug!(external_id = %identity.external_id, id = ?created.id, "event created");
                created
            }
        };

        self.cache
            .events
            .insert(identity.external_id.clone(), event.clone());
        Ok(event)
    }

    /// Stored id of the bookmaker, created on first sighting.
    pub fn resolve_bookmaker(&mut self, external_key: &str) -> Result<i64> {
        if let Some(&id) = self.cache.bookmakers.get(external_key) {
            return Ok(id);
        }
        let bookmaker = match self.store.find_bookmaker(external_key)? {
            Some(b) => b,
            None => self
                .store
                .upsert_bookmaker(external_key)
                .with_context(|| format!("creating bookmaker {external_key}"))?,
        };
        self.cache
            .bookmakers
            .insert(external_key.to_string(), bookmaker.id);
        Ok(bookmaker.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MarketType, Outcome};
    use crate::db::Database;
    use chrono::TimeZone;

    fn quote(league: &str, teams: &[&str], bookmaker: &str) -> ProviderQuote {
        ProviderQuote {
            league: Some(league.into()),
            teams: teams.iter().map(|t| t.to_string()).collect(),
            start_time: Some(Utc.with_ymd_and_hms(2026, 3, 14, 15, 0, 0).unwrap()),
            market: MarketType::OneXTwo,
            outcome: Outcome::One,
            bookmaker_key: bookmaker.into(),
            decimal_odds: 2.0,
        }
    }

    #[test]
    fn test_external_id_format() {
        let q = quote(" English Premier League ", &["Arsenal", " Chelsea"], "pinnacle");
        assert_eq!(
            external_event_id(&q).unwrap(),
            "english premier league|arsenal_chelsea|2026-03-14T15:00:00Z"
        );
    }

    #[test]
    fn test_external_id_placeholders() {
        let mut q = quote("", &[], "pinnacle");
        q.league = None;
        assert_eq!(
            external_event_id(&q).unwrap(),
            "unknown_league|unknown_teams|2026-03-14T15:00:00Z"
        );
    }

    #[test]
    fn test_blank_parts_fall_back_to_placeholders() {
        let q = quote("   ", &[" ", ""], "pinnacle");
        assert_eq!(
            external_event_id(&q).unwrap(),
            "unknown_league|unknown_teams|2026-03-14T15:00:00Z"
        );
        let identity = EventIdentity::from_quote(&q).unwrap();
        assert_eq!(identity.competition, None);
        assert_eq!(identity.name, "Unknown matchup");
    }

    #[test]
    fn test_missing_start_time_is_rejected() {
        let mut q = quote("EPL", &["A", "B"], "x");
        q.start_time = None;
        assert_eq!(external_event_id(&q), Err(QuoteRejection::MissingStartTime));
        assert_eq!(EventIdentity::from_quote(&q), Err(QuoteRejection::MissingStartTime));
    }

    #[test]
    fn test_event_name_variants() {
        assert_eq!(event_name(&["Arsenal", "Chelsea"]), "Arsenal vs Chelsea");
        assert_eq!(event_name(&["Arsenal"]), "Arsenal");
        assert_eq!(event_name(&[]), "Unknown matchup");
    }

    #[test]
    fn test_same_fixture_merges_across_bookmakers() {
        let db = Database::open(":memory:").unwrap();
        let now = Utc::now();
        db.transaction(|repo| {
            let mut resolver = IdentityResolver::new(repo);
            let a = EventIdentity::from_quote(&quote("EPL", &["Arsenal", "Chelsea"], "pinnacle")).unwrap();
            let b = EventIdentity::from_quote(&quote("EPL", &["Arsenal", "Chelsea"], "bet365")).unwrap();
            let reversed =
                EventIdentity::from_quote(&quote("EPL", &["Chelsea", "Arsenal"], "bet365")).unwrap();

            let first = resolver.resolve_event(&a, now)?;
            let second = resolver.resolve_event(&b, now)?;
            let third = resolver.resolve_event(&reversed, now)?;
            assert_eq!(first.id, second.id);
            assert_ne!(first.id, third.id);
            assert_eq!(resolver.cache().events_resolved(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_existing_event_updated_only_on_change() {
        let db = Database::open(":memory:").unwrap();
        let created_at = Utc::now() - chrono::Duration::days(1);
        let original = db
            .transaction(|repo| {
                let identity = EventIdentity::from_quote(&quote("epl", &["A", "B"], "x")).unwrap();
                IdentityResolver::new(repo).resolve_event(&identity, created_at)
            })
            .unwrap();

        // Same label, unchanged fields: no write
        let later = Utc::now();
        let same = db
            .transaction(|repo| {
                let identity = EventIdentity::from_quote(&quote("epl", &["A", "B"], "x")).unwrap();
                IdentityResolver::new(repo).resolve_event(&identity, later)
            })
            .unwrap();
        assert_eq!(same.updated_at, original.updated_at);

        // Competition case differs: same identity, field rewritten
        let updated = db
            .transaction(|repo| {
                let identity = EventIdentity::from_quote(&quote("EPL", &["A", "B"], "x")).unwrap();
                IdentityResolver::new(repo).resolve_event(&identity, later)
            })
            .unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.competition.as_deref(), Some("EPL"));
        assert_eq!(updated.updated_at, later);

        let stored = db.read(|repo| repo.get_event(original.id.unwrap())).unwrap().unwrap();
        assert_eq!(stored.competition.as_deref(), Some("EPL"));
    }

    #[test]
    fn test_bookmaker_resolution_is_cached_and_idempotent() {
        let db = Database::open(":memory:").unwrap();
        let first = db
            .transaction(|repo| {
                let mut resolver = IdentityResolver::new(repo);
                let a = resolver.resolve_bookmaker("pinnacle")?;
                let b = resolver.resolve_bookmaker("pinnacle")?;
                assert_eq!(a, b);
                Ok(a)
            })
            .unwrap();
        let again = db
            .transaction(|repo| IdentityResolver::new(repo).resolve_bookmaker("pinnacle"))
            .unwrap();
        assert_eq!(first, again);
    }
}
