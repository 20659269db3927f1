use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::db::models::{Event, Outcome, OddsSnapshot, ProviderQuote, ValueOpportunity};
use crate::db::{Database, OddsStore};
use crate::engine::closing_line::{in_closing_window, ClosingCandidates};
use crate::engine::identity::{EventIdentity, IdentityResolver};
use crate::engine::normalization::{aggregate, remove_vig, ProbabilityMap};
use crate::engine::probability::ProbabilityEstimator;
use crate::engine::value::{round_odds, round_probability, ValueDetector};
use crate::engine::{offer_best, BestQuote, EventMarketKey};
use crate::error::QuoteRejection;
use crate::feed::OddsProvider;
use crate::notify::Notifier;

/// Tunables for one ingestion batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSettings {
    /// How far ahead of now fixtures are fetched
    pub horizon: Duration,
    /// Bookmakers trusted for the closing line, most trusted first
    pub priority_bookmakers: Vec<String>,
    /// Minimum edge for an opportunity to be emitted
    pub min_ev: f64,
    /// EV target of the second minimum-odds figure
    pub secondary_ev: f64,
    /// Fractional Kelly multiplier
    pub kelly_cap: f64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        IngestionSettings {
            horizon: Duration::from_secs(12 * 60 * 60),
            priority_bookmakers: Vec::new(),
            min_ev: 0.015,
            secondary_ev: 0.02,
            kelly_cap: 0.5,
        }
    }
}

impl IngestionSettings {
    fn detector(&self) -> ValueDetector {
        ValueDetector {
            min_ev: self.min_ev,
            secondary_ev: self.secondary_ev,
            kelly_cap: self.kelly_cap,
        }
    }
}

/// Counters reported at the end of every batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub markets_processed: usize,
    pub quotes_received: usize,
    pub quotes_skipped: usize,
    pub snapshots_written: usize,
    pub closing_lines_marked: usize,
    pub opportunities: usize,
    pub duration: Duration,
}

/// Result of one batch: consensus per (event, market), emitted opportunities
/// and counters.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub consensus: BTreeMap<EventMarketKey, ProbabilityMap>,
    pub opportunities: Vec<ValueOpportunity>,
    pub report: BatchReport,
}

/// Drives fetch → persist → detect → notify for one fetch cycle.
pub struct IngestionEngine {
    settings: IngestionSettings,
    db: Database,
    provider: Arc<dyn OddsProvider>,
    estimator: Box<dyn ProbabilityEstimator>,
    notifier: Arc<dyn Notifier>,
}

impl IngestionEngine {
    pub fn new(
        settings: IngestionSettings,
        db: Database,
        provider: Arc<dyn OddsProvider>,
        estimator: Box<dyn ProbabilityEstimator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        IngestionEngine {
            settings,
            db,
            provider,
            estimator,
            notifier,
        }
    }

    /// Run one batch. Every write of the batch is committed together or not
    /// at all; subscribers hear about opportunities only after the commit.
    pub async fn run_batch(&self) -> Result<BatchOutcome> {
        let started = Instant::now();
        let quotes = self
            .provider
            .fetch_quotes(self.settings.horizon)
            .await
            .with_context(|| format!("fetching quotes from {}", self.provider.name()))?;

        if quotes.is_empty() {
            info!(provider = self.provider.name(), "Feed returned no quotes; nothing to do");
            return Ok(BatchOutcome {
                report: BatchReport {
                    duration: started.elapsed(),
                    ..Default::default()
                },
                ..Default::default()
            });
        }

        let captured_at = Utc::now();
        let mut outcome = self
            .db
            .transaction(|repo| {
                process_quotes(
                    repo,
                    &quotes,
                    captured_at,
                    &self.settings,
                    self.estimator.as_ref(),
                )
            })
            .context("ingestion batch rolled back")?;
        outcome.report.duration = started.elapsed();

        if !outcome.opportunities.is_empty() {
            self.notifier.publish(&outcome.opportunities);
        }

        for (key, consensus) in &outcome.consensus {
            debug!(event_id = key.event_id, market = %key.market, ?consensus, "Consensus");
        }
        let r = &outcome.report;
        info!(
            provider = self.provider.name(),
            estimator = self.estimator.name(),
            markets = r.markets_processed,
            quotes = r.quotes_received,
            skipped = r.quotes_skipped,
            snapshots = r.snapshots_written,
            closing = r.closing_lines_marked,
            opportunities = r.opportunities,
            duration_ms = r.duration.as_millis() as u64,
            "Ingestion batch complete"
        );
        Ok(outcome)
    }
}

/// A quote that passed validation, bound to stored identities.
struct ResolvedQuote<'q> {
    quote: &'q ProviderQuote,
    key: EventMarketKey,
    bookmaker_key: &'q str,
    bookmaker_id: i64,
    odds: f64,
    start_time: DateTime<Utc>,
}

fn validate(quote: &ProviderQuote) -> Result<(EventIdentity, &str, f64), QuoteRejection> {
    let bookmaker = quote.bookmaker_key.trim();
    if bookmaker.is_empty() {
        return Err(QuoteRejection::MissingBookmaker);
    }
    let odds = round_odds(quote.decimal_odds)
        .filter(|&o| o > 1.0)
        .ok_or(QuoteRejection::InvalidOdds(quote.decimal_odds))?;
    let identity = EventIdentity::from_quote(quote)?;
    Ok((identity, bookmaker, odds))
}

/// The storage half of a batch, run inside one transaction.
///
/// Resolves identities, persists snapshots with closing-line flags, computes
/// the consensus per (event, market) and persists the opportunities that
/// clear the minimum EV. Any storage error aborts the whole batch.
pub fn process_quotes<S: OddsStore + ?Sized>(
    store: &S,
    quotes: &[ProviderQuote],
    captured_at: DateTime<Utc>,
    settings: &IngestionSettings,
    estimator: &dyn ProbabilityEstimator,
) -> Result<BatchOutcome> {
    let mut report = BatchReport {
        quotes_received: quotes.len(),
        ..Default::default()
    };
    let mut resolver = IdentityResolver::new(store);

    // ── Resolve ───────────────────────────────────────────────────────────────
    let mut resolved = Vec::with_capacity(quotes.len());
    let mut events: BTreeMap<i64, Event> = BTreeMap::new();
    for quote in quotes {
        let (identity, bookmaker_key, odds) = match validate(quote) {
            Ok(v) => v,
            Err(reason) => {
                warn!(
                    bookmaker = %quote.bookmaker_key,
                    league = ?quote.league,
                    teams = ?quote.teams,
                    "Skipping quote: {reason}"
                );
                report.quotes_skipped += 1;
                continue;
            }
        };
        let event = resolver.resolve_event(&identity, captured_at)?;
        let event_id = event
            .id
            .ok_or_else(|| anyhow!("event {} has no id after resolve", event.external_id))?;
        let bookmaker_id = resolver.resolve_bookmaker(bookmaker_key)?;
        let start_time = event.start_time;
        events.entry(event_id).or_insert(event);

        resolved.push(ResolvedQuote {
            quote,
            key: EventMarketKey {
                event_id,
                market: quote.market,
            },
            bookmaker_key,
            bookmaker_id,
            odds,
            start_time,
        });
    }

    // ── Accumulate ────────────────────────────────────────────────────────────
    let mut snapshots = Vec::with_capacity(resolved.len());
    let mut implied: BTreeMap<EventMarketKey, BTreeMap<&str, ProbabilityMap>> = BTreeMap::new();
    let mut best: BTreeMap<(EventMarketKey, Outcome), BestQuote> = BTreeMap::new();
    let mut candidates = ClosingCandidates::new();

    for r in &resolved {
        let outcome = r.quote.outcome;
        // Raw feed price; the rounded one is only stored and compared
        let probability = 1.0 / r.quote.decimal_odds;

        if in_closing_window(captured_at, r.start_time) {
            candidates.add(r.key, outcome, r.bookmaker_key, r.odds, snapshots.len());
        }
        snapshots.push(OddsSnapshot {
            id: None,
            event_id: r.key.event_id,
            market: r.key.market,
            outcome,
            bookmaker: r.bookmaker_key.to_string(),
            odds: r.odds,
            implied_probability: round_probability(probability),
            captured_at,
            closing_line: false,
        });

        implied
            .entry(r.key)
            .or_default()
            .entry(r.bookmaker_key)
            .or_default()
            .insert(outcome, probability);

        offer_best(
            &mut best,
            (r.key, outcome),
            BestQuote {
                odds: r.odds,
                bookmaker_key: r.bookmaker_key.to_string(),
                bookmaker_id: Some(r.bookmaker_id),
            },
        );
    }

    debug!(
        quotes = resolved.len(),
        events = resolver.cache().events_resolved(),
        "Quotes resolved"
    );

    // ── Closing line & snapshots ──────────────────────────────────────────────
    for idx in candidates.select(&settings.priority_bookmakers, &best) {
        snapshots[idx].closing_line = true;
        report.closing_lines_marked += 1;
    }
    report.snapshots_written = store
        .insert_snapshots(&snapshots)
        .context("persisting odds snapshots")?;

    // ── Normalize, estimate, detect ───────────────────────────────────────────
    let detector = settings.detector();
    let mut consensus_by_market = BTreeMap::new();
    let mut opportunities = Vec::new();

    for (key, by_bookmaker) in &implied {
        let Some(event) = events.get(&key.event_id) else {
            continue;
        };
        let fair: Vec<ProbabilityMap> = by_bookmaker.values().map(remove_vig).collect();
        let consensus = aggregate(&fair);
        let true_probabilities = estimator.estimate(event, key.market, &consensus);

        for (&outcome, &p) in &true_probabilities {
            let Some(quote) = best.get(&(*key, outcome)) else {
                continue;
            };
            if !detector.passes(quote.odds, p) {
                continue;
            }
            let opp = detector.detect(key.event_id, key.market, outcome, quote, p, captured_at);
            debug!(
                event = %event.name,
                outcome = %outcome,
                bookmaker = %opp.source,
                odds = opp.odds,
                edge = opp.edge,
                "Value opportunity"
            );
            opportunities.push(opp);
        }

        consensus_by_market.insert(*key, consensus);
        report.markets_processed += 1;
    }

    report.opportunities = store
        .insert_opportunities(&opportunities)
        .context("persisting value opportunities")?;

    Ok(BatchOutcome {
        consensus: consensus_by_market,
        opportunities,
        report,
    })
}
