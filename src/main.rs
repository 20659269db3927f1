use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod db;
mod engine;
mod error;
mod feed;
mod notify;

use config::{BetCommand, Command, Config, FeedSource};
use db::Database;
use engine::{bets, query, IngestionEngine, MarketConsensus};
use feed::{FixtureProvider, OddsProvider, TheOddsApi};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path))?;
    info!("Database opened: {}", config.database_path);

    match &config.command {
        Command::Ingest { once } => run_ingest(&config, db, *once).await,
        Command::Event { id } => {
            let view = db.read(|repo| query::event_odds(repo, &MarketConsensus, *id))?;
            match view {
                Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                None => anyhow::bail!("event {id} not found"),
            }
            Ok(())
        }
        Command::ValueBets(args) => {
            let bets = db.read(|repo| query::value_bets(repo, &args.filter()))?;
            println!("{}", serde_json::to_string_pretty(&bets)?);
            Ok(())
        }
        Command::Bet(cmd) => run_bet(&db, cmd),
    }
}

fn run_bet(db: &Database, cmd: &BetCommand) -> Result<()> {
    let output = match cmd {
        BetCommand::Place(args) => {
            let bet = db.transaction(|repo| bets::place_bet(repo, &args.request(), Utc::now()))?;
            info!(
                id = ?bet.id,
                event_id = bet.event_id,
                outcome = %bet.outcome,
                stake = bet.stake,
                odds = bet.odds_taken,
                "Bet recorded"
            );
            serde_json::to_string_pretty(&bet)?
        }
        BetCommand::Settle { id, result } => {
            let bet = db.transaction(|repo| bets::settle_bet(repo, *id, *result, Utc::now()))?;
            info!(id, result = %bet.result, "Bet settled");
            serde_json::to_string_pretty(&bet)?
        }
        BetCommand::Clv => {
            let summary = db.read(|repo| bets::clv_summary(repo))?;
            serde_json::to_string_pretty(&summary)?
        }
    };
    println!("{output}");
    Ok(())
}

fn build_provider(config: &Config) -> Result<Arc<dyn OddsProvider>> {
    let provider: Arc<dyn OddsProvider> = match config.feed {
        FeedSource::TheOddsApi => Arc::new(TheOddsApi::new(config.the_odds_api_settings())?),
        FeedSource::Fixtures => {
            let fixtures = FixtureProvider::load(Path::new(&config.fixtures_dir))?;
            info!("Fixture leagues: {:?}", fixtures.league_keys().collect::<Vec<_>>());
            Arc::new(fixtures)
        }
    };
    Ok(provider)
}

async fn run_ingest(config: &Config, db: Database, once: bool) -> Result<()> {
    let provider = build_provider(config)?;
    info!("Odds feed: {}", provider.name());

    // Downstream subscriber: log every published value bet
    let (notifier, mut rx) = notify::channel(256);
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            for bet in batch {
                info!(
                    event_id = bet.event_id,
                    outcome = %bet.outcome,
                    bookmaker = %bet.source,
                    odds = bet.odds,
                    edge = bet.edge,
                    kelly = bet.kelly_fraction,
                    "💰 Value bet"
                );
            }
        }
    });

    let engine = IngestionEngine::new(
        config.ingestion_settings(),
        db,
        provider,
        Box::new(MarketConsensus),
        Arc::new(notifier),
    );

    if once {
        engine.run_batch().await?;
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Ingestion scheduler started (interval={}s)",
        config.poll_interval_secs
    );
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = engine.run_batch().await {
                    error!("Ingestion batch failed: {:#}", e);
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}
