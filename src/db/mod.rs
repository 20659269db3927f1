use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Repository contract the ingestion pipeline and read path are written against.
///
/// Every method runs on whatever connection the implementor wraps; inside
/// [`Database::transaction`] that is the open transaction, so all writes of a
/// batch commit or roll back together.
pub trait OddsStore {
    fn find_event_by_external_id(&self, external_id: &str) -> Result<Option<Event>>;
    fn get_event(&self, id: i64) -> Result<Option<Event>>;
    /// Insert a new event and return it with its assigned id.
    fn insert_event(&self, event: &Event) -> Result<Event>;
    fn update_event(&self, event: &Event) -> Result<()>;

    fn find_bookmaker(&self, external_key: &str) -> Result<Option<Bookmaker>>;
    /// Insert the bookmaker if unseen and return the stored row.
    fn upsert_bookmaker(&self, external_key: &str) -> Result<Bookmaker>;

    fn insert_snapshots(&self, snapshots: &[OddsSnapshot]) -> Result<usize>;
    fn insert_opportunities(&self, opportunities: &[ValueOpportunity]) -> Result<usize>;

    /// Most recent closing-line snapshot for (event, market, outcome).
    fn latest_closing_snapshot(
        &self,
        event_id: i64,
        market: MarketType,
        outcome: Outcome,
    ) -> Result<Option<OddsSnapshot>>;
    /// Newest snapshots first.
    fn recent_snapshots(&self, event_id: i64, limit: i64) -> Result<Vec<OddsSnapshot>>;
    fn list_opportunities(&self, filter: &ValueBetFilter) -> Result<Vec<ValueOpportunity>>;

    fn get_bookmaker(&self, id: i64) -> Result<Option<Bookmaker>>;
    /// Insert a new bet and return it with its assigned id.
    fn insert_bet(&self, bet: &Bet) -> Result<Bet>;
    fn get_bet(&self, id: i64) -> Result<Option<Bet>>;
    /// Returns false when no bet has this id.
    fn set_bet_result(&self, id: i64, result: BetResult, updated_at: DateTime<Utc>) -> Result<bool>;
    /// Bets in any of `results`, oldest first.
    fn bets_by_result(&self, results: &[BetResult]) -> Result<Vec<Bet>>;
}

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` gives a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run `f` inside a single SQLite transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls back every write `f` made.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Repo<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = {
            let repo = Repo { conn: &tx };
            f(&repo)?
        };
        tx.commit()?;
        Ok(out)
    }

    /// Run read-only work against the connection outside a transaction.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Repo<'_>) -> Result<T>,
    {
        let conn = self.lock()?;
        let repo = Repo { conn: &conn };
        f(&repo)
    }
}

/// [`OddsStore`] over a borrowed connection or open transaction.
pub struct Repo<'a> {
    conn: &'a Connection,
}

impl OddsStore for Repo<'_> {
    // ── Events ────────────────────────────────────────────────────────────────

    fn find_event_by_external_id(&self, external_id: &str) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(
                &format!("{EVENT_COLUMNS} WHERE external_id = ?1"),
                params![external_id],
                map_event,
            )
            .optional()?;
        Ok(event)
    }

    fn get_event(&self, id: i64) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(&format!("{EVENT_COLUMNS} WHERE id = ?1"), params![id], map_event)
            .optional()?;
        Ok(event)
    }

    fn insert_event(&self, event: &Event) -> Result<Event> {
        self.conn.execute(
            "INSERT INTO events (
                external_id, name, competition, home_team, away_team,
                start_time, created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                event.external_id,
                event.name,
                event.competition,
                event.home_team,
                event.away_team,
                event.start_time,
                event.created_at,
                event.updated_at,
            ],
        )?;
        Ok(Event {
            id: Some(self.conn.last_insert_rowid()),
            ..event.clone()
        })
    }

    fn update_event(&self, event: &Event) -> Result<()> {
        let id = event
            .id
            .ok_or_else(|| anyhow!("cannot update unsaved event {}", event.external_id))?;
        self.conn.execute(
            "UPDATE events SET name=?1, competition=?2, home_team=?3, away_team=?4,
                               start_time=?5, updated_at=?6
             WHERE id=?7",
            params![
                event.name,
                event.competition,
                event.home_team,
                event.away_team,
                event.start_time,
                event.updated_at,
                id,
            ],
        )?;
        Ok(())
    }

    // ── Bookmakers ────────────────────────────────────────────────────────────

    fn find_bookmaker(&self, external_key: &str) -> Result<Option<Bookmaker>> {
        let bookmaker = self
            .conn
            .query_row(
                "SELECT id, external_key FROM bookmakers WHERE external_key = ?1",
                params![external_key],
                |row| {
                    Ok(Bookmaker {
                        id: row.get(0)?,
                        external_key: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(bookmaker)
    }

    fn upsert_bookmaker(&self, external_key: &str) -> Result<Bookmaker> {
        self.conn.execute(
            "INSERT INTO bookmakers (external_key, created_at) VALUES (?1, ?2)
             ON CONFLICT(external_key) DO NOTHING",
            params![external_key, Utc::now()],
        )?;
        self.find_bookmaker(external_key)?
            .ok_or_else(|| anyhow!("bookmaker '{external_key}' missing after upsert"))
    }

    // ── Snapshots & opportunities ─────────────────────────────────────────────

    fn insert_snapshots(&self, snapshots: &[OddsSnapshot]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO odds_snapshots (
                event_id, market_type, outcome, bookmaker, odds,
                implied_probability, captured_at, closing_line
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        )?;
        for s in snapshots {
            stmt.execute(params![
                s.event_id,
                s.market,
                s.outcome,
                s.bookmaker,
                s.odds,
                s.implied_probability,
                s.captured_at,
                s.closing_line,
            ])?;
        }
        Ok(snapshots.len())
    }

    fn insert_opportunities(&self, opportunities: &[ValueOpportunity]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO value_opportunities (
                event_id, market_type, outcome, odds, true_probability, edge,
                bookmaker_id, source, min_odds_ev0, min_odds_ev2, kelly_fraction,
                created_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        )?;
        for o in opportunities {
            stmt.execute(params![
                o.event_id,
                o.market,
                o.outcome,
                o.odds,
                o.true_probability,
                o.edge,
                o.bookmaker_id,
                o.source,
                o.min_odds_ev0,
                o.min_odds_ev2,
                o.kelly_fraction,
                o.created_at,
            ])?;
        }
        Ok(opportunities.len())
    }

    fn latest_closing_snapshot(
        &self,
        event_id: i64,
        market: MarketType,
        outcome: Outcome,
    ) -> Result<Option<OddsSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                &format!(
                    "{SNAPSHOT_COLUMNS}
                     WHERE event_id = ?1 AND market_type = ?2 AND outcome = ?3
                       AND closing_line = 1
                     ORDER BY captured_at DESC, id DESC LIMIT 1"
                ),
                params![event_id, market, outcome],
                map_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn recent_snapshots(&self, event_id: i64, limit: i64) -> Result<Vec<OddsSnapshot>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SNAPSHOT_COLUMNS} WHERE event_id = ?1
             ORDER BY captured_at DESC, id DESC LIMIT ?2"
        ))?;
        let snapshots = stmt
            .query_map(params![event_id, limit], map_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    fn list_opportunities(&self, filter: &ValueBetFilter) -> Result<Vec<ValueOpportunity>> {
        let mut sql = String::from(
            "SELECT v.id, v.event_id, v.market_type, v.outcome, v.odds, v.true_probability,
                    v.edge, v.bookmaker_id, v.source, v.min_odds_ev0, v.min_odds_ev2,
                    v.kelly_fraction, v.created_at
             FROM value_opportunities v JOIN events e ON e.id = v.event_id
             WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(league) = filter.league.as_deref().filter(|l| !l.trim().is_empty()) {
            args.push(Box::new(format!("%{}%", league.trim().to_lowercase())));
            sql.push_str(&format!(" AND lower(e.competition) LIKE ?{}", args.len()));
        }
        if let Some(market) = filter.market {
            args.push(Box::new(market));
            sql.push_str(&format!(" AND v.market_type = ?{}", args.len()));
        }
        if let Some(outcome) = filter.outcome {
            args.push(Box::new(outcome));
            sql.push_str(&format!(" AND v.outcome = ?{}", args.len()));
        }
        if let Some(min_edge) = filter.min_edge {
            args.push(Box::new(min_edge));
            sql.push_str(&format!(" AND v.edge >= ?{}", args.len()));
        }
        if let Some(event_id) = filter.event_id {
            args.push(Box::new(event_id));
            sql.push_str(&format!(" AND v.event_id = ?{}", args.len()));
        }
        if let Some(from) = filter.start_from {
            args.push(Box::new(from));
            sql.push_str(&format!(" AND e.start_time >= ?{}", args.len()));
        }
        if let Some(to) = filter.start_to {
            args.push(Box::new(to));
            sql.push_str(&format!(" AND e.start_time <= ?{}", args.len()));
        }
        args.push(Box::new(filter.limit));
        args.push(Box::new(filter.offset));
        sql.push_str(&format!(
            " ORDER BY v.created_at DESC, v.id DESC LIMIT ?{} OFFSET ?{}",
            args.len() - 1,
            args.len()
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), map_opportunity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Bets ──────────────────────────────────────────────────────────────────

    fn get_bookmaker(&self, id: i64) -> Result<Option<Bookmaker>> {
        let bookmaker = self
            .conn
            .query_row(
                "SELECT id, external_key FROM bookmakers WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Bookmaker {
                        id: row.get(0)?,
                        external_key: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(bookmaker)
    }

    fn insert_bet(&self, bet: &Bet) -> Result<Bet> {
        self.conn.execute(
            "INSERT INTO bets (
                event_id, market_type, outcome, stake, odds_taken, bookmaker_id,
                result, created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                bet.event_id,
                bet.market,
                bet.outcome,
                bet.stake,
                bet.odds_taken,
                bet.bookmaker_id,
                bet.result,
                bet.created_at,
                bet.updated_at,
            ],
        )?;
        Ok(Bet {
            id: Some(self.conn.last_insert_rowid()),
            ..bet.clone()
        })
    }

    fn get_bet(&self, id: i64) -> Result<Option<Bet>> {
        let bet = self
            .conn
            .query_row(&format!("{BET_COLUMNS} WHERE id = ?1"), params![id], map_bet)
            .optional()?;
        Ok(bet)
    }

    fn set_bet_result(&self, id: i64, result: BetResult, updated_at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE bets SET result = ?1, updated_at = ?2 WHERE id = ?3",
            params![result, updated_at, id],
        )?;
        Ok(changed > 0)
    }

    fn bets_by_result(&self, results: &[BetResult]) -> Result<Vec<Bet>> {
        if results.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=results.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let mut stmt = self.conn.prepare(&format!(
            "{BET_COLUMNS} WHERE result IN ({placeholders}) ORDER BY created_at, id"
        ))?;
        let bets = stmt
            .query_map(params_from_iter(results.iter()), map_bet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bets)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const EVENT_COLUMNS: &str = "SELECT id, external_id, name, competition, home_team, away_team,
        start_time, created_at, updated_at FROM events";

const SNAPSHOT_COLUMNS: &str = "SELECT id, event_id, market_type, outcome, bookmaker, odds,
        implied_probability, captured_at, closing_line FROM odds_snapshots";

const BET_COLUMNS: &str = "SELECT id, event_id, market_type, outcome, stake, odds_taken,
        bookmaker_id, result, created_at, updated_at FROM bets";

fn map_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        competition: row.get(3)?,
        home_team: row.get(4)?,
        away_team: row.get(5)?,
        start_time: row.get::<_, DateTime<Utc>>(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_snapshot(row: &rusqlite::Row) -> rusqlite::Result<OddsSnapshot> {
    Ok(OddsSnapshot {
        id: row.get(0)?,
        event_id: row.get(1)?,
        market: row.get(2)?,
        outcome: row.get(3)?,
        bookmaker: row.get(4)?,
        odds: row.get(5)?,
        implied_probability: row.get(6)?,
        captured_at: row.get(7)?,
        closing_line: row.get(8)?,
    })
}

fn map_opportunity(row: &rusqlite::Row) -> rusqlite::Result<ValueOpportunity> {
    Ok(ValueOpportunity {
        id: row.get(0)?,
        event_id: row.get(1)?,
        market: row.get(2)?,
        outcome: row.get(3)?,
        odds: row.get(4)?,
        true_probability: row.get(5)?,
        edge: row.get(6)?,
        bookmaker_id: row.get(7)?,
        source: row.get(8)?,
        min_odds_ev0: row.get(9)?,
        min_odds_ev2: row.get(10)?,
        kelly_fraction: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn map_bet(row: &rusqlite::Row) -> rusqlite::Result<Bet> {
    Ok(Bet {
        id: row.get(0)?,
        event_id: row.get(1)?,
        market: row.get(2)?,
        outcome: row.get(3)?,
        stake: row.get(4)?,
        odds_taken: row.get(5)?,
        bookmaker_id: row.get(6)?,
        result: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT    NOT NULL UNIQUE,
    name        TEXT    NOT NULL,
    competition TEXT,
    home_team   TEXT,
    away_team   TEXT,
    start_time  TEXT    NOT NULL,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS bookmakers (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    external_key TEXT    NOT NULL UNIQUE,
    created_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS odds_snapshots (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id            INTEGER NOT NULL,
    market_type         TEXT    NOT NULL,
    outcome             TEXT    NOT NULL,
    bookmaker           TEXT    NOT NULL,
    odds                REAL    NOT NULL,
    implied_probability REAL    NOT NULL,
    captured_at         TEXT    NOT NULL,
    closing_line        INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (event_id) REFERENCES events(id)
);

CREATE TABLE IF NOT EXISTS value_opportunities (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id         INTEGER NOT NULL,
    market_type      TEXT    NOT NULL,
    outcome          TEXT    NOT NULL,
    odds             REAL    NOT NULL,
    true_probability REAL    NOT NULL,
    edge             REAL    NOT NULL,
    bookmaker_id     INTEGER,
    source           TEXT    NOT NULL,
    min_odds_ev0     REAL,
    min_odds_ev2     REAL,
    kelly_fraction   REAL    NOT NULL,
    created_at       TEXT    NOT NULL,
    FOREIGN KEY (event_id) REFERENCES events(id),
    FOREIGN KEY (bookmaker_id) REFERENCES bookmakers(id)
);

CREATE TABLE IF NOT EXISTS bets (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id     INTEGER NOT NULL,
    market_type  TEXT    NOT NULL,
    outcome      TEXT    NOT NULL,
    stake        REAL    NOT NULL,
    odds_taken   REAL    NOT NULL,
    bookmaker_id INTEGER,
    result       TEXT    NOT NULL DEFAULT 'PENDING',
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL,
    FOREIGN KEY (event_id) REFERENCES events(id),
    FOREIGN KEY (bookmaker_id) REFERENCES bookmakers(id)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_event ON odds_snapshots(event_id, captured_at);
CREATE INDEX IF NOT EXISTS idx_snapshots_closing
    ON odds_snapshots(event_id, market_type, outcome, closing_line);
CREATE INDEX IF NOT EXISTS idx_opportunities_event ON value_opportunities(event_id);
CREATE INDEX IF NOT EXISTS idx_bets_result ON bets(result);
"#;
