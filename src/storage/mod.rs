//! Persistence layer.
//!
//! All market state lives in one SQLite database behind a `sqlx` pool.
//! The schema below declares every relation and relationship up front and
//! is applied idempotently at startup. Money is stored as integers,
//! instants as Unix milliseconds, calendar dates as `YYYY-MM-DD` text.
//!
//! Operations that mutate more than one row take a `&mut Tx` so the
//! caller's transaction is the unit of work; read helpers take a plain
//! connection and work both inside and outside a transaction.

pub mod bids;
pub mod clubs;
pub mod contracts;
pub mod ledger;
pub mod listings;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::MarketError;

pub type Db = SqlitePool;
pub type Tx<'a> = Transaction<'a, Sqlite>;
pub type Result<T> = std::result::Result<T, MarketError>;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS clubs (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT    NOT NULL,
        balance     INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS players (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT    NOT NULL,
        club_id     INTEGER REFERENCES clubs(id)
    )",
    "CREATE INDEX IF NOT EXISTS players_by_club ON players(club_id)",
    "CREATE TABLE IF NOT EXISTS contracts (
        player_id   INTEGER PRIMARY KEY REFERENCES players(id),
        club_id     INTEGER NOT NULL REFERENCES clubs(id),
        wage        INTEGER NOT NULL,
        expiry_date TEXT    NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS contracts_by_expiry ON contracts(expiry_date)",
    "CREATE TABLE IF NOT EXISTS listings (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        player_id           INTEGER NOT NULL REFERENCES players(id),
        selling_club_id     INTEGER NOT NULL REFERENCES clubs(id),
        kind                TEXT    NOT NULL,
        status              TEXT    NOT NULL,
        starting_price      INTEGER NOT NULL,
        current_lead_amount INTEGER NOT NULL DEFAULT 0,
        leader_bid_id       INTEGER,
        window_start        INTEGER NOT NULL,
        window_end          INTEGER NOT NULL,
        buyer_club_id       INTEGER REFERENCES clubs(id),
        winning_bid_id      INTEGER,
        settled_at          INTEGER,
        settlement_note     TEXT,
        settlement_attempts INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS listings_due ON listings(status, window_end)",
    "CREATE INDEX IF NOT EXISTS listings_by_player ON listings(player_id, status)",
    "CREATE TABLE IF NOT EXISTS bids (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        listing_id   INTEGER NOT NULL REFERENCES listings(id),
        club_id      INTEGER NOT NULL REFERENCES clubs(id),
        amount       INTEGER NOT NULL,
        is_leader    INTEGER NOT NULL DEFAULT 0,
        submitted_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS bids_by_listing ON bids(listing_id, is_leader)",
    "CREATE TABLE IF NOT EXISTS ledger_entries (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        from_club_id INTEGER REFERENCES clubs(id),
        to_club_id   INTEGER REFERENCES clubs(id),
        amount       INTEGER NOT NULL,
        reason       TEXT    NOT NULL,
        created_at   INTEGER NOT NULL
    )",
];

/// Open (creating if needed) the database at `url` and apply the schema.
pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Db> {
    use anyhow::Context;

    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database url: {url}"))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let db = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {url}"))?;

    migrate(&db).await.context("Failed to apply schema")?;
    info!(url, max_connections, "Database ready");
    Ok(db)
}

/// A private in-memory database. Pinned to a single connection that never
/// expires, since every new SQLite memory connection is a fresh database.
pub async fn connect_in_memory() -> Result<Db> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&db).await?;
    Ok(db)
}

/// Apply the schema. Safe to run repeatedly.
pub async fn migrate(db: &Db) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db).await?;
    }

    // Listings tables created before failed passes were counted.
    let counted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('listings') WHERE name = 'settlement_attempts'",
    )
    .fetch_one(db)
    .await?;
    if counted == 0 {
        sqlx::query(
            "ALTER TABLE listings ADD COLUMN settlement_attempts INTEGER NOT NULL DEFAULT 0",
        )
        .execute(db)
        .await?;
        info!("Added listings.settlement_attempts");
    }

    debug!(statements = SCHEMA.len(), "Schema applied");
    Ok(())
}

// ---------------------------------------------------------------------------
// Column encoding
// ---------------------------------------------------------------------------

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| sqlx::Error::Decode(format!("timestamp out of range: {ms}").into()))
}

pub(crate) fn date_to_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn date_from_text(text: &str) -> std::result::Result<NaiveDate, sqlx::Error> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(crate) fn decode_label<T>(text: &str) -> std::result::Result<T, sqlx::Error>
where
    T: FromStr<Err = anyhow::Error>,
{
    text.parse::<T>().map_err(|e| sqlx::Error::Decode(e.into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
