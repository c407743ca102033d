//! Listing store and lifecycle guard.
//!
//! `Active` is the only state a listing can leave. Every write that
//! depends on the listing still being active is a conditional update
//! (`... WHERE status = 'active'`); zero affected rows means someone else
//! got there first and the caller must back off.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use super::{decode_label, from_millis, to_millis, Result, Tx};
use crate::types::{
    BidId, ClubId, Listing, ListingId, ListingKind, ListingStatus, MarketError, PlayerId,
};

const COLUMNS: &str = "id, player_id, selling_club_id, kind, status, starting_price,
    current_lead_amount, leader_bid_id, window_start, window_end, buyer_club_id,
    winning_bid_id, settled_at, settlement_note, settlement_attempts";

fn listing_from_row(row: &SqliteRow) -> std::result::Result<Listing, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let settled_at: Option<i64> = row.try_get("settled_at")?;

    Ok(Listing {
        id: row.try_get("id")?,
        player_id: row.try_get("player_id")?,
        selling_club_id: row.try_get("selling_club_id")?,
        kind: decode_label(&kind)?,
        status: decode_label(&status)?,
        starting_price: row.try_get("starting_price")?,
        current_lead_amount: row.try_get("current_lead_amount")?,
        leader_bid_id: row.try_get("leader_bid_id")?,
        window_start: from_millis(row.try_get("window_start")?)?,
        window_end: from_millis(row.try_get("window_end")?)?,
        buyer_club_id: row.try_get("buyer_club_id")?,
        winning_bid_id: row.try_get("winning_bid_id")?,
        settled_at: settled_at.map(from_millis).transpose()?,
        settlement_note: row.try_get("settlement_note")?,
        settlement_attempts: row.try_get("settlement_attempts")?,
    })
}

fn listings_from_rows(rows: &[SqliteRow]) -> Result<Vec<Listing>> {
    Ok(rows
        .iter()
        .map(listing_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Parameters of a new listing.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub player_id: PlayerId,
    pub selling_club_id: ClubId,
    pub kind: ListingKind,
    pub starting_price: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// How a listing leaves `Active`.
#[derive(Debug, Clone)]
pub struct Closing {
    pub status: ListingStatus,
    pub buyer_club_id: Option<ClubId>,
    pub winning_bid_id: Option<BidId>,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

impl Closing {
    pub fn expired(at: DateTime<Utc>) -> Self {
        Self {
            status: ListingStatus::Expired,
            buyer_club_id: None,
            winning_bid_id: None,
            note: None,
            at,
        }
    }

    pub fn cancelled(reason: String, at: DateTime<Utc>) -> Self {
        Self {
            status: ListingStatus::Cancelled,
            buyer_club_id: None,
            winning_bid_id: None,
            note: Some(reason),
            at,
        }
    }

    pub fn completed(buyer: ClubId, bid: BidId, at: DateTime<Utc>) -> Self {
        Self {
            status: ListingStatus::Completed,
            buyer_club_id: Some(buyer),
            winning_bid_id: Some(bid),
            note: None,
            at,
        }
    }
}

/// Insert a listing unless the player already has an active one. The
/// existence check and the insert are one statement.
pub async fn open(tx: &mut Tx<'_>, new: &NewListing) -> Result<Listing> {
    if new.starting_price < 0 {
        return Err(MarketError::InvalidAmount(new.starting_price));
    }

    let result = sqlx::query(
        "INSERT INTO listings
             (player_id, selling_club_id, kind, status, starting_price,
              current_lead_amount, window_start, window_end)
         SELECT ?1, ?2, ?3, 'active', ?4, 0, ?5, ?6
         WHERE NOT EXISTS (
             SELECT 1 FROM listings WHERE player_id = ?1 AND status = 'active'
         )",
    )
    .bind(new.player_id)
    .bind(new.selling_club_id)
    .bind(new.kind.as_str())
    .bind(new.starting_price)
    .bind(to_millis(new.window_start))
    .bind(to_millis(new.window_end))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(MarketError::AlreadyListed {
            player_id: new.player_id,
        });
    }

    let id = result.last_insert_rowid();
    info!(
        listing_id = id,
        player_id = new.player_id,
        seller = new.selling_club_id,
        kind = %new.kind,
        starting_price = new.starting_price,
        window_end = %new.window_end.to_rfc3339(),
        "Listing opened"
    );

    fetch(&mut **tx, id)
        .await?
        .ok_or(MarketError::ListingNotFound(id))
}

pub async fn fetch(conn: &mut SqliteConnection, id: ListingId) -> Result<Option<Listing>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM listings WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(listing_from_row).transpose()?)
}

pub async fn active_for_player(
    conn: &mut SqliteConnection,
    player_id: PlayerId,
) -> Result<Vec<Listing>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM listings
         WHERE player_id = ?1 AND status = 'active'
         ORDER BY id"
    ))
    .bind(player_id)
    .fetch_all(&mut *conn)
    .await?;
    listings_from_rows(&rows)
}

/// Active listings whose window has elapsed, oldest deadline first.
pub async fn due(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Vec<Listing>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM listings
         WHERE status = 'active' AND window_end <= ?1
         ORDER BY window_end, id"
    ))
    .bind(to_millis(now))
    .fetch_all(&mut *conn)
    .await?;
    listings_from_rows(&rows)
}

/// Outgoing transfer-list listings of `club_id` that already have a
/// leading bid and end by `horizon`, i.e. squad slots about to free up.
pub async fn pending_departures(
    conn: &mut SqliteConnection,
    club_id: ClubId,
    horizon: DateTime<Utc>,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM listings
         WHERE selling_club_id = ?1
           AND status = 'active'
           AND kind = ?2
           AND leader_bid_id IS NOT NULL
           AND window_end <= ?3",
    )
    .bind(club_id)
    .bind(ListingKind::TransferList.as_str())
    .bind(to_millis(horizon))
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Take the write lock on an active listing for the rest of the
/// transaction. Returns false if it is no longer active.
pub async fn claim(tx: &mut Tx<'_>, id: ListingId) -> Result<bool> {
    let result = sqlx::query("UPDATE listings SET status = status WHERE id = ?1 AND status = 'active'")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Move an active listing to a terminal state. Returns false, and changes
/// nothing, if the listing had already left `Active`.
pub async fn close(tx: &mut Tx<'_>, id: ListingId, closing: &Closing) -> Result<bool> {
    debug_assert!(closing.status.is_terminal());

    let result = sqlx::query(
        "UPDATE listings
         SET status = ?1, buyer_club_id = ?2, winning_bid_id = ?3,
             settlement_note = ?4, settled_at = ?5
         WHERE id = ?6 AND status = 'active'",
    )
    .bind(closing.status.as_str())
    .bind(closing.buyer_club_id)
    .bind(closing.winning_bid_id)
    .bind(closing.note.as_deref())
    .bind(to_millis(closing.at))
    .bind(id)
    .execute(&mut **tx)
    .await?;

    let won = result.rows_affected() == 1;
    if won {
        info!(listing_id = id, status = %closing.status, note = ?closing.note, "Listing closed");
    } else {
        debug!(listing_id = id, "Listing already closed");
    }
    Ok(won)
}

/// Count a failed settlement pass on an active listing and keep the
/// error as its note. Returns the attempts so far, or `None` if the
/// listing is no longer active.
pub async fn record_failure(tx: &mut Tx<'_>, id: ListingId, note: &str) -> Result<Option<i64>> {
    let result = sqlx::query(
        "UPDATE listings
         SET settlement_attempts = settlement_attempts + 1, settlement_note = ?1
         WHERE id = ?2 AND status = 'active'",
    )
    .bind(note)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }

    let attempts: i64 = sqlx::query_scalar("SELECT settlement_attempts FROM listings WHERE id = ?1")
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(Some(attempts))
}

/// Raise the leading amount if the listing is open at `now` and `amount`
/// beats the current minimum. Returns false if the guard did not hold.
pub async fn raise_lead(
    tx: &mut Tx<'_>,
    id: ListingId,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE listings SET current_lead_amount = ?1
         WHERE id = ?2
           AND status = 'active'
           AND window_end > ?3
           AND ?1 > 0
           AND ((leader_bid_id IS NULL AND ?1 >= starting_price)
                OR (leader_bid_id IS NOT NULL AND ?1 > current_lead_amount))",
    )
    .bind(amount)
    .bind(id)
    .bind(to_millis(now))
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Point the listing at its new leading bid.
pub async fn set_leader(tx: &mut Tx<'_>, id: ListingId, bid_id: BidId) -> Result<()> {
    sqlx::query("UPDATE listings SET leader_bid_id = ?1 WHERE id = ?2")
        .bind(bid_id)
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
