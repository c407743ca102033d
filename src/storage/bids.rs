//! Bid ledger: ordered bids per listing with a single leader.
//!
//! Placing a bid raises the listing's lead amount through a guarded
//! update, then clears the old leader flag, records the new bid as
//! leader and repoints the listing, all in the caller's transaction.
//! The guarded update is the first write, so concurrent bidders on the
//! same listing are serialized by it and a reader never sees zero or two
//! leaders.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use super::{clubs, from_millis, listings, to_millis, Result, Tx};
use crate::types::{Bid, ClubId, Listing, ListingId, MarketError};

fn bid_from_row(row: &SqliteRow) -> std::result::Result<Bid, sqlx::Error> {
    Ok(Bid {
        id: row.try_get("id")?,
        listing_id: row.try_get("listing_id")?,
        club_id: row.try_get("club_id")?,
        amount: row.try_get("amount")?,
        is_leader: row.try_get("is_leader")?,
        submitted_at: from_millis(row.try_get("submitted_at")?)?,
    })
}

/// Record a bid on `listing_id` by `club_id`.
pub async fn place(
    tx: &mut Tx<'_>,
    listing_id: ListingId,
    club_id: ClubId,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Bid> {
    if !listings::raise_lead(tx, listing_id, amount, now).await? {
        return Err(rejection(tx, listing_id, club_id, amount, now).await?);
    }

    let listing = listings::fetch(&mut **tx, listing_id)
        .await?
        .ok_or(MarketError::ListingNotFound(listing_id))?;
    if listing.selling_club_id == club_id {
        return Err(MarketError::SelfBidNotAllowed(club_id));
    }
    if clubs::fetch_club(&mut **tx, club_id).await?.is_none() {
        return Err(MarketError::ClubNotFound(club_id));
    }

    let cleared = sqlx::query("UPDATE bids SET is_leader = 0 WHERE listing_id = ?1 AND is_leader = 1")
        .bind(listing_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    let bid_id = sqlx::query(
        "INSERT INTO bids (listing_id, club_id, amount, is_leader, submitted_at)
         VALUES (?1, ?2, ?3, 1, ?4)",
    )
    .bind(listing_id)
    .bind(club_id)
    .bind(amount)
    .bind(to_millis(now))
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();

    listings::set_leader(tx, listing_id, bid_id).await?;

    info!(
        listing_id,
        bid_id,
        club_id,
        amount,
        outbid = cleared > 0,
        "Bid accepted"
    );

    Ok(Bid {
        id: bid_id,
        listing_id,
        club_id,
        amount,
        is_leader: true,
        submitted_at: now,
    })
}

/// Work out why the lead guard refused a bid.
async fn rejection(
    tx: &mut Tx<'_>,
    listing_id: ListingId,
    club_id: ClubId,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<MarketError> {
    let listing: Listing = listings::fetch(&mut **tx, listing_id)
        .await?
        .ok_or(MarketError::ListingNotFound(listing_id))?;

    let err = if listing.selling_club_id == club_id {
        MarketError::SelfBidNotAllowed(club_id)
    } else if !listing.is_open_at(now) {
        MarketError::ListingNotActive(listing_id)
    } else {
        MarketError::BidTooLow {
            amount,
            minimum: listing.minimum_bid(),
        }
    };
    debug!(listing_id, club_id, amount, error = %err, "Bid rejected");
    Ok(err)
}

/// The current leading bid, if any.
pub async fn leader(conn: &mut SqliteConnection, listing_id: ListingId) -> Result<Option<Bid>> {
    let row = sqlx::query(
        "SELECT id, listing_id, club_id, amount, is_leader, submitted_at
         FROM bids WHERE listing_id = ?1 AND is_leader = 1",
    )
    .bind(listing_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(bid_from_row).transpose()?)
}

/// All bids on a listing in acceptance order.
pub async fn for_listing(conn: &mut SqliteConnection, listing_id: ListingId) -> Result<Vec<Bid>> {
    let rows = sqlx::query(
        "SELECT id, listing_id, club_id, amount, is_leader, submitted_at
         FROM bids WHERE listing_id = ?1 ORDER BY id",
    )
    .bind(listing_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .iter()
        .map(bid_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
