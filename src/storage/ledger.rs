//! Ledger: club balances and the audit trail.
//!
//! Every balance mutation happens inside the caller's transaction and
//! appends one `ledger_entries` row naming source, destination, amount
//! and reason. A transfer debits with a guarded update
//! (`balance >= amount`) so funds can never go negative, then credits;
//! if anything after the debit fails, dropping the transaction rolls both
//! sides back.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tracing::{info, warn};

use super::{clubs, from_millis, to_millis, Db, Result, Tx};
use crate::types::{ClubId, LedgerEntry, MarketError};

/// Move `amount` from one club to another.
pub async fn transfer(
    tx: &mut Tx<'_>,
    from: ClubId,
    to: ClubId,
    amount: i64,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    if amount < 0 {
        return Err(MarketError::InvalidAmount(amount));
    }

    withdraw(tx, from, amount).await?;
    deposit(tx, to, amount).await?;
    record(tx, Some(from), Some(to), amount, reason, at).await?;

    info!(from, to, amount, reason, "Funds transferred");
    Ok(())
}

/// Unconditional revenue: money entering the economy.
pub async fn credit(
    tx: &mut Tx<'_>,
    club_id: ClubId,
    amount: i64,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    if amount < 0 {
        return Err(MarketError::InvalidAmount(amount));
    }
    deposit(tx, club_id, amount).await?;
    record(tx, None, Some(club_id), amount, reason, at).await?;
    info!(to = club_id, amount, reason, "Club credited");
    Ok(())
}

/// Money leaving the economy. Still refuses to take a balance below zero.
pub async fn debit(
    tx: &mut Tx<'_>,
    club_id: ClubId,
    amount: i64,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    if amount < 0 {
        return Err(MarketError::InvalidAmount(amount));
    }
    withdraw(tx, club_id, amount).await?;
    record(tx, Some(club_id), None, amount, reason, at).await?;
    info!(from = club_id, amount, reason, "Club debited");
    Ok(())
}

/// [`transfer`] in its own transaction.
pub async fn transfer_now(
    db: &Db,
    from: ClubId,
    to: ClubId,
    amount: i64,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let mut tx = db.begin().await?;
    transfer(&mut tx, from, to, amount, reason, at).await?;
    tx.commit().await?;
    Ok(())
}

/// Current balance, `ClubNotFound` if the club does not exist.
pub async fn balance(conn: &mut SqliteConnection, club_id: ClubId) -> Result<i64> {
    clubs::fetch_club(conn, club_id)
        .await?
        .map(|c| c.balance)
        .ok_or(MarketError::ClubNotFound(club_id))
}

/// Audit rows touching a club, oldest first.
pub async fn entries_for_club(
    conn: &mut SqliteConnection,
    club_id: ClubId,
) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        "SELECT id, from_club_id, to_club_id, amount, reason, created_at
         FROM ledger_entries
         WHERE from_club_id = ?1 OR to_club_id = ?1
         ORDER BY id",
    )
    .bind(club_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(LedgerEntry {
            id: row.try_get("id")?,
            from_club_id: row.try_get("from_club_id")?,
            to_club_id: row.try_get("to_club_id")?,
            amount: row.try_get("amount")?,
            reason: row.try_get("reason")?,
            created_at: from_millis(row.try_get("created_at")?)?,
        });
    }
    Ok(entries)
}

async fn withdraw(tx: &mut Tx<'_>, club_id: ClubId, amount: i64) -> Result<()> {
    let result = sqlx::query(
        "UPDATE clubs SET balance = balance - ?1 WHERE id = ?2 AND balance >= ?1",
    )
    .bind(amount)
    .bind(club_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        let available = balance(&mut **tx, club_id).await?;
        warn!(club_id, needed = amount, available, "Debit refused");
        return Err(MarketError::InsufficientFunds {
            club_id,
            needed: amount,
            available,
        });
    }
    Ok(())
}

async fn deposit(tx: &mut Tx<'_>, club_id: ClubId, amount: i64) -> Result<()> {
    let result = sqlx::query("UPDATE clubs SET balance = balance + ?1 WHERE id = ?2")
        .bind(amount)
        .bind(club_id)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MarketError::ClubNotFound(club_id));
    }
    Ok(())
}

async fn record(
    tx: &mut Tx<'_>,
    from: Option<ClubId>,
    to: Option<ClubId>,
    amount: i64,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ledger_entries (from_club_id, to_club_id, amount, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(from)
    .bind(to)
    .bind(amount)
    .bind(reason)
    .bind(to_millis(at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
