//! Contract store: one employment record per player.

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;

use super::{date_from_text, date_to_text, Result, Tx};
use crate::types::{ClubId, Contract, MarketError, PlayerId};

fn contract_from_row(row: &SqliteRow) -> std::result::Result<Contract, sqlx::Error> {
    let expiry: String = row.try_get("expiry_date")?;
    Ok(Contract {
        player_id: row.try_get("player_id")?,
        club_id: row.try_get("club_id")?,
        wage: row.try_get("wage")?,
        expiry_date: date_from_text(&expiry)?,
    })
}

/// Contracts lapsing on `on`, skipping players that already have an
/// active listing so a repeated scan cannot list them twice.
pub async fn find_expiring(conn: &mut SqliteConnection, on: NaiveDate) -> Result<Vec<Contract>> {
    let rows = sqlx::query(
        "SELECT c.player_id, c.club_id, c.wage, c.expiry_date
         FROM contracts c
         WHERE c.expiry_date = ?1
           AND NOT EXISTS (
               SELECT 1 FROM listings l
               WHERE l.player_id = c.player_id AND l.status = 'active'
           )
         ORDER BY c.player_id",
    )
    .bind(date_to_text(on))
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(contract_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Earliest expiry date before `today` that still has a contract and no
/// active listing, i.e. a day whose expiry scan never ran.
pub async fn earliest_lapsed(
    conn: &mut SqliteConnection,
    today: NaiveDate,
) -> Result<Option<NaiveDate>> {
    let earliest: Option<String> = sqlx::query_scalar(
        "SELECT MIN(c.expiry_date)
         FROM contracts c
         WHERE c.expiry_date < ?1
           AND NOT EXISTS (
               SELECT 1 FROM listings l
               WHERE l.player_id = c.player_id AND l.status = 'active'
           )",
    )
    .bind(date_to_text(today))
    .fetch_one(&mut *conn)
    .await?;
    Ok(earliest.as_deref().map(date_from_text).transpose()?)
}

pub async fn active_contract_for(
    conn: &mut SqliteConnection,
    player_id: PlayerId,
) -> Result<Option<Contract>> {
    let row = sqlx::query(
        "SELECT player_id, club_id, wage, expiry_date FROM contracts WHERE player_id = ?1",
    )
    .bind(player_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(contract_from_row).transpose()?)
}

/// First contract for an uncontracted player.
pub async fn sign(
    tx: &mut Tx<'_>,
    player_id: PlayerId,
    club_id: ClubId,
    wage: i64,
    expiry_date: NaiveDate,
) -> Result<Contract> {
    if wage < 0 {
        return Err(MarketError::InvalidAmount(wage));
    }
    let result = sqlx::query(
        "INSERT INTO contracts (player_id, club_id, wage, expiry_date)
         SELECT ?1, ?2, ?3, ?4
         WHERE NOT EXISTS (SELECT 1 FROM contracts WHERE player_id = ?1)",
    )
    .bind(player_id)
    .bind(club_id)
    .bind(wage)
    .bind(date_to_text(expiry_date))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(MarketError::AlreadyContracted(player_id));
    }

    info!(player_id, club_id, wage, expiry = %expiry_date, "Contract signed");
    Ok(Contract {
        player_id,
        club_id,
        wage,
        expiry_date,
    })
}

/// Replace whatever contract the player has with a new one, in a single
/// statement, so the player is never left between contracts.
pub async fn supersede(
    tx: &mut Tx<'_>,
    player_id: PlayerId,
    club_id: ClubId,
    wage: i64,
    expiry_date: NaiveDate,
) -> Result<Contract> {
    if wage < 0 {
        return Err(MarketError::InvalidAmount(wage));
    }
    sqlx::query(
        "INSERT INTO contracts (player_id, club_id, wage, expiry_date)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(player_id) DO UPDATE SET
             club_id = excluded.club_id,
             wage = excluded.wage,
             expiry_date = excluded.expiry_date",
    )
    .bind(player_id)
    .bind(club_id)
    .bind(wage)
    .bind(date_to_text(expiry_date))
    .execute(&mut **tx)
    .await?;

    info!(player_id, club_id, wage, expiry = %expiry_date, "Contract superseded");
    Ok(Contract {
        player_id,
        club_id,
        wage,
        expiry_date,
    })
}

/// Remove the contract exactly as read. Returns false, and deletes
/// nothing, if it was renewed or replaced in the meantime.
pub async fn terminate(tx: &mut Tx<'_>, contract: &Contract) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM contracts WHERE player_id = ?1 AND club_id = ?2 AND expiry_date = ?3",
    )
    .bind(contract.player_id)
    .bind(contract.club_id)
    .bind(date_to_text(contract.expiry_date))
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}
