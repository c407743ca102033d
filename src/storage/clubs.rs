//! Clubs and player ownership.
//!
//! Seeding helpers for the game backend plus the two ownership moves the
//! market performs: releasing a player (contract-expiry auctions) and
//! assigning a player to a buyer (settlement).

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use super::{Db, Result, Tx};
use crate::types::{Club, ClubId, MarketError, Player, PlayerId};

fn club_from_row(row: &SqliteRow) -> std::result::Result<Club, sqlx::Error> {
    Ok(Club {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        balance: row.try_get("balance")?,
    })
}

fn player_from_row(row: &SqliteRow) -> std::result::Result<Player, sqlx::Error> {
    Ok(Player {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        club_id: row.try_get("club_id")?,
    })
}

/// Register a club with an opening balance.
pub async fn create_club(db: &Db, name: &str, balance: i64) -> Result<ClubId> {
    if balance < 0 {
        return Err(MarketError::InvalidAmount(balance));
    }
    let id = sqlx::query("INSERT INTO clubs (name, balance) VALUES (?1, ?2)")
        .bind(name)
        .bind(balance)
        .execute(db)
        .await?
        .last_insert_rowid();

    debug!(club_id = id, name, balance, "Club created");
    Ok(id)
}

/// Register a player, optionally already in a club's squad.
pub async fn create_player(db: &Db, name: &str, club_id: Option<ClubId>) -> Result<PlayerId> {
    let id = sqlx::query("INSERT INTO players (name, club_id) VALUES (?1, ?2)")
        .bind(name)
        .bind(club_id)
        .execute(db)
        .await?
        .last_insert_rowid();

    debug!(player_id = id, name, club_id = ?club_id, "Player created");
    Ok(id)
}

pub async fn fetch_club(conn: &mut SqliteConnection, id: ClubId) -> Result<Option<Club>> {
    let row = sqlx::query("SELECT id, name, balance FROM clubs WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(club_from_row).transpose()?)
}

pub async fn fetch_player(conn: &mut SqliteConnection, id: PlayerId) -> Result<Option<Player>> {
    let row = sqlx::query("SELECT id, name, club_id FROM players WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(player_from_row).transpose()?)
}

/// Players currently owned by `club_id`.
pub async fn squad(conn: &mut SqliteConnection, club_id: ClubId) -> Result<Vec<Player>> {
    let rows = sqlx::query("SELECT id, name, club_id FROM players WHERE club_id = ?1 ORDER BY id")
        .bind(club_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(player_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

pub async fn squad_size(conn: &mut SqliteConnection, club_id: ClubId) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM players WHERE club_id = ?1")
        .bind(club_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Clear a player's ownership.
pub async fn release_player(tx: &mut Tx<'_>, player_id: PlayerId) -> Result<()> {
    let result = sqlx::query("UPDATE players SET club_id = NULL WHERE id = ?1")
        .bind(player_id)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MarketError::PlayerNotFound(player_id));
    }
    info!(player_id, "Player released from club");
    Ok(())
}

/// Move a player into `club_id`'s squad.
pub async fn assign_player(tx: &mut Tx<'_>, player_id: PlayerId, club_id: ClubId) -> Result<()> {
    let result = sqlx::query("UPDATE players SET club_id = ?1 WHERE id = ?2")
        .bind(club_id)
        .bind(player_id)
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MarketError::PlayerNotFound(player_id));
    }
    info!(player_id, club_id, "Player assigned to club");
    Ok(())
}
