//! Expiry scanner.
//!
//! Daily pass over the contract store: every contract lapsing today is
//! ended and the player goes up for a fixed-window auction with the
//! former employer as seller. Each player is handled in its own
//! transaction (open listing, drop contract, release player). Re-running
//! the scan on the same day finds nothing new: the contract is gone and
//! the player is already listed. A contract renewed between the read and
//! the write is left alone.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info};

use crate::config::TransfersConfig;
use crate::storage::listings::{self, NewListing};
use crate::storage::{clubs, contracts, Db, Result};
use crate::types::{Contract, ExpirySummary, ListingKind, MarketError};

pub struct ExpiryScanner {
    starting_price: i64,
    window_hours: i64,
    window: Option<Duration>,
}

impl ExpiryScanner {
    pub fn new(config: &TransfersConfig) -> Self {
        Self {
            starting_price: config.expiry_starting_price,
            window_hours: config.expiry_window_hours,
            window: config.expiry_window(),
        }
    }

    fn window_end(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.window
            .and_then(|window| now.checked_add_signed(window))
            .ok_or(MarketError::InvalidWindow(self.window_hours.saturating_mul(60)))
    }

    /// Open contract-expiry auctions for everything lapsing on `today`.
    /// Windows start at `now`.
    pub async fn run(&self, db: &Db, today: NaiveDate, now: DateTime<Utc>) -> Result<ExpirySummary> {
        let window_end = self.window_end(now)?;
        let expiring = {
            let mut conn = db.acquire().await?;
            contracts::find_expiring(&mut conn, today).await?
        };

        let mut summary = ExpirySummary {
            contracts_expired: expiring.len(),
            listings_opened: 0,
        };

        for contract in &expiring {
            if self.list_expired(db, contract, now, window_end).await? {
                summary.listings_opened += 1;
            }
        }

        info!(
            date = %today,
            expired = summary.contracts_expired,
            opened = summary.listings_opened,
            "Expiry scan complete"
        );
        Ok(summary)
    }

    /// Returns false if the player was listed concurrently or the
    /// contract no longer matches what was scanned.
    async fn list_expired(
        &self,
        db: &Db,
        contract: &Contract,
        now: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = db.begin().await?;

        let new = NewListing {
            player_id: contract.player_id,
            selling_club_id: contract.club_id,
            kind: ListingKind::ContractExpiry,
            starting_price: self.starting_price,
            window_start: now,
            window_end,
        };

        match listings::open(&mut tx, &new).await {
            Ok(_) => {}
            Err(MarketError::AlreadyListed { player_id }) => {
                debug!(player_id, "Player listed by another pass, skipping");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        // Dropping the transaction also withdraws the listing.
        if !contracts::terminate(&mut tx, contract).await? {
            debug!(
                player_id = contract.player_id,
                club_id = contract.club_id,
                expiry = %contract.expiry_date,
                "Contract changed since the scan, skipping"
            );
            return Ok(false);
        }
        clubs::release_player(&mut tx, contract.player_id).await?;
        tx.commit().await?;

        info!(
            player_id = contract.player_id,
            former_club = contract.club_id,
            "Contract expired, player up for auction"
        );
        Ok(true)
    }
}
