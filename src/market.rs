//! Transfer market facade.
//!
//! The interface the game backend talks to: open auctions, place bids,
//! trigger the daily expiry scan and settlement sweeps, and query state.
//! Owns the database pool, the clock and the two engines; the scheduler
//! and the HTTP API both drive the market through this type so manual and
//! periodic settlement go through the same guard.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::TransfersConfig;
use crate::engine::scanner::ExpiryScanner;
use crate::engine::settlement::{SettlementEngine, SettlementReport};
use crate::storage::listings::{self, NewListing};
use crate::storage::{bids, clubs, contracts, ledger, Db, Result};
use crate::types::{
    Bid, BidId, Club, ClubId, Contract, ExpirySummary, LedgerEntry, Listing, ListingId,
    ListingKind, MarketError, Player, PlayerId,
};

pub struct TransferMarket {
    db: Db,
    clock: Arc<dyn Clock>,
    config: TransfersConfig,
    scanner: ExpiryScanner,
    settlement: SettlementEngine,
}

impl TransferMarket {
    pub fn new(db: Db, clock: Arc<dyn Clock>, config: TransfersConfig) -> Self {
        Self {
            scanner: ExpiryScanner::new(&config),
            settlement: SettlementEngine::new(&config),
            db,
            clock,
            config,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &TransfersConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Put one of the seller's own players on the transfer list. The
    /// player stays in the seller's squad until the listing settles.
    pub async fn open_auction(
        &self,
        player_id: PlayerId,
        selling_club_id: ClubId,
        starting_price: i64,
        window_minutes: i64,
    ) -> Result<ListingId> {
        if starting_price < 0 {
            return Err(MarketError::InvalidAmount(starting_price));
        }
        if window_minutes <= 0 {
            return Err(MarketError::InvalidWindow(window_minutes));
        }

        {
            let mut conn = self.db.acquire().await?;
            if clubs::fetch_club(&mut conn, selling_club_id).await?.is_none() {
                return Err(MarketError::ClubNotFound(selling_club_id));
            }
            let player = clubs::fetch_player(&mut conn, player_id)
                .await?
                .ok_or(MarketError::PlayerNotFound(player_id))?;
            if player.club_id != Some(selling_club_id) {
                return Err(MarketError::NotOwner {
                    player_id,
                    club_id: selling_club_id,
                });
            }
        }

        let now = self.clock.now();
        let window_end = Duration::try_minutes(window_minutes)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or(MarketError::InvalidWindow(window_minutes))?;
        let new = NewListing {
            player_id,
            selling_club_id,
            kind: ListingKind::TransferList,
            starting_price,
            window_start: now,
            window_end,
        };

        let mut tx = self.db.begin().await?;
        let listing = listings::open(&mut tx, &new).await?;
        tx.commit().await?;

        info!(
            listing_id = listing.id,
            player_id,
            seller = selling_club_id,
            starting_price,
            ends = %listing.window_end,
            "Auction opened"
        );
        Ok(listing.id)
    }

    pub async fn place_bid(&self, listing_id: ListingId, club_id: ClubId, amount: i64) -> Result<BidId> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;
        let bid = bids::place(&mut tx, listing_id, club_id, amount, now).await?;
        tx.commit().await?;
        Ok(bid.id)
    }

    /// Expire the contracts lapsing on `date` and list those players.
    pub async fn run_daily_expiry(&self, date: NaiveDate) -> Result<ExpirySummary> {
        self.scanner.run(&self.db, date, self.clock.now()).await
    }

    /// Earliest day before `today` whose expiring contracts were never
    /// scanned, if any.
    pub async fn earliest_missed_expiry(&self, today: NaiveDate) -> Result<Option<NaiveDate>> {
        let mut conn = self.db.acquire().await?;
        contracts::earliest_lapsed(&mut conn, today).await
    }

    /// Settle everything due at `now`.
    pub async fn run_settlement(&self, now: DateTime<Utc>) -> Result<SettlementReport> {
        self.settlement.settle_due(&self.db, now).await
    }

    /// Operator-triggered sweep at the current time.
    pub async fn settle_now(&self) -> Result<SettlementReport> {
        let now = self.clock.now();
        info!(at = %now, "Manual settlement requested");
        self.run_settlement(now).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_listing(&self, listing_id: ListingId) -> Result<Listing> {
        let mut conn = self.db.acquire().await?;
        listings::fetch(&mut conn, listing_id)
            .await?
            .ok_or(MarketError::ListingNotFound(listing_id))
    }

    pub async fn active_listings_for_player(&self, player_id: PlayerId) -> Result<Vec<Listing>> {
        let mut conn = self.db.acquire().await?;
        listings::active_for_player(&mut conn, player_id).await
    }

    pub async fn bids_for_listing(&self, listing_id: ListingId) -> Result<Vec<Bid>> {
        let mut conn = self.db.acquire().await?;
        if listings::fetch(&mut conn, listing_id).await?.is_none() {
            return Err(MarketError::ListingNotFound(listing_id));
        }
        bids::for_listing(&mut conn, listing_id).await
    }

    pub async fn club(&self, club_id: ClubId) -> Result<Club> {
        let mut conn = self.db.acquire().await?;
        clubs::fetch_club(&mut conn, club_id)
            .await?
            .ok_or(MarketError::ClubNotFound(club_id))
    }

    pub async fn player(&self, player_id: PlayerId) -> Result<Player> {
        let mut conn = self.db.acquire().await?;
        clubs::fetch_player(&mut conn, player_id)
            .await?
            .ok_or(MarketError::PlayerNotFound(player_id))
    }

    pub async fn active_contract(&self, player_id: PlayerId) -> Result<Option<Contract>> {
        let mut conn = self.db.acquire().await?;
        contracts::active_contract_for(&mut conn, player_id).await
    }

    pub async fn ledger_entries(&self, club_id: ClubId) -> Result<Vec<LedgerEntry>> {
        let mut conn = self.db.acquire().await?;
        ledger::entries_for_club(&mut conn, club_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
