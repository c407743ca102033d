//! Test harness: a market over a fresh database with a manual clock.
//!
//! Seeds clubs, players and contracts through the same storage helpers
//! the game backend uses, so every test starts from a known state.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use transfer_market::clock::ManualClock;
use transfer_market::config::TransfersConfig;
use transfer_market::market::TransferMarket;
use transfer_market::storage::{self, clubs, contracts, Db};
use transfer_market::types::{ClubId, ListingId, PlayerId};

/// Midnight of the day every scenario starts on.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 30, 0, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    t0().date_naive()
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub market: Arc<TransferMarket>,
    file: Option<PathBuf>,
}

impl Harness {
    pub async fn in_memory() -> Self {
        let db = storage::connect_in_memory().await.unwrap();
        Self::over(db, None)
    }

    /// A file-backed database, so several pooled connections can race.
    pub async fn on_disk(max_connections: u32) -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("transfer_market_it_{}.db", Uuid::new_v4()));
        let url = format!("sqlite://{}", path.to_string_lossy());
        let db = storage::connect(&url, max_connections).await.unwrap();
        Self::over(db, Some(path))
    }

    fn over(db: Db, file: Option<PathBuf>) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let market = Arc::new(TransferMarket::new(
            db,
            clock.clone(),
            TransfersConfig::default(),
        ));
        Self { clock, market, file }
    }

    pub fn db(&self) -> &Db {
        self.market.db()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn club(&self, name: &str, balance: i64) -> ClubId {
        clubs::create_club(self.db(), name, balance).await.unwrap()
    }

    pub async fn balance(&self, club: ClubId) -> i64 {
        self.market.club(club).await.unwrap().balance
    }

    /// Sum of every club balance.
    pub async fn money_supply(&self) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(SUM(balance), 0) FROM clubs")
            .fetch_one(self.db())
            .await
            .unwrap()
    }

    /// A player under contract at `club` that lapses on `expiry`.
    pub async fn contracted_player(&self, club: ClubId, name: &str, expiry: NaiveDate) -> PlayerId {
        let player = clubs::create_player(self.db(), name, Some(club)).await.unwrap();
        let mut tx = self.db().begin().await.unwrap();
        contracts::sign(&mut tx, player, club, 120, expiry).await.unwrap();
        tx.commit().await.unwrap();
        player
    }

    /// Run today's expiry scan over a player whose contract lapses today
    /// and return the contract-expiry listing it opened.
    pub async fn expiry_listing(&self, former_club: ClubId, name: &str) -> (PlayerId, ListingId) {
        let player = self.contracted_player(former_club, name, today()).await;
        self.market.run_daily_expiry(today()).await.unwrap();
        let listing = self
            .market
            .active_listings_for_player(player)
            .await
            .unwrap()
            .remove(0);
        (player, listing.id)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(path) = &self.file {
            let base = path.to_string_lossy().to_string();
            for suffix in ["", "-wal", "-shm"] {
                std::fs::remove_file(format!("{base}{suffix}")).ok();
            }
        }
    }
}
