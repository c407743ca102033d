//! Shared types for the transfer market.
//!
//! These types form the data model used across all modules: clubs,
//! players, contracts, listings, bids, and the outcome records the
//! settlement engine emits. Storage, engine, and API modules depend on
//! them without depending on each other.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ClubId = i64;
pub type PlayerId = i64;
pub type ListingId = i64;
pub type BidId = i64;

// ---------------------------------------------------------------------------
// Clubs & players
// ---------------------------------------------------------------------------

/// A club and its current balance. Balance only moves through the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Club {
    pub id: ClubId,
    pub name: String,
    pub balance: i64,
}

impl fmt::Display for Club {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{}, balance={})", self.name, self.id, self.balance)
    }
}

/// A player. `club_id == None` means unattached (free agent or up for
/// a contract-expiry auction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub club_id: Option<ClubId>,
}

impl Player {
    pub fn is_unattached(&self) -> bool {
        self.club_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Current employment record of a player. At most one per player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub player_id: PlayerId,
    pub club_id: ClubId,
    /// Daily wage.
    pub wage: i64,
    pub expiry_date: NaiveDate,
}

impl Contract {
    /// Whether the contract lapses on `date`.
    pub fn expires_on(&self, date: NaiveDate) -> bool {
        self.expiry_date == date
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// How a listing came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// Put up by the selling club. The player stays in the seller's squad
    /// until the listing settles.
    TransferList,
    /// Opened by the expiry scanner when a contract lapses. The player is
    /// unattached for the whole window.
    ContractExpiry,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::TransferList => "transfer_list",
            ListingKind::ContractExpiry => "contract_expiry",
        }
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ListingKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer_list" => Ok(ListingKind::TransferList),
            "contract_expiry" => Ok(ListingKind::ContractExpiry),
            _ => Err(anyhow::anyhow!("Unknown listing kind: {s}")),
        }
    }
}

/// Listing lifecycle. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Completed => "completed",
            ListingStatus::Cancelled => "cancelled",
            ListingStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ListingStatus::Active)
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ListingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ListingStatus::Active),
            "completed" => Ok(ListingStatus::Completed),
            "cancelled" => Ok(ListingStatus::Cancelled),
            "expired" => Ok(ListingStatus::Expired),
            _ => Err(anyhow::anyhow!("Unknown listing status: {s}")),
        }
    }
}

/// An auction / transfer-list record for a single player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub player_id: PlayerId,
    /// Origin club; receives the proceeds.
    pub selling_club_id: ClubId,
    pub kind: ListingKind,
    pub status: ListingStatus,
    pub starting_price: i64,
    /// Amount of the leading bid, 0 while there is none.
    pub current_lead_amount: i64,
    pub leader_bid_id: Option<BidId>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub buyer_club_id: Option<ClubId>,
    pub winning_bid_id: Option<BidId>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Why a listing was cancelled, or the last settlement failure.
    pub settlement_note: Option<String>,
    /// Settlement passes that failed on this listing.
    pub settlement_attempts: i64,
}

impl Listing {
    /// Bids are accepted only while active and before the window ends.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ListingStatus::Active && now < self.window_end
    }

    /// Due for settlement: still active and the window has elapsed.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ListingStatus::Active && self.window_end <= now
    }

    pub fn has_leader(&self) -> bool {
        self.leader_bid_id.is_some()
    }

    /// Smallest amount the next bid may carry.
    pub fn minimum_bid(&self) -> i64 {
        if self.has_leader() {
            self.current_lead_amount + 1
        } else {
            self.starting_price.max(1)
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listing #{} [{}] player={} seller={} status={} lead={} ends={}",
            self.id,
            self.kind,
            self.player_id,
            self.selling_club_id,
            self.status,
            self.current_lead_amount,
            self.window_end.to_rfc3339(),
        )
    }
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

/// A recorded bid. Immutable once written; only the leader flag moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub listing_id: ListingId,
    pub club_id: ClubId,
    pub amount: i64,
    pub is_leader: bool,
    pub submitted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ledger audit
// ---------------------------------------------------------------------------

/// One row of the ledger audit trail. `None` on either side means money
/// entering or leaving the game economy (pure revenue / expense).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub from_club_id: Option<ClubId>,
    pub to_club_id: Option<ClubId>,
    pub amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine outcomes
// ---------------------------------------------------------------------------

/// Summary of one expiry scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySummary {
    pub contracts_expired: usize,
    pub listings_opened: usize,
}

/// What happened to one due listing during a settlement sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Completed,
    Cancelled,
    Expired,
    /// Another settler already moved the listing out of `Active`.
    Skipped,
    /// Unexpected error; the listing stays active and is retried next sweep.
    Failed,
}

impl fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementOutcome::Completed => "completed",
            SettlementOutcome::Cancelled => "cancelled",
            SettlementOutcome::Expired => "expired",
            SettlementOutcome::Skipped => "skipped",
            SettlementOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Structured per-listing result of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSettlement {
    pub listing_id: ListingId,
    pub outcome: SettlementOutcome,
    pub player_id: PlayerId,
    pub buyer: Option<ClubId>,
    pub seller: Option<ClubId>,
    pub fee: Option<i64>,
    pub reason: Option<String>,
}

impl ListingSettlement {
    /// A result that moved nothing (expired, skipped, cancelled, failed).
    pub fn without_transfer(
        listing: &Listing,
        outcome: SettlementOutcome,
        reason: Option<String>,
    ) -> Self {
        Self {
            listing_id: listing.id,
            outcome,
            player_id: listing.player_id,
            buyer: None,
            seller: Some(listing.selling_club_id),
            fee: None,
            reason,
        }
    }
}

impl fmt::Display for ListingSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listing #{} {} player={}",
            self.listing_id, self.outcome, self.player_id
        )?;
        if let (Some(buyer), Some(fee)) = (self.buyer, self.fee) {
            write!(f, " buyer={buyer} fee={fee}")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors of the transfer market.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Player {player_id} already has an active listing")]
    AlreadyListed { player_id: PlayerId },

    #[error("Listing {0} is not accepting bids")]
    ListingNotActive(ListingId),

    #[error("Bid of {amount} is too low, minimum is {minimum}")]
    BidTooLow { amount: i64, minimum: i64 },

    #[error("Club {0} cannot bid on its own listing")]
    SelfBidNotAllowed(ClubId),

    #[error("Insufficient funds: club {club_id} needs {needed}, has {available}")]
    InsufficientFunds {
        club_id: ClubId,
        needed: i64,
        available: i64,
    },

    #[error("Squad full: club {club_id} has {size} players, cap is {cap}")]
    SquadFull { club_id: ClubId, size: i64, cap: i64 },

    #[error("Club {club_id} does not own player {player_id}")]
    NotOwner { player_id: PlayerId, club_id: ClubId },

    #[error("Player {0} already has a contract")]
    AlreadyContracted(PlayerId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Invalid listing window: {0} minutes")]
    InvalidWindow(i64),

    #[error("Listing not found: {0}")]
    ListingNotFound(ListingId),

    #[error("Club not found: {0}")]
    ClubNotFound(ClubId),

    #[error("Player not found: {0}")]
    PlayerNotFound(PlayerId),

    /// A configured rule pushed a date past what the calendar can hold.
    #[error("Date out of range: {0}")]
    DateOutOfRange(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl MarketError {
    /// Valid request, but the resources to complete it are missing at
    /// settlement time. These end a listing as `Cancelled`.
    pub fn is_settlement_refusal(&self) -> bool {
        matches!(
            self,
            MarketError::InsufficientFunds { .. }
                | MarketError::SquadFull { .. }
                | MarketError::NotOwner { .. }
        )
    }

    /// Caller mistakes, reported synchronously with no state mutated.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MarketError::AlreadyListed { .. }
                | MarketError::ListingNotActive(_)
                | MarketError::BidTooLow { .. }
                | MarketError::SelfBidNotAllowed(_)
                | MarketError::AlreadyContracted(_)
                | MarketError::InvalidAmount(_)
                | MarketError::InvalidWindow(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
