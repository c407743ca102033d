//! Settlement engine.
//!
//! Resolves every due listing into `Completed`, `Cancelled` or `Expired`.
//! Each listing is settled in its own transaction that starts by claiming
//! the row (`listings::claim`), so a second sweep running at the same
//! time either waits for the first to commit or finds the listing already
//! closed and skips it. Nothing a listing does can abort the rest of the
//! sweep: an unexpected error rolls the listing's transaction back, is
//! written to the listing as its note, and is reported as `Failed`. The
//! listing is retried on the next pass until it has failed
//! `max_settlement_attempts` times, after which it is cancelled.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TransfersConfig;
use crate::storage::listings::{self, Closing};
use crate::storage::{bids, clubs, contracts, ledger, Db, Result, Tx};
use crate::types::{
    Bid, Listing, ListingKind, ListingSettlement, MarketError, SettlementOutcome,
};

// ---------------------------------------------------------------------------
// Sweep report
// ---------------------------------------------------------------------------

/// Everything one settlement sweep did.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<ListingSettlement>,
}

impl SettlementReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            outcomes: Vec::new(),
        }
    }

    pub fn count(&self, outcome: SettlementOutcome) -> usize {
        self.outcomes.iter().filter(|o| o.outcome == outcome).count()
    }

    /// Listings this sweep moved to a terminal state.
    pub fn settled(&self) -> usize {
        self.count(SettlementOutcome::Completed)
            + self.count(SettlementOutcome::Cancelled)
            + self.count(SettlementOutcome::Expired)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine {
    max_squad_size: i64,
    pending_departure_window: Option<Duration>,
    signing_wage: i64,
    signing_contract: Option<Duration>,
    max_attempts: i64,
}

impl SettlementEngine {
    pub fn new(config: &TransfersConfig) -> Self {
        Self {
            max_squad_size: config.max_squad_size,
            pending_departure_window: config.pending_departure_window(),
            signing_wage: config.signing_wage,
            signing_contract: config.signing_contract(),
            max_attempts: config.max_settlement_attempts.max(1),
        }
    }

    /// Settle every active listing whose window ended at or before `now`.
    ///
    /// Only a failure to read the due set is returned as an error; per
    /// listing failures end up in the report.
    pub async fn settle_due(&self, db: &Db, now: DateTime<Utc>) -> Result<SettlementReport> {
        let mut report = SettlementReport::new(now);

        let due = {
            let mut conn = db.acquire().await?;
            listings::due(&mut conn, now).await?
        };

        if due.is_empty() {
            debug!(run_id = %report.run_id, "No listings due");
            return Ok(report);
        }

        info!(run_id = %report.run_id, due = due.len(), "Settling due listings");

        for listing in &due {
            let result = match self.settle_listing(db, listing, now).await {
                Ok(result) => result,
                Err(e) => match self.record_failure(db, listing, &e, now).await {
                    Ok(result) => result,
                    Err(record_err) => {
                        warn!(
                            run_id = %report.run_id,
                            listing_id = listing.id,
                            error = %e,
                            record_error = %record_err,
                            "Settlement failed and could not be recorded"
                        );
                        ListingSettlement::without_transfer(
                            listing,
                            SettlementOutcome::Failed,
                            Some(e.to_string()),
                        )
                    }
                },
            };
            report.outcomes.push(result);
        }

        info!(
            run_id = %report.run_id,
            completed = report.count(SettlementOutcome::Completed),
            cancelled = report.count(SettlementOutcome::Cancelled),
            expired = report.count(SettlementOutcome::Expired),
            skipped = report.count(SettlementOutcome::Skipped),
            failed = report.count(SettlementOutcome::Failed),
            "Settlement sweep complete"
        );

        Ok(report)
    }

    /// Settle one listing exactly once.
    pub async fn settle_listing(
        &self,
        db: &Db,
        snapshot: &Listing,
        now: DateTime<Utc>,
    ) -> Result<ListingSettlement> {
        let mut tx = db.begin().await?;

        if !listings::claim(&mut tx, snapshot.id).await? {
            info!(listing_id = snapshot.id, "Listing already settled, skipping");
            return Ok(skipped(snapshot));
        }

        let listing = listings::fetch(&mut *tx, snapshot.id)
            .await?
            .ok_or(MarketError::ListingNotFound(snapshot.id))?;

        let Some(bid) = bids::leader(&mut *tx, listing.id).await? else {
            return conclude(tx, &listing, Closing::expired(now), SettlementOutcome::Expired).await;
        };

        match self.admit(&mut tx, &listing, &bid, now).await {
            Ok(()) => {}
            Err(e) if e.is_settlement_refusal() => {
                info!(listing_id = listing.id, buyer = bid.club_id, reason = %e, "Winning bid refused");
                let closing = Closing::cancelled(e.to_string(), now);
                return conclude(tx, &listing, closing, SettlementOutcome::Cancelled).await;
            }
            Err(e) => return Err(e),
        }

        let expiry = offset(now, self.signing_contract, "signing contract expiry")?.date_naive();
        let closing = Closing::completed(bid.club_id, bid.id, now);
        if !listings::close(&mut tx, listing.id, &closing).await? {
            return Ok(skipped(&listing));
        }

        let reason = format!("transfer fee: listing {}", listing.id);
        ledger::transfer(&mut tx, bid.club_id, listing.selling_club_id, bid.amount, &reason, now)
            .await?;
        clubs::assign_player(&mut tx, listing.player_id, bid.club_id).await?;
        contracts::supersede(&mut tx, listing.player_id, bid.club_id, self.signing_wage, expiry)
            .await?;

        tx.commit().await?;

        info!(
            listing_id = listing.id,
            player_id = listing.player_id,
            buyer = bid.club_id,
            seller = listing.selling_club_id,
            fee = bid.amount,
            "Transfer completed"
        );

        Ok(ListingSettlement {
            listing_id: listing.id,
            outcome: SettlementOutcome::Completed,
            player_id: listing.player_id,
            buyer: Some(bid.club_id),
            seller: Some(listing.selling_club_id),
            fee: Some(bid.amount),
            reason: None,
        })
    }

    /// Keep a failed pass on the listing in its own transaction. Past the
    /// attempt limit the listing is cancelled with the error as its reason.
    async fn record_failure(
        &self,
        db: &Db,
        listing: &Listing,
        error: &MarketError,
        now: DateTime<Utc>,
    ) -> Result<ListingSettlement> {
        let note = error.to_string();
        let mut tx = db.begin().await?;

        let Some(attempts) = listings::record_failure(&mut tx, listing.id, &note).await? else {
            return Ok(skipped(listing));
        };

        if attempts < self.max_attempts {
            tx.commit().await?;
            warn!(
                listing_id = listing.id,
                attempts,
                max_attempts = self.max_attempts,
                error = %note,
                "Settlement failed, listing left for next sweep"
            );
            return Ok(ListingSettlement::without_transfer(
                listing,
                SettlementOutcome::Failed,
                Some(note),
            ));
        }

        warn!(
            listing_id = listing.id,
            attempts,
            error = %note,
            "Settlement keeps failing, cancelling listing"
        );
        let reason = format!("settlement failed {attempts} times: {note}");
        conclude(tx, listing, Closing::cancelled(reason, now), SettlementOutcome::Cancelled).await
    }

    /// Re-check the winning bid against the buyer's state right now.
    ///
    /// The squad check counts the buyer's own transfer-listed players
    /// whose sale should land within the departure window as already
    /// gone. That is a best-effort estimate, not a reservation.
    async fn admit(
        &self,
        tx: &mut Tx<'_>,
        listing: &Listing,
        bid: &Bid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if listing.kind == ListingKind::TransferList {
            let player = clubs::fetch_player(&mut **tx, listing.player_id)
                .await?
                .ok_or(MarketError::PlayerNotFound(listing.player_id))?;
            if player.club_id != Some(listing.selling_club_id) {
                return Err(MarketError::NotOwner {
                    player_id: listing.player_id,
                    club_id: listing.selling_club_id,
                });
            }
        }

        let available = ledger::balance(&mut **tx, bid.club_id).await?;
        if available < bid.amount {
            return Err(MarketError::InsufficientFunds {
                club_id: bid.club_id,
                needed: bid.amount,
                available,
            });
        }

        let owned = clubs::squad_size(&mut **tx, bid.club_id).await?;
        let horizon = offset(now, self.pending_departure_window, "pending departure horizon")?;
        let leaving = listings::pending_departures(&mut **tx, bid.club_id, horizon).await?;
        let size = owned - leaving;
        if size >= self.max_squad_size {
            return Err(MarketError::SquadFull {
                club_id: bid.club_id,
                size,
                cap: self.max_squad_size,
            });
        }

        Ok(())
    }
}

/// Close a listing with no money or ownership moving.
async fn conclude(
    mut tx: Tx<'_>,
    listing: &Listing,
    closing: Closing,
    outcome: SettlementOutcome,
) -> Result<ListingSettlement> {
    if !listings::close(&mut tx, listing.id, &closing).await? {
        return Ok(skipped(listing));
    }
    tx.commit().await?;

    info!(listing_id = listing.id, player_id = listing.player_id, %outcome, "Listing settled");
    Ok(ListingSettlement::without_transfer(listing, outcome, closing.note))
}

fn offset(now: DateTime<Utc>, by: Option<Duration>, what: &str) -> Result<DateTime<Utc>> {
    by.and_then(|by| now.checked_add_signed(by))
        .ok_or_else(|| MarketError::DateOutOfRange(format!("{what} from {}", now.to_rfc3339())))
}

fn skipped(listing: &Listing) -> ListingSettlement {
    ListingSettlement::without_transfer(listing, SettlementOutcome::Skipped, None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
