//! Listing lifecycle scenarios from open to terminal state.

use chrono::Duration;

use transfer_market::types::{ListingKind, ListingStatus, MarketError, SettlementOutcome};

use crate::support::{t0, today, Harness};

#[tokio::test]
async fn test_no_bids_expires() {
    let h = Harness::in_memory().await;
    let former = h.club("Former Club", 0).await;
    let (player, listing_id) = h.expiry_listing(former, "A. Novak").await;

    let listing = h.market.get_listing(listing_id).await.unwrap();
    assert_eq!(listing.kind, ListingKind::ContractExpiry);
    assert_eq!(listing.starting_price, 1);
    assert_eq!(listing.window_end, t0() + Duration::hours(24));

    h.advance(Duration::hours(24));
    let report = h.market.run_settlement(h.market.now()).await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].outcome, SettlementOutcome::Expired);

    let listing = h.market.get_listing(listing_id).await.unwrap();
    assert_eq!(listing.status, ListingStatus::Expired);
    assert!(listing.settled_at.is_some());
    assert!(h.market.player(player).await.unwrap().is_unattached());
}

#[tokio::test]
async fn test_winning_bid_moves_money_and_player() {
    let h = Harness::in_memory().await;
    let club_a = h.club("Club A", 1000).await;
    let club_b = h.club("Club B", 0).await;
    let (player, listing_id) = h.expiry_listing(club_b, "B. Mensah").await;

    h.market.place_bid(listing_id, club_a, 500).await.unwrap();
    h.advance(Duration::hours(24));
    let report = h.market.settle_now().await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.outcome, SettlementOutcome::Completed);
    assert_eq!(outcome.player_id, player);
    assert_eq!(outcome.buyer, Some(club_a));
    assert_eq!(outcome.seller, Some(club_b));
    assert_eq!(outcome.fee, Some(500));

    assert_eq!(h.balance(club_a).await, 500);
    assert_eq!(h.balance(club_b).await, 500);
    assert_eq!(h.market.player(player).await.unwrap().club_id, Some(club_a));
    assert_eq!(
        h.market.get_listing(listing_id).await.unwrap().status,
        ListingStatus::Completed
    );

    let contract = h.market.active_contract(player).await.unwrap().unwrap();
    assert_eq!(contract.club_id, club_a);
    assert_eq!(contract.wage, 100);

    let audit = h.market.ledger_entries(club_b).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].from_club_id, Some(club_a));
    assert_eq!(audit[0].amount, 500);
    assert!(audit[0].reason.contains(&listing_id.to_string()));
}

#[tokio::test]
async fn test_buyer_spent_funds_elsewhere_cancels() {
    let h = Harness::in_memory().await;
    let buyer = h.club("Buyer", 1000).await;
    let seller = h.club("Seller", 0).await;
    let first = h.contracted_player(seller, "C. Ruiz", today()).await;
    let second = h.contracted_player(seller, "D. Holm", today()).await;
    h.market.run_daily_expiry(today()).await.unwrap();

    let first_listing = h.market.active_listings_for_player(first).await.unwrap()[0].id;
    let second_listing = h.market.active_listings_for_player(second).await.unwrap()[0].id;
    h.market.place_bid(first_listing, buyer, 600).await.unwrap();
    h.market.place_bid(second_listing, buyer, 500).await.unwrap();

    h.advance(Duration::hours(24));
    let report = h.market.settle_now().await.unwrap();
    assert_eq!(report.count(SettlementOutcome::Completed), 1);
    assert_eq!(report.count(SettlementOutcome::Cancelled), 1);

    // Only the first fee moved.
    assert_eq!(h.balance(buyer).await, 400);
    assert_eq!(h.balance(seller).await, 600);

    let cancelled = h.market.get_listing(second_listing).await.unwrap();
    assert_eq!(cancelled.status, ListingStatus::Cancelled);
    assert!(cancelled.buyer_club_id.is_none());
    assert!(cancelled
        .settlement_note
        .unwrap()
        .contains("Insufficient funds"));
    assert!(h.market.player(second).await.unwrap().is_unattached());
    assert!(h.market.active_contract(second).await.unwrap().is_none());
}

#[tokio::test]
async fn test_lower_bid_rejected_leader_kept() {
    let h = Harness::in_memory().await;
    let former = h.club("Former", 0).await;
    let a = h.club("A", 1000).await;
    let b = h.club("B", 1000).await;
    let (_, listing_id) = h.expiry_listing(former, "E. Sato").await;

    let leader = h.market.place_bid(listing_id, a, 400).await.unwrap();
    let err = h.market.place_bid(listing_id, b, 300).await.unwrap_err();
    assert!(matches!(err, MarketError::BidTooLow { amount: 300, .. }));

    let bids = h.market.bids_for_listing(listing_id).await.unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].id, leader);
    assert!(bids[0].is_leader);
    assert_eq!(
        h.market.get_listing(listing_id).await.unwrap().current_lead_amount,
        400
    );
}

#[tokio::test]
async fn test_settlement_twice_in_succession() {
    let h = Harness::in_memory().await;
    let buyer = h.club("Buyer", 1000).await;
    let seller = h.club("Seller", 0).await;
    let (_, listing_id) = h.expiry_listing(seller, "F. Berg").await;
    h.market.place_bid(listing_id, buyer, 250).await.unwrap();
    h.advance(Duration::hours(25));

    let now = h.market.now();
    let (first, second) = tokio::join!(h.market.run_settlement(now), h.market.run_settlement(now));
    let (first, second) = (first.unwrap(), second.unwrap());

    let completed = first.count(SettlementOutcome::Completed) + second.count(SettlementOutcome::Completed);
    assert_eq!(completed, 1);
    assert_eq!(first.settled() + second.settled(), 1);
    assert_eq!(h.balance(buyer).await, 750);
    assert_eq!(h.balance(seller).await, 250);

    let third = h.market.run_settlement(now).await.unwrap();
    assert!(third.is_empty());
}

#[tokio::test]
async fn test_bids_rejected_after_window_and_on_terminal_listing() {
    let h = Harness::in_memory().await;
    let former = h.club("Former", 0).await;
    let buyer = h.club("Buyer", 1000).await;
    let (_, listing_id) = h.expiry_listing(former, "G. Lind").await;

    h.advance(Duration::hours(24));
    let err = h.market.place_bid(listing_id, buyer, 10).await.unwrap_err();
    assert!(matches!(err, MarketError::ListingNotActive(id) if id == listing_id));

    h.market.settle_now().await.unwrap();
    h.clock.set(t0());
    let err = h.market.place_bid(listing_id, buyer, 10).await.unwrap_err();
    assert!(matches!(err, MarketError::ListingNotActive(_)));
}

#[tokio::test]
async fn test_former_club_cannot_bid_on_expired_player() {
    let h = Harness::in_memory().await;
    let former = h.club("Former", 1000).await;
    let (_, listing_id) = h.expiry_listing(former, "H. Costa").await;

    let err = h.market.place_bid(listing_id, former, 50).await.unwrap_err();
    assert!(matches!(err, MarketError::SelfBidNotAllowed(id) if id == former));
}

#[tokio::test]
async fn test_transfer_list_expired_keeps_player_with_seller() {
    let h = Harness::in_memory().await;
    let seller = h.club("Seller", 0).await;
    let player = h.contracted_player(seller, "I. Kovac", today() + Duration::days(90)).await;

    let listing_id = h.market.open_auction(player, seller, 50, 120).await.unwrap();
    h.advance(Duration::minutes(120));
    let report = h.market.settle_now().await.unwrap();
    assert_eq!(report.outcomes[0].outcome, SettlementOutcome::Expired);

    assert_eq!(h.market.player(player).await.unwrap().club_id, Some(seller));
    assert_eq!(h.market.active_contract(player).await.unwrap().unwrap().club_id, seller);
    assert!(h.market.active_listings_for_player(player).await.unwrap().is_empty());

    // A new listing is allowed once the old one is terminal.
    let again = h.market.open_auction(player, seller, 50, 120).await.unwrap();
    assert_ne!(again, listing_id);
}

#[tokio::test]
async fn test_transfer_list_sale_supersedes_contract() {
    let h = Harness::in_memory().await;
    let seller = h.club("Seller", 0).await;
    let buyer = h.club("Buyer", 900).await;
    let player = h.contracted_player(seller, "J. Varga", today() + Duration::days(90)).await;

    let listing_id = h.market.open_auction(player, seller, 300, 60).await.unwrap();
    h.market.place_bid(listing_id, buyer, 300).await.unwrap();
    h.advance(Duration::minutes(60));
    h.market.settle_now().await.unwrap();

    let contract = h.market.active_contract(player).await.unwrap().unwrap();
    assert_eq!(contract.club_id, buyer);
    assert_eq!(contract.expiry_date, today() + Duration::days(7));
    assert_eq!(h.balance(seller).await, 300);
}

#[tokio::test]
async fn test_expiry_scan_is_idempotent_and_player_never_doubly_bound() {
    let h = Harness::in_memory().await;
    let former = h.club("Former", 0).await;
    let player = h.contracted_player(former, "K. Ito", today()).await;

    let first = h.market.run_daily_expiry(today()).await.unwrap();
    let second = h.market.run_daily_expiry(today()).await.unwrap();
    assert_eq!(first.listings_opened, 1);
    assert_eq!(second.listings_opened, 0);

    let p = h.market.player(player).await.unwrap();
    let contract = h.market.active_contract(player).await.unwrap();
    assert!(p.is_unattached());
    assert!(contract.is_none());
    assert_eq!(h.market.active_listings_for_player(player).await.unwrap().len(), 1);
}
