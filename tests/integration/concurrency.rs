//! Races over a file-backed database with several pooled connections.

use chrono::Duration;
use futures::future::join_all;

use transfer_market::types::{MarketError, SettlementOutcome};

use crate::support::Harness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlement_settles_once() {
    let h = Harness::on_disk(8).await;
    let buyer = h.club("Buyer", 1000).await;
    let seller = h.club("Seller", 0).await;
    let (player, listing_id) = h.expiry_listing(seller, "L. Moreau").await;
    h.market.place_bid(listing_id, buyer, 500).await.unwrap();
    h.advance(Duration::hours(24));

    let supply = h.money_supply().await;
    let now = h.market.now();
    let sweeps = (0..6).map(|_| {
        let market = h.market.clone();
        tokio::spawn(async move { market.run_settlement(now).await })
    });
    let reports: Vec<_> = join_all(sweeps)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let completed: usize = reports
        .iter()
        .map(|r| r.count(SettlementOutcome::Completed))
        .sum();
    let failed: usize = reports
        .iter()
        .map(|r| r.count(SettlementOutcome::Failed))
        .sum();
    assert_eq!(completed, 1);
    assert_eq!(failed, 0);

    assert_eq!(h.balance(buyer).await, 500);
    assert_eq!(h.balance(seller).await, 500);
    assert_eq!(h.money_supply().await, supply);
    assert_eq!(h.market.ledger_entries(seller).await.unwrap().len(), 1);
    assert_eq!(h.market.player(player).await.unwrap().club_id, Some(buyer));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bids_keep_single_leader() {
    let h = Harness::on_disk(8).await;
    let seller = h.club("Seller", 0).await;
    let mut bidders = Vec::new();
    for i in 0..8 {
        bidders.push(h.club(&format!("Bidder {i}"), 10_000).await);
    }
    let (_, listing_id) = h.expiry_listing(seller, "M. Duarte").await;

    let attempts = bidders.iter().enumerate().map(|(i, &club)| {
        let market = h.market.clone();
        let amount = 100 + (i as i64) * 37 % 250;
        tokio::spawn(async move { market.place_bid(listing_id, club, amount).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, MarketError::BidTooLow { .. }),
                "unexpected bid error: {e}"
            );
        }
    }
    assert!(results.iter().any(|r| r.is_ok()));

    let bids = h.market.bids_for_listing(listing_id).await.unwrap();
    let leaders: Vec<_> = bids.iter().filter(|b| b.is_leader).collect();
    assert_eq!(leaders.len(), 1);

    // Accepted amounts strictly increase in acceptance order and the
    // leader holds the highest one.
    for pair in bids.windows(2) {
        assert!(pair[1].amount > pair[0].amount);
    }
    let top = bids.last().unwrap();
    assert_eq!(leaders[0].id, top.id);

    let listing = h.market.get_listing(listing_id).await.unwrap();
    assert_eq!(listing.leader_bid_id, Some(top.id));
    assert_eq!(listing.current_lead_amount, top.amount);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_money_conserved_across_many_settlements() {
    let h = Harness::on_disk(4).await;
    let seller = h.club("Seller", 0).await;
    let rich = h.club("Rich", 5_000).await;
    let poor = h.club("Poor", 150).await;

    let mut listings = Vec::new();
    for i in 0..5 {
        let (_, id) = h.expiry_listing(seller, &format!("Player {i}")).await;
        listings.push(id);
    }
    for (i, &id) in listings.iter().enumerate() {
        h.market.place_bid(id, poor, 100).await.unwrap();
        if i % 2 == 0 {
            h.market.place_bid(id, rich, 200 + i as i64).await.unwrap();
        }
    }

    let supply = h.money_supply().await;
    h.advance(Duration::hours(24));
    let now = h.market.now();
    let (a, b) = tokio::join!(h.market.run_settlement(now), h.market.run_settlement(now));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.settled() + b.settled(), listings.len());
    assert_eq!(h.money_supply().await, supply);

    // Rich wins three; Poor can afford only the first of its two.
    let completed = a.count(SettlementOutcome::Completed) + b.count(SettlementOutcome::Completed);
    let cancelled = a.count(SettlementOutcome::Cancelled) + b.count(SettlementOutcome::Cancelled);
    assert_eq!(completed, 4);
    assert_eq!(cancelled, 1);
    assert_eq!(h.balance(poor).await, 50);
    assert_eq!(h.balance(rich).await, 5_000 - 200 - 202 - 204);
}
