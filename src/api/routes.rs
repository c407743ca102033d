//! API route handlers.
//!
//! All endpoints return JSON. State is the shared `TransferMarket`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::engine::settlement::SettlementReport;
use crate::market::TransferMarket;
use crate::types::{
    Bid, BidId, Club, ClubId, ExpirySummary, LedgerEntry, Listing, ListingId, MarketError,
    PlayerId,
};

pub type AppState = Arc<TransferMarket>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A `MarketError` on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub MarketError);

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            MarketError::ListingNotFound(_)
            | MarketError::ClubNotFound(_)
            | MarketError::PlayerNotFound(_) => StatusCode::NOT_FOUND,
            MarketError::BidTooLow { .. }
            | MarketError::InvalidAmount(_)
            | MarketError::InvalidWindow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            MarketError::AlreadyListed { .. }
            | MarketError::ListingNotActive(_)
            | MarketError::SelfBidNotAllowed(_)
            | MarketError::AlreadyContracted(_)
            | MarketError::NotOwner { .. }
            | MarketError::InsufficientFunds { .. }
            | MarketError::SquadFull { .. } => StatusCode::CONFLICT,
            MarketError::DateOutOfRange(_) | MarketError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAuctionRequest {
    pub player_id: PlayerId,
    pub selling_club_id: ClubId,
    pub starting_price: i64,
    pub window_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAuctionResponse {
    pub listing_id: ListingId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBidRequest {
    pub club_id: ClubId,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceBidResponse {
    pub bid_id: BidId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpiryRequest {
    /// Defaults to today by the market clock.
    pub date: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/listings
pub async fn open_auction(
    State(market): State<AppState>,
    Json(req): Json<OpenAuctionRequest>,
) -> ApiResult<(StatusCode, Json<OpenAuctionResponse>)> {
    let listing_id = market
        .open_auction(req.player_id, req.selling_club_id, req.starting_price, req.window_minutes)
        .await?;
    Ok((StatusCode::CREATED, Json(OpenAuctionResponse { listing_id })))
}

/// GET /api/listings/:id
pub async fn get_listing(
    State(market): State<AppState>,
    Path(id): Path<ListingId>,
) -> ApiResult<Json<Listing>> {
    Ok(Json(market.get_listing(id).await?))
}

/// POST /api/listings/:id/bids
pub async fn place_bid(
    State(market): State<AppState>,
    Path(id): Path<ListingId>,
    Json(req): Json<PlaceBidRequest>,
) -> ApiResult<(StatusCode, Json<PlaceBidResponse>)> {
    let bid_id = market.place_bid(id, req.club_id, req.amount).await?;
    Ok((StatusCode::CREATED, Json(PlaceBidResponse { bid_id })))
}

/// GET /api/listings/:id/bids
pub async fn get_bids(
    State(market): State<AppState>,
    Path(id): Path<ListingId>,
) -> ApiResult<Json<Vec<Bid>>> {
    Ok(Json(market.bids_for_listing(id).await?))
}

/// GET /api/players/:id/listings
pub async fn get_player_listings(
    State(market): State<AppState>,
    Path(id): Path<PlayerId>,
) -> ApiResult<Json<Vec<Listing>>> {
    market.player(id).await?;
    Ok(Json(market.active_listings_for_player(id).await?))
}

/// GET /api/clubs/:id
pub async fn get_club(
    State(market): State<AppState>,
    Path(id): Path<ClubId>,
) -> ApiResult<Json<Club>> {
    Ok(Json(market.club(id).await?))
}

/// GET /api/clubs/:id/ledger
pub async fn get_club_ledger(
    State(market): State<AppState>,
    Path(id): Path<ClubId>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    market.club(id).await?;
    Ok(Json(market.ledger_entries(id).await?))
}

/// POST /api/admin/expiry
pub async fn run_expiry(
    State(market): State<AppState>,
    body: Option<Json<ExpiryRequest>>,
) -> ApiResult<Json<ExpirySummary>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let date = req.date.unwrap_or_else(|| market.now().date_naive());
    Ok(Json(market.run_daily_expiry(date).await?))
}

/// POST /api/admin/settlement
pub async fn run_settlement(State(market): State<AppState>) -> ApiResult<Json<SettlementReport>> {
    Ok(Json(market.settle_now().await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError(MarketError::ListingNotFound(1)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(MarketError::BidTooLow { amount: 1, minimum: 2 }).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError(MarketError::AlreadyListed { player_id: 3 }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(MarketError::Storage(sqlx::Error::PoolTimedOut)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError(MarketError::DateOutOfRange("signing contract expiry".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_expiry_request_date_optional() {
        let req: ExpiryRequest = serde_json::from_str("{}").unwrap();
        assert!(req.date.is_none());

        let req: ExpiryRequest = serde_json::from_str(r#"{"date":"2026-06-30"}"#).unwrap();
        assert_eq!(req.date, NaiveDate::from_ymd_opt(2026, 6, 30));
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let resp = ApiError(MarketError::SelfBidNotAllowed(4)).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("own listing"));
    }
}
