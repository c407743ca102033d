//! HTTP API: Axum server in front of the transfer market.
//!
//! JSON in, JSON out. CORS is open for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use routes::AppState;

/// Serve the API on `port` until `shutdown` flips to true.
pub async fn serve(state: AppState, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("API server error")?;

    info!("API server stopped");
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/listings", post(routes::open_auction))
        .route("/api/listings/:id", get(routes::get_listing))
        .route(
            "/api/listings/:id/bids",
            get(routes::get_bids).post(routes::place_bid),
        )
        .route("/api/players/:id/listings", get(routes::get_player_listings))
        .route("/api/clubs/:id", get(routes::get_club))
        .route("/api/clubs/:id/ledger", get(routes::get_club_ledger))
        .route("/api/admin/expiry", post(routes::run_expiry))
        .route("/api/admin/settlement", post(routes::run_settlement))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
