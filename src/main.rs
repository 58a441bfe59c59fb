// region:    --- Imports
use crate::database::DatabaseManager;
use crate::payment::code::{CodeDelivery, LogCodeDelivery};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
// endregion: --- Imports

// region:    --- Modules
mod auth;
mod bidding;
mod database;
mod error;
mod handlers;
mod notify;
mod payment;
mod query;
mod settlement;

// endregion: --- Modules

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    // connection pool
    let db_manager = Arc::new(DatabaseManager::new().await?);

    // schema bootstrap
    if let Err(e) = db_manager.initialize_database().await {
        error!("{:<12} --> schema initialization failed: {:?}", "Main", e);
        return Err(e.into());
    }
    info!("{:<12} --> schema ready", "Main");

    // background settlement loop
    let scheduler = settlement::SettlementScheduler::new(db_manager.get_pool());
    scheduler.start().await;

    // verification codes go to the log until a provider is wired up
    let code_delivery: Arc<dyn CodeDelivery> = Arc::new(LogCodeDelivery);

    // cors for the browser UI
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // routes
    let routes_all = Router::new()
        .route("/bids", post(handlers::handle_place_bid))
        .route("/settlement/run", post(handlers::handle_run_settlement))
        .route(
            "/settlement/reminders",
            post(handlers::handle_send_reminders),
        )
        .route(
            "/payments/initiate",
            post(handlers::handle_initiate_payment),
        )
        .route("/payments/verify", post(handlers::handle_verify_payment))
        .route("/listings", get(handlers::handle_get_listings))
        .route("/listings/:id", get(handlers::handle_get_listing))
        .route("/listings/:id/bids", get(handlers::handle_get_listing_bids))
        .route(
            "/listings/:id/highest-bid",
            get(handlers::handle_get_highest_bid),
        )
        .route(
            "/listings/:id/winning-bid",
            get(handlers::handle_get_winning_bid),
        )
        .route("/wallet/balance", get(handlers::handle_get_balance))
        .route(
            "/wallet/transactions",
            get(handlers::handle_get_transactions),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 2))
        .with_state((db_manager, code_delivery));

    // listener
    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    // serve
    if let Err(err) = axum::serve(listener, routes_all.into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}
// endregion: --- Main
