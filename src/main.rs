// =============================================================================
// Market Data & Order Projection Engine — Main Entry Point
// =============================================================================
//
// Startup order: load config, open both connection pools, spawn ingestion
// workers, spawn the blockchain event projector, spawn the liveness
// supervisor and fan-out bridge, then serve the API. Everything after
// config load runs until the process receives Ctrl+C, at which point the
// shutdown watch channel is flipped and every loop winds down within one
// of its own polling intervals.
// =============================================================================

mod api;
mod app_state;
mod bus;
mod config;
mod decimal;
mod error;
mod hub;
mod ingestion;
mod market_data;
mod projector;
mod store;
mod timeframe;
mod types;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::bus::Bus;
use crate::config::Config;
use crate::hub::{fanout, liveness};
use crate::hub::registry::SubscriptionRegistry;
use crate::market_data::OrderbookCache;
use crate::store::{Store, PROJECTOR_POOL_MAX, PROJECTOR_POOL_MIN, READ_POOL_MAX, READ_POOL_MIN};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("market data and order projection engine starting up");

    let config = Config::load()?;

    let read_store = Arc::new(Store::connect(&config.db, READ_POOL_MIN, READ_POOL_MAX).await?);
    let projector_store = Arc::new(Store::connect(&config.db, PROJECTOR_POOL_MIN, PROJECTOR_POOL_MAX).await?);

    let bus = Bus::new();
    let registry = SubscriptionRegistry::new();
    let orderbook_cache = OrderbookCache::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    ingestion::spawn_all(read_store.clone(), bus.clone(), orderbook_cache.clone(), &config.ingestion, shutdown_rx.clone());

    if let Err(e) = projector::spawn(projector_store.clone(), config.chain.clone(), shutdown_rx.clone()) {
        error!(error = %e, "failed to start blockchain event projector");
        return Err(e.into());
    }

    liveness::spawn(registry.clone(), config.liveness.clone(), shutdown_rx.clone());
    fanout::spawn(bus.clone(), registry.clone());

    let state = AppState::new(read_store.clone(), registry.clone(), orderbook_cache.clone());
    let bind_addr = format!("{}:{}", config.api_host, config.api_port);

    let server_handle = {
        let state = state.clone();
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(state);
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "failed to bind API server");
                    return;
                }
            };
            info!(addr = %bind_addr, "API server listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "API server exited with error");
            }
        })
    };

    info!("all subsystems running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    let _ = shutdown_tx.send(true);
    server_handle.abort();

    info!("engine shut down complete");
    Ok(())
}
