// =============================================================================
// Orderbook ingestion worker — periodic depth polling
// =============================================================================
//
// No history to catch up on: order-book depth is a live-only snapshot, so
// this worker is just a fixed-interval poll, persist, publish loop per
// configured symbol, with the same retry policy shape as klines (spec §4.6
// applies uniformly across ingestion call families).
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, warn};

use crate::bus::Bus;
use crate::ingestion::exchange::{ExchangeClient, FetchOutcome};
use crate::market_data::OrderbookCache;
use crate::store::Store;

pub fn spawn(
    store: Arc<Store>,
    bus: Arc<Bus>,
    cache: Arc<OrderbookCache>,
    client: ExchangeClient,
    symbol: String,
    levels: u32,
    update_interval: Duration,
    retry_delay: Duration,
    max_retries: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(update_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match fetch_with_retry(&client, &symbol, levels, retry_delay, max_retries).await {
                        Some(snapshot) => {
                            if let Err(e) = crate::store::market::upsert_orderbook(&store.pool, &snapshot).await {
                                error!(symbol, error = %e, "failed to persist orderbook snapshot");
                            }
                            cache.put(snapshot.clone());
                            bus.publish(&format!("orderbook:{symbol}"), serde_json::to_value(&snapshot).unwrap_or_default());
                            bus.publish("orderbook:all", serde_json::to_value(&snapshot).unwrap_or_default());
                        }
                        None => warn!(symbol, "orderbook fetch retries exhausted for this tick"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

async fn fetch_with_retry(
    client: &ExchangeClient,
    symbol: &str,
    levels: u32,
    retry_delay: Duration,
    max_retries: u32,
) -> Option<crate::market_data::OrderbookSnapshot> {
    let mut attempt = 0;
    loop {
        match client.get_depth(symbol, levels).await {
            FetchOutcome::Ok(snapshot) => return Some(snapshot),
            FetchOutcome::TooManyRequests => {
                attempt += 1;
                if attempt >= max_retries {
                    return None;
                }
                tokio::time::sleep(retry_delay * 2u32.pow(attempt.min(6))).await;
            }
            FetchOutcome::Error(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    warn!(symbol, error = %e, "depth fetch retries exhausted");
                    return None;
                }
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
