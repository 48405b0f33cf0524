// =============================================================================
// Klines ingestion worker — historical catch-up then realtime polling
// =============================================================================
//
// One task per configured symbol. Phase one replays history from the
// stored cursor up to "now" in `BATCH_SIZE` pages, persisting every page
// before moving on so a crash mid-catch-up resumes rather than re-walking
// from genesis. Phase two polls the most recent minutes on a fixed
// interval and publishes every closed candle onto the bus for the fan-out
// hub to pick up.
//
// The cursor reuses the Order State Store's `system_state` table (keyed by
// `ingestion:klines:{symbol}`) rather than a bespoke ingestion-cursor
// table — `last_processed_block` holds the last fetched candle's open
// time in milliseconds instead of a block number, which is a convenient
// repurposing since the column is already a bare `i64` the projector
// itself doesn't otherwise distinguish.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bus::Bus;
use crate::ingestion::exchange::{ExchangeClient, FetchOutcome};
use crate::store::Store;

const REALTIME_INTERVAL: Duration = Duration::from_millis(500);
const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

fn component_name(symbol: &str) -> String {
    format!("ingestion:klines:{symbol}")
}

pub fn spawn(
    store: Arc<Store>,
    bus: Arc<Bus>,
    client: ExchangeClient,
    symbol: String,
    batch_size: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        if let Err(e) = catch_up(&store, &client, &symbol, batch_size, &mut shutdown).await {
            error!(symbol, error = %e, "klines catch-up aborted");
        }
        if *shutdown.borrow() {
            return;
        }
        realtime_loop(store, bus, client, symbol, shutdown).await;
    });
}

async fn catch_up(
    store: &Store,
    client: &ExchangeClient,
    symbol: &str,
    batch_size: u32,
    shutdown: &mut watch::Receiver<bool>,
) -> crate::error::Result<()> {
    let name = component_name(symbol);
    let mut cursor_block = match crate::store::orders::get_component_cursor(&store.pool, &name).await? {
        Some(c) => c.last_processed_block,
        None => 0,
    };

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        if cursor_block >= now_ms - REALTIME_INTERVAL.as_millis() as i64 {
            break;
        }

        let candles = match fetch_with_retry(client, symbol, cursor_block, batch_size).await {
            Some(c) => c,
            None => {
                warn!(symbol, "klines catch-up page exhausted retries, stopping catch-up for now");
                return Ok(());
            }
        };
        if candles.is_empty() {
            break;
        }

        let mut tx = store.begin().await?;
        for candle in &candles {
            crate::store::market::upsert_candle(&mut *tx, candle).await?;
        }
        let next_cursor = candles.last().unwrap().bucket_start_ms + 60_000;
        let advanced = crate::store::orders::initial_cursor(&name, next_cursor, chrono::Utc::now());
        crate::store::orders::save_component_cursor(&mut *tx, &advanced).await?;
        tx.commit().await?;

        cursor_block = next_cursor;
        info!(symbol, cursor_block, count = candles.len(), "klines catch-up page applied");
    }

    info!(symbol, "klines catch-up complete, switching to realtime polling");
    Ok(())
}

async fn realtime_loop(store: Arc<Store>, bus: Arc<Bus>, client: ExchangeClient, symbol: String, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(REALTIME_INTERVAL);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = realtime_pass(&store, &bus, &client, &symbol).await {
                    error!(symbol, error = %e, "klines realtime pass failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn realtime_pass(store: &Store, bus: &Bus, client: &ExchangeClient, symbol: &str) -> crate::error::Result<()> {
    let start = chrono::Utc::now().timestamp_millis() - Duration::from_secs(5 * 60).as_millis() as i64;
    let Some(candles) = fetch_with_retry(client, symbol, start, 10).await else {
        return Ok(());
    };

    for candle in &candles {
        crate::store::market::upsert_candle(&store.pool, candle).await?;
        if candle.is_closed {
            bus.publish(&format!("candles:{symbol}"), serde_json::to_value(candle).unwrap_or_default());
            bus.publish("candles:all", serde_json::to_value(candle).unwrap_or_default());
        }
    }
    Ok(())
}

/// Fetch one page, retrying on transient failure: exponential back-off on
/// HTTP 429 (the rate limiter's own signal), fixed `BASE_BACKOFF` delay on
/// any other error, up to `MAX_RETRIES` attempts. `None` once retries are
/// exhausted.
async fn fetch_with_retry(
    client: &ExchangeClient,
    symbol: &str,
    start_time_ms: i64,
    limit: u32,
) -> Option<Vec<crate::market_data::Candle>> {
    let mut attempt = 0;
    loop {
        match client.get_klines(symbol, start_time_ms, limit).await {
            FetchOutcome::Ok(candles) => return Some(candles),
            FetchOutcome::TooManyRequests => {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    return None;
                }
                let delay = BASE_BACKOFF * 2u32.pow(attempt.min(6));
                warn!(symbol, attempt, "klines 429, backing off {delay:?}");
                tokio::time::sleep(delay).await;
            }
            FetchOutcome::Error(e) => {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    warn!(symbol, error = %e, "klines fetch retries exhausted");
                    return None;
                }
                warn!(symbol, error = %e, attempt, "klines fetch failed, retrying");
                tokio::time::sleep(BASE_BACKOFF).await;
            }
        }
    }
}
