// =============================================================================
// Blockchain Event Projector (C8) — crash-safe, at-least-once log scanning
// with exactly-once materialization into the Order State Store
// =============================================================================
//
// Grounded on the pack's only real on-chain log-scanning code (the morpho
// examples in `makeroftools-hypersdk-graphql`): a `Filter` per event
// signature, `provider.get_logs`, decode via `decode_log_data`, with a
// `Semaphore`-gated concurrent fetch once a block range grows large enough
// to be worth sharding.
//
// One poll cycle: read the cursor, compute the gap to chain head, fetch
// every log in range for all four topics, sort by `(blockNumber,
// logIndex)`, apply each inside one transaction together with the cursor
// advance, commit. A failed apply leaves the cursor untouched so the next
// poll re-fetches the same range (at-least-once); the ledger's
// `(tx_hash, log_index)` uniqueness makes replay exactly-once at the
// `orders` table (spec §4.8).
// =============================================================================

pub mod apply;
pub mod contract_cache;
pub mod cursor;
pub mod events;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address as AlloyAddress;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Filter;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::ComponentCursor;
use contract_cache::OrderCache;
use cursor::{COMPONENT_NAME, MAX_CONCURRENT_SHARD_FETCHES};
use events::{DecodedLog, TOPICS};

/// How often the order/token contract caches are dropped (spec §4.8
/// "Caches": cleared hourly to bound memory and reflect token-metadata
/// changes).
const CACHE_CLEAR_INTERVAL: Duration = Duration::from_secs(3600);

/// A log whose ABI decode failed. Metadata is still pulled from the raw
/// `Log` so it can be marked processed in the ledger without ever touching
/// `orders` — the poison-pill path (spec §4.8 step 4).
struct PoisonLog {
    tx_hash: String,
    log_index: i64,
    reason: String,
}

/// Spawn the projector's polling loop and the independent expiry sweeper,
/// sharing a process-local lock so the two never write concurrently.
pub fn spawn(store: Arc<Store>, chain: ChainConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let provider = ProviderBuilder::new()
        .connect_http(chain.web3_provider.parse().map_err(|e| Error::Chain(format!("bad WEB3_PROVIDER url: {e}")))?);
    let contract_address: AlloyAddress = chain
        .trading_address
        .parse()
        .map_err(|e| Error::Chain(format!("bad TRADING_ADDRESS: {e}")))?;

    let lock = Arc::new(Mutex::new(()));
    let order_cache = Arc::new(OrderCache::new());
    sweeper::spawn(store.clone(), lock.clone(), shutdown.clone());
    spawn_cache_clear_loop(order_cache.clone(), shutdown.clone());
    spawn_poll_loop(store, provider, contract_address, chain, order_cache, lock, shutdown);
    Ok(())
}

/// Hourly contract-cache eviction, independent of the poll loop so a slow
/// or back-pressured chain scan never delays clearing stale entries.
fn spawn_cache_clear_loop(order_cache: Arc<OrderCache>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CACHE_CLEAR_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => order_cache.clear(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

fn spawn_poll_loop(
    store: Arc<Store>,
    provider: RootProvider,
    contract_address: AlloyAddress,
    chain: ChainConfig,
    order_cache: Arc<OrderCache>,
    lock: Arc<Mutex<()>>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(chain.poll_interval_secs));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let _guard = lock.lock().await;
                    if let Err(e) = poll_once(&store, &provider, contract_address, &chain, &order_cache).await {
                        error!(error = %e, "projector poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("projector shutting down");
                        break;
                    }
                }
            }
        }
    });
}

async fn poll_once(
    store: &Store,
    provider: &RootProvider,
    contract_address: AlloyAddress,
    chain: &ChainConfig,
    order_cache: &OrderCache,
) -> Result<()> {
    let head = provider
        .get_block_number()
        .await
        .map_err(|e| Error::Chain(format!("get_block_number failed: {e}")))?;
    let head = head as i64;

    let cursor = load_or_init_cursor(store, head).await?;

    let from_block = cursor.last_processed_block + 1;
    if from_block > head {
        if cursor.status != crate::types::CursorStatus::Active {
            info!(component = %cursor.component_name, block = cursor.last_processed_block, "projector caught up to head, clearing non-active cursor status");
            let recovered = cursor::mark_recovered(&cursor, chrono::Utc::now());
            crate::store::orders::save_component_cursor(&store.pool, &recovered).await?;
        }
        return Ok(());
    }
    let to_block = (from_block + chain.max_block_range as i64 - 1).min(head);

    let (mut logs, poisoned) = if cursor::should_fetch_in_parallel(from_block, to_block) {
        fetch_parallel(provider, contract_address, from_block, to_block).await?
    } else {
        fetch_sequential(provider, contract_address, from_block, to_block).await?
    };

    events::sort_by_block_and_log_index(&mut logs);

    match apply_batch(store, provider, contract_address, order_cache, &cursor, &logs, &poisoned, to_block).await {
        Ok(()) => {
            if !logs.is_empty() || !poisoned.is_empty() {
                info!(from_block, to_block, applied = logs.len(), poisoned = poisoned.len(), "applied projector batch");
            }
        }
        Err(e) => {
            error!(error = %e, from_block, to_block, "projector batch failed, marking cursor ERROR");
            let errored = cursor::mark_error(&cursor, chrono::Utc::now());
            crate::store::orders::save_component_cursor(&store.pool, &errored).await?;
            return Err(e);
        }
    }

    Ok(())
}

/// Resolve the cursor to scan from, per spec §4.8's transition table: an
/// absent cursor starts `WARMUP_BLOCKS` behind head; a cursor left ahead of
/// the chain head (a reorg shorter than what was already scanned) is reset
/// down to head rather than waiting on a block range that will never come.
async fn load_or_init_cursor(store: &Store, head: i64) -> Result<ComponentCursor> {
    match crate::store::orders::get_component_cursor(&store.pool, COMPONENT_NAME).await? {
        Some(c) if c.last_processed_block > head => {
            warn!(saved_block = c.last_processed_block, head, "cursor ahead of chain head, reorg shorter than cursor — resetting");
            let reset = cursor::reset(&c, head, chrono::Utc::now());
            crate::store::orders::save_component_cursor(&store.pool, &reset).await?;
            Ok(reset)
        }
        Some(c) => Ok(c),
        None => {
            let start = (head - cursor::WARMUP_BLOCKS).max(0);
            let initial = crate::store::orders::initial_cursor(COMPONENT_NAME, start, chrono::Utc::now());
            crate::store::orders::save_component_cursor(&store.pool, &initial).await?;
            Ok(initial)
        }
    }
}

async fn fetch_sequential(
    provider: &RootProvider,
    contract_address: AlloyAddress,
    from_block: i64,
    to_block: i64,
) -> Result<(Vec<DecodedLog>, Vec<PoisonLog>)> {
    let mut out = Vec::new();
    let mut poisoned = Vec::new();
    for topic in TOPICS {
        let filter = Filter::new()
            .address(contract_address)
            .event_signature(events::signature_hash(topic))
            .from_block(from_block as u64)
            .to_block(to_block as u64);
        let logs = provider.get_logs(&filter).await.map_err(|e| Error::Chain(format!("get_logs({topic}) failed: {e}")))?;
        for log in logs {
            decode_or_poison(&log, &mut out, &mut poisoned);
        }
    }
    Ok((out, poisoned))
}

/// Large-gap path: shard the block range and fan the four topics out
/// across a bounded number of concurrent requests, gated by a semaphore so
/// catch-up after downtime doesn't overrun the RPC provider's own rate
/// limits.
async fn fetch_parallel(
    provider: &RootProvider,
    contract_address: AlloyAddress,
    from_block: i64,
    to_block: i64,
) -> Result<(Vec<DecodedLog>, Vec<PoisonLog>)> {
    let shard_size = ((to_block - from_block + 1) as u64 / MAX_CONCURRENT_SHARD_FETCHES as u64).max(1);
    let shards = cursor::shard_range(from_block, to_block, shard_size);
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_SHARD_FETCHES));

    let mut handles = Vec::new();
    for (shard_from, shard_to) in shards {
        for topic in TOPICS {
            let provider = provider.clone();
            let semaphore = semaphore.clone();
            let filter = Filter::new()
                .address(contract_address)
                .event_signature(events::signature_hash(topic))
                .from_block(shard_from as u64)
                .to_block(shard_to as u64);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                provider.get_logs(&filter).await
            }));
        }
    }

    let mut out = Vec::new();
    let mut poisoned = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(logs)) => {
                for log in logs {
                    decode_or_poison(&log, &mut out, &mut poisoned);
                }
            }
            Ok(Err(e)) => warn!(error = %e, "shard fetch failed"),
            Err(e) => warn!(error = %e, "shard task panicked"),
        }
    }
    Ok((out, poisoned))
}

fn decode_or_poison(log: &alloy::rpc::types::Log, out: &mut Vec<DecodedLog>, poisoned: &mut Vec<PoisonLog>) {
    match events::decode(log) {
        Ok(decoded) => out.push(decoded),
        Err(reason) => {
            warn!(reason, "failed to decode projector log, will be recorded as poison pill");
            if let (Some(tx_hash), Some(log_index)) = (
                log.transaction_hash.map(|h| format!("{h:#x}")),
                log.log_index,
            ) {
                poisoned.push(PoisonLog { tx_hash, log_index: log_index as i64, reason });
            } else {
                warn!("poison log missing tx_hash/log_index, cannot record in ledger — will be re-fetched every poll");
            }
        }
    }
}

async fn apply_batch(
    store: &Store,
    provider: &RootProvider,
    contract_address: AlloyAddress,
    order_cache: &OrderCache,
    cursor: &ComponentCursor,
    logs: &[DecodedLog],
    poisoned: &[PoisonLog],
    to_block: i64,
) -> Result<()> {
    let mut tx = store.begin().await?;

    for log in logs {
        apply::apply_log(&mut tx, log, provider, contract_address, order_cache).await?;
    }
    for poison in poisoned {
        apply::apply_poison_pill(&mut tx, &poison.tx_hash, poison.log_index, &poison.reason).await?;
    }

    let last_tx_hash = logs.last().map(|l| l.tx_hash.clone());
    let advanced = cursor::advance(cursor, to_block, last_tx_hash.or_else(|| cursor.last_tx_hash.clone()), chrono::Utc::now());
    crate::store::orders::save_component_cursor(&mut *tx, &advanced).await?;

    tx.commit().await?;
    Ok(())
}
