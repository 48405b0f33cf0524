pub mod exchange;
pub mod klines;
pub mod orderbook;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bus::Bus;
use crate::config::IngestionConfig;
use crate::market_data::OrderbookCache;
use crate::store::Store;
use exchange::ExchangeClient;

/// Spawn one klines worker and one orderbook worker per configured
/// symbol. Both worker families share a single `ExchangeClient` per
/// process so the weight-based rate limiter tracks usage across the whole
/// service rather than per symbol.
pub fn spawn_all(store: Arc<Store>, bus: Arc<Bus>, cache: Arc<OrderbookCache>, config: &IngestionConfig, shutdown: watch::Receiver<bool>) {
    let client = ExchangeClient::new(config.binance_base_url.clone());

    for symbol in &config.symbols {
        klines::spawn(store.clone(), bus.clone(), client.clone(), symbol.clone(), config.batch_size, shutdown.clone());
    }

    for symbol in &config.orderbook_symbols {
        orderbook::spawn(
            store.clone(),
            bus.clone(),
            cache.clone(),
            client.clone(),
            symbol.clone(),
            config.orderbook_levels,
            Duration::from_secs(config.orderbook_update_interval_secs),
            Duration::from_secs(config.orderbook_retry_delay_secs),
            config.orderbook_max_retries,
            shutdown.clone(),
        );
    }
}
