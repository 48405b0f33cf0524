// =============================================================================
// Fan-out Hub — bridges the pub/sub bus into the subscription registry
// =============================================================================
//
// Consumes `candles:all` and `orderbook:all` from the bus and dispatches
// each message through the registry: folding 1-minute candles into every
// active aggregator for that symbol, and broadcasting the raw stream to
// the `symbol="all"` wildcard per spec §3/§4.4.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::Bus;
use crate::hub::registry::{fingerprint, SubscriptionRegistry};
use crate::market_data::{Candle, OrderbookSnapshot};
use crate::types::SubscriptionKind;

/// Orderbook subscriptions never aggregate, so every client for a symbol is
/// routed onto one fixed timeframe slot regardless of what it requested —
/// there is no bucket to disagree about.
const ORDERBOOK_TIMEFRAME_SLOT: &str = "1";

pub fn spawn(bus: Arc<Bus>, registry: Arc<SubscriptionRegistry>) {
    {
        let bus = bus.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut rx = bus.subscribe("candles:all");
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if let Ok(candle) = serde_json::from_value::<Candle>(msg.payload) {
                            dispatch_candle(&registry, &candle);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "fan-out candle consumer lagged, messages dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    {
        tokio::spawn(async move {
            let mut rx = bus.subscribe("orderbook:all");
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if let Ok(snapshot) = serde_json::from_value::<OrderbookSnapshot>(msg.payload) {
                            dispatch_orderbook(&registry, &snapshot);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "fan-out orderbook consumer lagged, messages dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

fn dispatch_candle(registry: &SubscriptionRegistry, candle: &Candle) {
    let wildcard_key = fingerprint("all", "1", SubscriptionKind::Candles);
    registry.broadcast(&wildcard_key, serde_json::to_value(candle).unwrap_or_default());

    for key in registry.candle_keys() {
        if !key.starts_with(&format!("{}:", candle.symbol)) {
            continue;
        }
        if let Some(closed) = registry.fold_candle(&key, candle) {
            debug!(key, "bucket closed, broadcasting");
            registry.broadcast(&key, serde_json::to_value(&closed).unwrap_or_default());
        }
    }
}

fn dispatch_orderbook(registry: &SubscriptionRegistry, snapshot: &OrderbookSnapshot) {
    let payload = serde_json::to_value(snapshot).unwrap_or_default();
    let symbol_key = fingerprint(&snapshot.symbol, ORDERBOOK_TIMEFRAME_SLOT, SubscriptionKind::Orderbook);
    let wildcard_key = fingerprint("all", ORDERBOOK_TIMEFRAME_SLOT, SubscriptionKind::Orderbook);
    registry.broadcast(&symbol_key, payload.clone());
    registry.broadcast(&wildcard_key, payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Dec8;
    use crate::hub::registry::Subscription;
    use crate::timeframe::Timeframe;
    use tokio::sync::mpsc;

    fn minute(symbol: &str, ts: i64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            bucket_start_ms: ts,
            open: Dec8::ZERO,
            high: Dec8::ZERO,
            low: Dec8::ZERO,
            close: Dec8::ZERO,
            volume: Dec8::ZERO,
            quote_volume: Dec8::ZERO,
            trades: 1,
            is_closed: true,
        }
    }

    #[test]
    fn dispatch_candle_folds_into_matching_symbol_aggregator_only() {
        let registry = SubscriptionRegistry::new();
        registry.ensure_aggregator("BTCUSDT", Timeframe::M5);
        registry.ensure_aggregator("ETHUSDT", Timeframe::M5);

        dispatch_candle(&registry, &minute("BTCUSDT", 0));

        let btc_key = fingerprint("BTCUSDT", "5", SubscriptionKind::Candles);
        let eth_key = fingerprint("ETHUSDT", "5", SubscriptionKind::Candles);
        assert!(registry.peek(&btc_key).is_some());
        assert!(registry.peek(&eth_key).is_none());
    }

    #[test]
    fn dispatch_candle_reaches_wildcard_subscriber() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = Subscription::new("all".into(), "1".into(), SubscriptionKind::Candles, tx, 0);
        registry.add(sub);

        dispatch_candle(&registry, &minute("BTCUSDT", 0));
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg["symbol"], "BTCUSDT");
    }

    #[test]
    fn dispatch_orderbook_reaches_symbol_and_wildcard() {
        let registry = SubscriptionRegistry::new();
        let (tx_sym, mut rx_sym) = mpsc::unbounded_channel();
        let (tx_all, mut rx_all) = mpsc::unbounded_channel();
        registry.add(Subscription::new("BTCUSDT".into(), "1".into(), SubscriptionKind::Orderbook, tx_sym, 0));
        registry.add(Subscription::new("all".into(), "1".into(), SubscriptionKind::Orderbook, tx_all, 0));

        let raw = serde_json::json!({"lastUpdateId": 1, "bids": [], "asks": []});
        let snapshot = OrderbookSnapshot::from_raw("BTCUSDT", 0, &raw, 20);
        dispatch_orderbook(&registry, &snapshot);

        assert_eq!(rx_sym.try_recv().unwrap()["symbol"], "BTCUSDT");
        assert_eq!(rx_all.try_recv().unwrap()["symbol"], "BTCUSDT");
    }
}
