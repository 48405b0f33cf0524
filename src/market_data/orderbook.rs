// =============================================================================
// Orderbook Snapshot — normalized depth data model and per-symbol cache
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::decimal::Dec8;

/// One price level: `{price, quantity}` in the exchange's native decimal
/// representation (spec §3 `dec_native` — kept at full precision rather
/// than rounded to 8dp, since native quote currencies vary in scale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Dec8,
    pub quantity: Dec8,
}

/// A normalized orderbook snapshot. Bids are monotonically decreasing in
/// price, asks monotonically increasing, both truncated to the configured
/// level count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub last_update_id: i64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Supported truncation levels, per spec §3.
pub const VALID_LEVELS: [u32; 3] = [5, 10, 20];

impl OrderbookSnapshot {
    /// Parse a raw exchange depth payload (`{lastUpdateId, bids, asks}`,
    /// each level `[price, quantity]`) into a normalized snapshot,
    /// truncated to `levels` and sorted per the monotonicity invariant.
    /// Malformed levels are dropped individually rather than failing the
    /// whole snapshot — a single bad row should not blank out a symbol's
    /// depth (spec §7, malformed-payload policy).
    pub fn from_raw(symbol: &str, timestamp_ms: i64, raw: &serde_json::Value, levels: u32) -> Self {
        let last_update_id = raw["lastUpdateId"].as_i64().unwrap_or(0);
        let mut bids = parse_levels(&raw["bids"]);
        let mut asks = parse_levels(&raw["asks"]);

        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        bids.truncate(levels as usize);
        asks.truncate(levels as usize);

        Self { symbol: symbol.to_string(), timestamp_ms, last_update_id, bids, asks }
    }

    /// `true` when both sides respect the monotonicity invariant required
    /// by spec §3. Used by tests and as a sanity check before publishing.
    pub fn is_well_ordered(&self) -> bool {
        self.bids.windows(2).all(|w| w[0].price >= w[1].price)
            && self.asks.windows(2).all(|w| w[0].price <= w[1].price)
    }
}

fn parse_levels(raw: &serde_json::Value) -> Vec<Level> {
    let Some(arr) = raw.as_array() else { return Vec::new() };
    arr.iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let price_raw = pair.first()?;
            let qty_raw = pair.get(1)?;
            Some(Level {
                price: Dec8::normalize(price_raw),
                quantity: Dec8::normalize(qty_raw),
            })
        })
        .collect()
}

/// Process-local cache of the most recent snapshot per symbol, used by the
/// query API's `/orderbook` endpoint as a fallback when no live value is
/// otherwise available (all snapshots flow through the store as the
/// authoritative record; this is a read-path convenience cache only).
pub struct OrderbookCache {
    latest: RwLock<HashMap<String, OrderbookSnapshot>>,
}

impl OrderbookCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { latest: RwLock::new(HashMap::new()) })
    }

    pub fn put(&self, snapshot: OrderbookSnapshot) {
        self.latest.write().insert(snapshot.symbol.clone(), snapshot);
    }

    pub fn get(&self, symbol: &str) -> Option<OrderbookSnapshot> {
        self.latest.read().get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_raw_sorts_and_truncates() {
        let raw = json!({
            "lastUpdateId": 42,
            "bids": [["99", "1"], ["100", "2"], ["98", "3"]],
            "asks": [["102", "1"], ["101", "2"], ["103", "3"]],
        });
        let snap = OrderbookSnapshot::from_raw("BTCUSDT", 1000, &raw, 2);
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.asks.len(), 2);
        assert_eq!(snap.bids[0].price.to_string(), "100.00000000");
        assert_eq!(snap.bids[1].price.to_string(), "99.00000000");
        assert_eq!(snap.asks[0].price.to_string(), "101.00000000");
        assert!(snap.is_well_ordered());
    }

    #[test]
    fn from_raw_drops_malformed_levels_without_failing() {
        let raw = json!({
            "lastUpdateId": 1,
            "bids": [["100", "1"], "not-a-pair", ["99", "2"]],
            "asks": [],
        });
        let snap = OrderbookSnapshot::from_raw("BTCUSDT", 1000, &raw, 20);
        assert_eq!(snap.bids.len(), 2);
        assert!(snap.asks.is_empty());
    }

    #[test]
    fn cache_round_trips_latest_snapshot() {
        let cache = OrderbookCache::new();
        assert!(cache.get("BTCUSDT").is_none());
        let raw = json!({"lastUpdateId": 1, "bids": [], "asks": []});
        cache.put(OrderbookSnapshot::from_raw("BTCUSDT", 1, &raw, 20));
        assert!(cache.get("BTCUSDT").is_some());
    }
}
