// =============================================================================
// Pub/Sub Bus Adapter — channel-based fan-out from ingestion to the hub
// =============================================================================
//
// A minimal indirection over `tokio::sync::broadcast`: `publish`,
// `subscribe`, `close`. At-most-once delivery per subscriber, ordering
// preserved per channel, no durability — a lagging subscriber drops the
// oldest messages rather than blocking the publisher.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Capacity of each channel's ring buffer. Generous enough that a
/// momentarily slow subscriber (e.g. a WS socket mid-send) doesn't drop
/// messages under normal load, per spec §4.7's "no durability" semantics.
const CHANNEL_CAPACITY: usize = 1024;

/// A single message on the bus: the channel it was published to and its
/// JSON payload, already shaped to match the corresponding HTTP body.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Channel-based distribution hub. Ingestion workers publish by channel
/// name (`candles:{SYMBOL}`, `candles:all`, `orderbook:{SYMBOL}`,
/// `orderbook:all`); the fan-out hub subscribes to the `:all` channels.
pub struct Bus {
    channels: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
        })
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<BusMessage> {
        if let Some(tx) = self.channels.read().get(channel) {
            return tx.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish `payload` to `channel`. Never blocks: if nobody is
    /// subscribed, the send is a documented no-op (workers never block on
    /// the bus per spec §4.6's backpressure rule).
    pub fn publish(&self, channel: &str, payload: serde_json::Value) {
        let tx = self.sender_for(channel);
        // `send` only errors when there are zero receivers, which is a
        // routine state (no subscribers yet) rather than a failure.
        if tx.send(BusMessage { channel: channel.to_string(), payload }).is_err() {
            debug!(channel, "publish with no active subscribers");
        }
    }

    /// Subscribe to one channel, returning a receiver the caller polls in
    /// its own task. Multiple subscribers to the same channel each get
    /// their own copy of every message (fan-out), per channel ordering
    /// preserved.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(channel).subscribe()
    }

    /// Drop all channels. Subsequent publishes recreate channels lazily;
    /// existing receivers observe a `Closed` error on their next `recv`.
    pub fn close(&self) {
        let mut channels = self.channels.write();
        let n = channels.len();
        channels.clear();
        warn!(closed_channels = n, "bus closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = Bus::new();
        let mut rx = bus.subscribe("candles:all");
        bus.publish("candles:all", json!({"symbol": "BTCUSDT"}));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "candles:all");
        assert_eq!(msg.payload["symbol"], "BTCUSDT");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = Bus::new();
        bus.publish("orderbook:all", json!({}));
    }

    #[tokio::test]
    async fn per_channel_ordering_preserved() {
        let bus = Bus::new();
        let mut rx = bus.subscribe("candles:BTCUSDT");
        for i in 0..5 {
            bus.publish("candles:BTCUSDT", json!({"i": i}));
        }
        for i in 0..5 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.payload["i"], i);
        }
    }

    #[tokio::test]
    async fn independent_channels_do_not_cross_deliver() {
        let bus = Bus::new();
        let mut candles_rx = bus.subscribe("candles:all");
        let _orderbook_rx = bus.subscribe("orderbook:all");
        bus.publish("orderbook:all", json!({"symbol": "ETHUSDT"}));
        bus.publish("candles:all", json!({"symbol": "BTCUSDT"}));
        let msg = candles_rx.recv().await.unwrap();
        assert_eq!(msg.payload["symbol"], "BTCUSDT");
    }
}
