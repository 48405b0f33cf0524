// =============================================================================
// Subscription Registry — fingerprint-keyed routing table for live sockets
// =============================================================================
//
// `connections: map[fingerprint -> set[Subscription]]` and
// `aggregators: map[fingerprint -> CandleAggregator]`, where fingerprint is
// `symbol:timeframe:kind`. An aggregator exists iff at least one non-`all`
// candle subscription is registered for that fingerprint (spec §4.4).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::market_data::CandleAggregator;
use crate::timeframe::Timeframe;
use crate::types::SubscriptionKind;

/// The outbound half of a connection: a channel the hub pushes JSON frames
/// into. The WebSocket handler owns the receiving half and is responsible
/// for turning each value into an actual `Message::Text` frame — the
/// registry never touches transport-layer types directly.
pub type SocketHandle = mpsc::UnboundedSender<Value>;

pub fn fingerprint(symbol: &str, timeframe: &str, kind: SubscriptionKind) -> String {
    format!("{symbol}:{timeframe}:{kind}")
}

/// A single live subscriber. Cheap to clone (`Arc`-backed); registry
/// operations hand out `Arc<Subscription>` so the liveness supervisor and
/// the WS handler can share ownership without a lock on the whole set.
pub struct Subscription {
    pub id: uuid::Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub kind: SubscriptionKind,
    sender: SocketHandle,
    pub last_pong_ms: AtomicI64,
    pub alive: AtomicBool,
}

impl Subscription {
    pub fn new(symbol: String, timeframe: String, kind: SubscriptionKind, sender: SocketHandle, now_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4(),
            symbol,
            timeframe,
            kind,
            sender,
            last_pong_ms: AtomicI64::new(now_ms),
            alive: AtomicBool::new(true),
        })
    }

    /// Send one frame to this subscriber. Marks the subscription dead on
    /// failure (closed channel / dropped socket) rather than propagating
    /// the error — a dead subscriber is reaped on the next cleanup pass,
    /// never blocks the broadcaster.
    pub fn send(&self, message: Value) {
        if self.sender.send(message).is_err() {
            self.alive.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn mark_pong(&self, now_ms: i64) {
        self.last_pong_ms.store(now_ms, Ordering::Relaxed);
        self.alive.store(true, Ordering::Relaxed);
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.symbol, &self.timeframe, self.kind)
    }
}

struct Bucket {
    subs: Vec<Arc<Subscription>>,
    /// Only populated for `Candles` fingerprints with at least one
    /// non-`all` subscriber; see the module invariant above.
    aggregator: Option<Mutex<CandleAggregator>>,
    last_update_sent_ms: AtomicI64,
}

/// Process-local routing table. Every operation is a short critical
/// section under `RwLock`; per spec §5 this single-executor confinement
/// is what keeps broadcast ordering race-free without per-subscriber
/// locking.
pub struct SubscriptionRegistry {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { buckets: RwLock::new(HashMap::new()) })
    }

    /// Register a new subscriber under its fingerprint. Lazily creates the
    /// aggregator for candle fingerprints that aren't the `all` wildcard.
    pub fn add(&self, sub: Arc<Subscription>) {
        let key = sub.fingerprint();
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            let aggregator = if sub.kind == SubscriptionKind::Candles && sub.symbol != "all" {
                Timeframe::parse(&sub.timeframe)
                    .map(|tf| Mutex::new(CandleAggregator::new(sub.symbol.clone(), tf)))
            } else {
                None
            };
            Bucket { subs: Vec::new(), aggregator, last_update_sent_ms: AtomicI64::new(0) }
        });
        bucket.subs.push(sub);
        debug!(key, "subscription added");
    }

    /// Remove one subscription by id from its fingerprint's set. Deletes
    /// the bucket entirely (aggregator included) once it becomes empty.
    /// Idempotent: removing an already-removed id is a no-op.
    pub fn remove(&self, key: &str, id: uuid::Uuid) {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(key) else { return };
        bucket.subs.retain(|s| s.id != id);
        if bucket.subs.is_empty() {
            buckets.remove(key);
            debug!(key, "bucket emptied, aggregator dropped");
        }
    }

    /// Broadcast `message` to every live subscriber of `key`.
    pub fn broadcast(&self, key: &str, message: Value) {
        let buckets = self.buckets.read();
        let Some(bucket) = buckets.get(key) else { return };
        for sub in &bucket.subs {
            if sub.is_alive() {
                sub.send(message.clone());
            }
        }
    }

    /// Fold one 1-minute candle into the aggregator at `key`, if one
    /// exists, returning any candle the fold closed.
    pub fn fold_candle(&self, key: &str, minute: &crate::market_data::Candle) -> Option<crate::market_data::Candle> {
        let buckets = self.buckets.read();
        let bucket = buckets.get(key)?;
        bucket.aggregator.as_ref()?.lock().fold(minute)
    }

    /// Non-destructive peek at the in-progress candle for `key`, used by
    /// the periodic refresh pusher and the `price` query endpoint.
    pub fn peek(&self, key: &str) -> Option<crate::market_data::Candle> {
        let buckets = self.buckets.read();
        buckets.get(key)?.aggregator.as_ref()?.lock().peek()
    }

    /// Hydrate an aggregator for `(symbol, timeframe)` on demand even when
    /// no subscriber currently exists, so `price` reads never suffer the
    /// live-bucket skew documented in spec §9's Open Question. Returns
    /// `true` if an aggregator now exists for the key (freshly created or
    /// already present).
    pub fn ensure_aggregator(&self, symbol: &str, timeframe: Timeframe) -> bool {
        let key = fingerprint(symbol, timeframe.label(), SubscriptionKind::Candles);
        let mut buckets = self.buckets.write();
        buckets
            .entry(key)
            .or_insert_with(|| Bucket {
                subs: Vec::new(),
                aggregator: Some(Mutex::new(CandleAggregator::new(symbol, timeframe))),
                last_update_sent_ms: AtomicI64::new(0),
            })
            .aggregator
            .is_some()
    }

    /// All fingerprints currently holding an aggregator, for the periodic
    /// refresh pusher to iterate without holding the registry lock across
    /// each push.
    pub fn candle_keys(&self) -> Vec<String> {
        self.buckets
            .read()
            .iter()
            .filter(|(_, b)| b.aggregator.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// `true` if `last_update_sent_ms` is at least `interval_ms` stale for
    /// `key`, updating the marker to `now_ms` as a side effect so callers
    /// don't need a second write pass.
    pub fn due_for_refresh(&self, key: &str, now_ms: i64, interval_ms: i64) -> bool {
        let buckets = self.buckets.read();
        let Some(bucket) = buckets.get(key) else { return false };
        let last = bucket.last_update_sent_ms.load(Ordering::Relaxed);
        if now_ms - last >= interval_ms {
            bucket.last_update_sent_ms.store(now_ms, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Snapshot of all subscriptions across every fingerprint, for the
    /// heartbeat/reaper passes.
    pub fn all_subscriptions(&self) -> Vec<(String, Arc<Subscription>)> {
        self.buckets
            .read()
            .iter()
            .flat_map(|(key, bucket)| bucket.subs.iter().map(move |s| (key.clone(), s.clone())))
            .collect()
    }

    /// Force-close the aggregator at `key`, returning its last in-progress
    /// candle if one existed. Used when a subscription set empties so a
    /// dangling partial bucket is not silently dropped.
    pub fn force_complete(&self, key: &str) -> Option<crate::market_data::Candle> {
        let buckets = self.buckets.read();
        buckets.get(key)?.aggregator.as_ref()?.lock().force_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_sub(symbol: &str, timeframe: &str, kind: SubscriptionKind) -> (Arc<Subscription>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Subscription::new(symbol.to_string(), timeframe.to_string(), kind, tx, 0), rx)
    }

    #[test]
    fn aggregator_exists_iff_non_wildcard_candle_subscription_present() {
        let reg = SubscriptionRegistry::new();
        let (sub, _rx) = make_sub("BTCUSDT", "5", SubscriptionKind::Candles);
        let key = sub.fingerprint();
        reg.add(sub.clone());
        assert!(reg.peek(&key).is_none() || reg.candle_keys().contains(&key));
        assert!(reg.candle_keys().contains(&key));

        reg.remove(&key, sub.id);
        assert!(!reg.candle_keys().contains(&key));
    }

    #[test]
    fn wildcard_subscription_has_no_aggregator() {
        let reg = SubscriptionRegistry::new();
        let (sub, _rx) = make_sub("all", "1", SubscriptionKind::Candles);
        let key = sub.fingerprint();
        reg.add(sub);
        assert!(!reg.candle_keys().contains(&key));
    }

    #[test]
    fn broadcast_delivers_to_all_live_subscribers() {
        let reg = SubscriptionRegistry::new();
        let (sub_a, mut rx_a) = make_sub("BTCUSDT", "1", SubscriptionKind::Orderbook);
        let (sub_b, mut rx_b) = make_sub("BTCUSDT", "1", SubscriptionKind::Orderbook);
        let key = sub_a.fingerprint();
        reg.add(sub_a);
        reg.add(sub_b);

        reg.broadcast(&key, json!({"hello": "world"}));
        assert_eq!(rx_a.try_recv().unwrap()["hello"], "world");
        assert_eq!(rx_b.try_recv().unwrap()["hello"], "world");
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = SubscriptionRegistry::new();
        let (sub, _rx) = make_sub("BTCUSDT", "1", SubscriptionKind::Orderbook);
        let key = sub.fingerprint();
        let id = sub.id;
        reg.add(sub);
        reg.remove(&key, id);
        reg.remove(&key, id);
    }

    #[test]
    fn ensure_aggregator_hydrates_even_without_subscribers() {
        let reg = SubscriptionRegistry::new();
        assert!(reg.ensure_aggregator("BTCUSDT", Timeframe::M5));
        let key = fingerprint("BTCUSDT", "5", SubscriptionKind::Candles);
        assert!(reg.candle_keys().contains(&key));
    }
}
