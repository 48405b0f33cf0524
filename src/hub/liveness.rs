// =============================================================================
// Liveness Supervisor — heartbeat, stale-connection reaping, periodic refresh
// =============================================================================
//
// Three independent periodic tasks sharing the subscription registry. Each
// honors the shutdown signal within one polling interval, per spec §5.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::LivenessConfig;
use crate::hub::registry::SubscriptionRegistry;

/// `PERIODIC_UPDATE_INTERVAL` from spec §9's Design Notes: the source's
/// `int(loop.get_debug() and 5 or 5)` is always 5 regardless of debug mode,
/// so this is implemented as the plain constant.
const PERIODIC_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Spawn the heartbeat, reaper, and refresh-pusher loops. Returns
/// immediately; each loop runs until `shutdown` reports `true`.
pub fn spawn(registry: Arc<SubscriptionRegistry>, config: LivenessConfig, mut shutdown: watch::Receiver<bool>) {
    {
        let registry = registry.clone();
        let mut shutdown = shutdown.clone();
        let period = Duration::from_secs(config.ping_interval_secs);
        tokio::spawn(async move {
            let mut tick = interval(period);
            loop {
                tokio::select! {
                    _ = tick.tick() => heartbeat_pass(&registry),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
            info!("heartbeat loop exited");
        });
    }

    {
        let registry = registry.clone();
        let mut shutdown = shutdown.clone();
        let period = Duration::from_secs(config.cleanup_interval_secs);
        let pong_timeout_ms = (config.pong_timeout_secs * 1000) as i64;
        tokio::spawn(async move {
            let mut tick = interval(period);
            loop {
                tokio::select! {
                    _ = tick.tick() => reaper_pass(&registry, pong_timeout_ms),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
            info!("reaper loop exited");
        });
    }

    {
        tokio::spawn(async move {
            let mut tick = interval(PERIODIC_UPDATE_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => refresh_pass(&registry, PERIODIC_UPDATE_INTERVAL.as_millis() as i64),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
            info!("periodic refresh loop exited");
        });
    }
}

/// Send `{type:"heartbeat", timestamp}` to every subscription; send
/// failures are handled by `Subscription::send` marking `alive = false`,
/// which the reaper pass sweeps up on its own cadence.
fn heartbeat_pass(registry: &SubscriptionRegistry) {
    let payload = json!({ "type": "heartbeat", "timestamp": now_ms() });
    let subs = registry.all_subscriptions();
    for (_, sub) in &subs {
        if sub.is_alive() {
            sub.send(payload.clone());
        }
    }
    debug!(count = subs.len(), "heartbeat pass complete");
}

/// Remove subscriptions that are marked dead or have gone stale on pongs.
fn reaper_pass(registry: &SubscriptionRegistry, pong_timeout_ms: i64) {
    let now = now_ms();
    let mut reaped = 0usize;
    for (key, sub) in registry.all_subscriptions() {
        let stale = now - sub.last_pong_ms.load(Ordering::Relaxed) > pong_timeout_ms;
        if !sub.is_alive() || stale {
            registry.remove(&key, sub.id);
            reaped += 1;
        }
    }
    if reaped > 0 {
        debug!(reaped, "reaper pass removed stale subscriptions");
    }
}

/// For each candle fingerprint with an aggregator, push the in-progress
/// candle if at least `interval_ms` has elapsed since the last push.
fn refresh_pass(registry: &SubscriptionRegistry, interval_ms: i64) {
    let now = now_ms();
    for key in registry.candle_keys() {
        if !registry.due_for_refresh(&key, now, interval_ms) {
            continue;
        }
        if let Some(candle) = registry.peek(&key) {
            let payload = serde_json::to_value(&candle).unwrap_or_else(|_| json!({}));
            registry.broadcast(&key, payload);
        }
    }
}

/// Update `sub`'s liveness marker on receipt of a `{type:"pong"}` frame
/// from its socket.
pub fn handle_pong(sub: &crate::hub::registry::Subscription) {
    sub.mark_pong(now_ms());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscriptionKind;
    use tokio::sync::mpsc;

    #[test]
    fn heartbeat_pass_sends_to_live_subscribers_only() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = crate::hub::registry::Subscription::new(
            "BTCUSDT".into(), "1".into(), SubscriptionKind::Orderbook, tx, now_ms(),
        );
        registry.add(sub);
        heartbeat_pass(&registry);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg["type"], "heartbeat");
    }

    #[test]
    fn reaper_removes_stale_pong() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = crate::hub::registry::Subscription::new(
            "BTCUSDT".into(), "1".into(), SubscriptionKind::Orderbook, tx, 0,
        );
        let key = sub.fingerprint();
        registry.add(sub);
        reaper_pass(&registry, 60_000);
        assert!(registry.all_subscriptions().is_empty());
        let _ = key;
    }

    #[test]
    fn reaper_keeps_fresh_pong() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = crate::hub::registry::Subscription::new(
            "BTCUSDT".into(), "1".into(), SubscriptionKind::Orderbook, tx, now_ms(),
        );
        registry.add(sub);
        reaper_pass(&registry, 60_000);
        assert_eq!(registry.all_subscriptions().len(), 1);
    }
}
