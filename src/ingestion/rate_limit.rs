// =============================================================================
// Rate-Limit Tracker — monitors exchange request weight to avoid 429s
// =============================================================================
//
// This system only reads public market-data endpoints (klines, depth), so
// only the request-weight counter survives from the teacher's tracker — the
// order-rate counters have no counterpart; this system never places orders.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

const WEIGHT_HARD_LIMIT: u32 = 1000;
const WEIGHT_WARN_THRESHOLD: u32 = 800;

/// Thread-safe rate-limit tracker backed by an atomic counter, updated from
/// the exchange's per-response weight header.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self { used_weight_1m: AtomicU32::new(0) }
    }

    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(val) = headers.get("X-MBX-USED-WEIGHT-1M") else { return };
        let Ok(s) = val.to_str() else { return };
        let Ok(w) = s.parse::<u32>() else { return };
        let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(used_weight = w, hard_limit = WEIGHT_HARD_LIMIT, "rate-limit weight crossed warning threshold");
        }
        debug!(used_weight_1m = w, "rate-limit weight updated from header");
    }

    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current + weight <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(current_weight = current, requested_weight = weight, "request blocked — would exceed rate-limit");
        }
        allowed
    }

    pub fn reset_1m_weight(&self) {
        self.used_weight_1m.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot { used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed) }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_send_request_respects_hard_limit() {
        let t = RateLimitTracker::new();
        assert!(t.can_send_request(500));
        t.used_weight_1m.store(950, Ordering::Relaxed);
        assert!(!t.can_send_request(100));
    }

    #[test]
    fn reset_clears_counter() {
        let t = RateLimitTracker::new();
        t.used_weight_1m.store(900, Ordering::Relaxed);
        t.reset_1m_weight();
        assert_eq!(t.snapshot().used_weight_1m, 0);
    }
}
