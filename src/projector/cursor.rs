// =============================================================================
// Component cursor state machine (C8) — spec §4.8
// =============================================================================
//
// Pure transition functions kept apart from the polling loop so the state
// machine itself is independently testable. `ComponentCursor.status` tracks
// the health of the scan, not of any individual order.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::types::{ComponentCursor, CursorStatus};

pub const COMPONENT_NAME: &str = "order_event_projector";

/// How many blocks a single poll is willing to request logs for before it
/// falls back to the parallel, semaphore-gated per-shard fetch path (spec
/// §4.8's large-gap handling).
pub const PARALLEL_THRESHOLD: u64 = 10;

/// Concurrent shard fetches allowed during a large catch-up gap.
pub const MAX_CONCURRENT_SHARD_FETCHES: usize = 4;

/// Blocks behind chain head a first-ever cursor starts at, so a fresh
/// deployment begins scanning near the tip instead of from genesis.
pub const WARMUP_BLOCKS: i64 = 200;

/// Advance the cursor to `new_block` after a successful apply, clearing any
/// prior error state back to `ACTIVE`.
pub fn advance(cursor: &ComponentCursor, new_block: i64, last_tx_hash: Option<String>, now: DateTime<Utc>) -> ComponentCursor {
    ComponentCursor {
        component_name: cursor.component_name.clone(),
        last_processed_block: new_block,
        last_tx_hash,
        status: CursorStatus::Active,
        updated_at: now,
    }
}

/// Mark the cursor `ERROR` without moving `last_processed_block` — the next
/// poll re-fetches the same range rather than skipping it, honoring
/// at-least-once delivery when a batch's apply failed outright.
pub fn mark_error(cursor: &ComponentCursor, now: DateTime<Utc>) -> ComponentCursor {
    ComponentCursor { status: CursorStatus::Error, updated_at: now, ..cursor.clone() }
}

/// Transition out of `ERROR` back into normal scanning once a poll
/// succeeds again.
pub fn mark_recovered(cursor: &ComponentCursor, now: DateTime<Utc>) -> ComponentCursor {
    ComponentCursor { status: CursorStatus::Active, updated_at: now, ..cursor.clone() }
}

/// `RESET` is an operator-triggered rewind: the cursor's recorded block is
/// thrown away in favor of `restart_block`, used to recover from a chain
/// reorg deep enough that replaying from the ledger's exactly-once guard
/// alone isn't sufficient.
pub fn reset(cursor: &ComponentCursor, restart_block: i64, now: DateTime<Utc>) -> ComponentCursor {
    ComponentCursor {
        component_name: cursor.component_name.clone(),
        last_processed_block: restart_block,
        last_tx_hash: None,
        status: CursorStatus::Reset,
        updated_at: now,
    }
}

/// Whether the gap between the cursor and the chain head is large enough to
/// warrant the parallel shard-fetch path instead of one sequential request.
pub fn should_fetch_in_parallel(from_block: i64, to_block: i64) -> bool {
    to_block.saturating_sub(from_block) as u64 > PARALLEL_THRESHOLD
}

/// Split an inclusive `[from, to]` block range into contiguous shards no
/// larger than `shard_size`, for the parallel fetch path.
pub fn shard_range(from_block: i64, to_block: i64, shard_size: u64) -> Vec<(i64, i64)> {
    let mut shards = Vec::new();
    let mut start = from_block;
    while start <= to_block {
        let end = (start + shard_size as i64 - 1).min(to_block);
        shards.push((start, end));
        start = end + 1;
    }
    shards
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(block: i64, status: CursorStatus) -> ComponentCursor {
        ComponentCursor {
            component_name: COMPONENT_NAME.to_string(),
            last_processed_block: block,
            last_tx_hash: None,
            status,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn advance_clears_error_status() {
        let c = cursor(100, CursorStatus::Error);
        let next = advance(&c, 150, Some("0xdead".to_string()), Utc::now());
        assert_eq!(next.last_processed_block, 150);
        assert_eq!(next.status, CursorStatus::Active);
    }

    #[test]
    fn mark_error_keeps_block_unchanged() {
        let c = cursor(100, CursorStatus::Active);
        let next = mark_error(&c, Utc::now());
        assert_eq!(next.last_processed_block, 100);
        assert_eq!(next.status, CursorStatus::Error);
    }

    #[test]
    fn reset_drops_last_tx_hash() {
        let mut c = cursor(100, CursorStatus::Active);
        c.last_tx_hash = Some("0xabc".to_string());
        let next = reset(&c, 50, Utc::now());
        assert_eq!(next.last_processed_block, 50);
        assert!(next.last_tx_hash.is_none());
        assert_eq!(next.status, CursorStatus::Reset);
    }

    #[test]
    fn parallel_threshold_respected() {
        assert!(!should_fetch_in_parallel(100, 105));
        assert!(should_fetch_in_parallel(100, 120));
    }

    #[test]
    fn shard_range_covers_whole_span_without_overlap() {
        let shards = shard_range(1, 25, 10);
        assert_eq!(shards, vec![(1, 10), (11, 20), (21, 25)]);
    }
}
