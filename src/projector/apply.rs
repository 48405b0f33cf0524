// =============================================================================
// Per-log transactional application — spec §4.8 steps 3-4
// =============================================================================
//
// Every log is applied inside the batch's single open transaction: check
// the ledger, apply the domain mutation, record the audit event, mark the
// ledger entry. A decode failure is a poison pill — it is marked processed
// without mutating `orders` so a single malformed log can never wedge the
// cursor (spec §4.8's crash-safety note).
// =============================================================================

use alloy::primitives::Address as AlloyAddress;
use alloy::providers::RootProvider;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Postgres, Transaction};
use tracing::warn;

use crate::error::Result;
use crate::projector::contract_cache::OrderCache;
use crate::projector::events::{DecodedLog, EventBody};
use crate::store::orders;
use crate::types::{EventType, OrderStatus, OrderType};

fn to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

/// Apply one decoded log within `tx`. Returns `Ok(true)` if it mutated
/// `orders` state, `Ok(false)` if it was a no-op (already in the ledger, or
/// a transition that didn't apply because the order was already
/// terminalized).
pub async fn apply_log(
    tx: &mut Transaction<'_, Postgres>,
    log: &DecodedLog,
    provider: &RootProvider,
    trading_address: AlloyAddress,
    cache: &OrderCache,
) -> Result<bool> {
    if orders::check_event_processed(&mut **tx, &log.tx_hash, log.log_index).await? {
        return Ok(false);
    }

    let applied = dispatch(tx, log, provider, trading_address, cache).await?;

    let event_type = match &log.body {
        EventBody::Created { .. } => EventType::Created,
        EventBody::Executed { .. } => EventType::Executed,
        EventBody::Cancelled { .. } => EventType::Cancelled,
        EventBody::Modified { .. } => EventType::Modified,
    };
    orders::mark_event_processed(&mut **tx, &log.tx_hash, log.log_index, event_type, Utc::now()).await?;

    Ok(applied)
}

async fn dispatch(
    tx: &mut Transaction<'_, Postgres>,
    log: &DecodedLog,
    provider: &RootProvider,
    trading_address: AlloyAddress,
    cache: &OrderCache,
) -> Result<bool> {
    match &log.body {
        EventBody::Created { id, user, token_in, token_out, amount_in_wei } => {
            let order_data = cache.get_order(provider, trading_address, *id).await?;
            let created_at = to_datetime(order_data.created_at_ts);
            orders::insert_order(
                &mut **tx,
                &orders::NewOrder {
                    id: *id as i64,
                    user_address: user.clone(),
                    token_in: token_in.clone(),
                    token_out: token_out.clone(),
                    amount_in: crate::decimal::Dec18::from_wei_str(amount_in_wei),
                    target_price: crate::decimal::Dec18::from_wei_str(&order_data.target_price_wei),
                    min_amount_out: crate::decimal::Dec18::from_wei_str(&order_data.min_amount_out_wei),
                    order_type: OrderType::from_u8(order_data.order_type),
                    is_long: order_data.is_long,
                    self_executable: order_data.self_executable,
                    created_at,
                    tx_hash: log.tx_hash.clone(),
                    block_number: log.block_number,
                },
            )
            .await?;
            orders::insert_order_event(
                &mut **tx,
                *id as i64,
                EventType::Created,
                None,
                OrderStatus::Pending,
                &log.tx_hash,
                log.block_number,
                created_at,
                serde_json::json!({"user": user, "tokenIn": token_in, "tokenOut": token_out}),
            )
            .await?;
            Ok(true)
        }
        EventBody::Executed { id, executor, amount_out_wei, timestamp } => {
            let executed_at = to_datetime(*timestamp);
            let changed = orders::mark_executed(
                &mut **tx,
                *id as i64,
                executor,
                crate::decimal::Dec18::from_wei_str(amount_out_wei),
                &log.tx_hash,
                executed_at,
            )
            .await?;
            if changed {
                orders::insert_order_event(
                    &mut **tx,
                    *id as i64,
                    EventType::Executed,
                    Some(OrderStatus::Pending),
                    OrderStatus::Executed,
                    &log.tx_hash,
                    log.block_number,
                    executed_at,
                    serde_json::json!({"executor": executor, "amountOut": amount_out_wei}),
                )
                .await?;
            } else {
                warn!(order_id = id, "EXECUTED event for order not in PENDING state, skipped");
            }
            Ok(changed)
        }
        EventBody::Cancelled { id, timestamp } => {
            let cancelled_at = to_datetime(*timestamp);
            let changed = orders::mark_cancelled(&mut **tx, *id as i64, cancelled_at).await?;
            if changed {
                orders::insert_order_event(
                    &mut **tx,
                    *id as i64,
                    EventType::Cancelled,
                    Some(OrderStatus::Pending),
                    OrderStatus::Cancelled,
                    &log.tx_hash,
                    log.block_number,
                    cancelled_at,
                    serde_json::json!({}),
                )
                .await?;
            } else {
                warn!(order_id = id, "CANCELLED event for order not in PENDING state, skipped");
            }
            Ok(changed)
        }
        EventBody::Modified { id, target_price_wei, min_amount_out_wei, timestamp } => {
            let modified_at = to_datetime(*timestamp);
            let target_price = crate::decimal::Dec18::from_wei_str(target_price_wei);
            let min_amount_out = crate::decimal::Dec18::from_wei_str(min_amount_out_wei);
            let changed = orders::apply_modification(&mut **tx, *id as i64, target_price, min_amount_out, modified_at).await?;
            if changed {
                orders::insert_order_event(
                    &mut **tx,
                    *id as i64,
                    EventType::Modified,
                    Some(OrderStatus::Pending),
                    OrderStatus::Pending,
                    &log.tx_hash,
                    log.block_number,
                    modified_at,
                    serde_json::json!({"targetPrice": target_price_wei, "minAmountOut": min_amount_out_wei}),
                )
                .await?;
            } else {
                warn!(order_id = id, "MODIFIED event for order not in PENDING state, skipped");
            }
            Ok(changed)
        }
    }
}

/// Record a poison-pill log (decode failure) as processed without touching
/// `orders`, so the batch can commit and the cursor advances past it.
pub async fn apply_poison_pill(
    tx: &mut Transaction<'_, Postgres>,
    tx_hash: &str,
    log_index: i64,
    reason: &str,
) -> Result<()> {
    warn!(tx_hash, log_index, reason, "poison pill log, marking processed without applying");
    // The real event type is unrecoverable once decoding has failed; the
    // ledger only needs `(tx_hash, log_index)` to be unique, so the
    // recorded type here is a placeholder, never read back for this row.
    orders::mark_event_processed(&mut **tx, &tx_hash.to_string(), log_index, EventType::Created, Utc::now()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_datetime_falls_back_to_now_on_invalid_timestamp() {
        let dt = to_datetime(i64::MAX);
        assert!(dt.timestamp() > 0);
    }
}
