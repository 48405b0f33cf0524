// =============================================================================
// Order / OrderEvent / ProcessedEventLedger / ComponentCursor persistence
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::decimal::Dec18;
use crate::error::Result;
use crate::types::{Address, ComponentCursor, CursorStatus, EventType, Order, OrderEvent, OrderStatus, OrderType, TxHash};

/// The fields a `CREATED` event composes into a brand-new order row.
pub struct NewOrder {
    pub id: i64,
    pub user_address: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: Dec18,
    pub target_price: Dec18,
    pub min_amount_out: Dec18,
    pub order_type: OrderType,
    pub is_long: bool,
    pub self_executable: bool,
    pub created_at: DateTime<Utc>,
    pub tx_hash: TxHash,
    pub block_number: i64,
}

/// Insert a new order in `PENDING` status. `ON CONFLICT(id) DO NOTHING`
/// makes this safe to call twice for the same id — the projector's
/// at-least-once replay relies on this.
pub async fn insert_order<'c, E: PgExecutor<'c>>(exec: E, order: &NewOrder) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, user_address, token_in, token_out, amount_in, target_price,
            min_amount_out, amount_out, order_type, is_long, self_executable,
            status, created_at, updated_at, executed_at, tx_hash, block_number,
            executor_address, execution_tx_hash
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,'PENDING',$12,$12,NULL,$13,$14,NULL,NULL)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(order.id)
    .bind(&order.user_address)
    .bind(&order.token_in)
    .bind(&order.token_out)
    .bind(order.amount_in)
    .bind(order.target_price)
    .bind(order.min_amount_out)
    .bind(Dec18::ZERO)
    .bind(order.order_type)
    .bind(order.is_long)
    .bind(order.self_executable)
    .bind(order.created_at)
    .bind(&order.tx_hash)
    .bind(order.block_number)
    .execute(exec)
    .await?;
    Ok(())
}

/// `EXECUTED` projection: terminalizes the order and records execution
/// trace fields. A no-op (zero rows affected) if the order doesn't exist
/// or is already terminal — callers should check `check_event_processed`
/// first, but this guard keeps the state machine's one-way transition
/// honest even if called out of order.
pub async fn mark_executed<'c, E: PgExecutor<'c>>(
    exec: E,
    id: i64,
    executor_address: &Address,
    amount_out: Dec18,
    execution_tx_hash: &TxHash,
    executed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = 'EXECUTED', executed_at = $2, updated_at = $2,
            executor_address = $3, amount_out = $4, execution_tx_hash = $5
        WHERE id = $1 AND status = 'PENDING'
        "#,
    )
    .bind(id)
    .bind(executed_at)
    .bind(executor_address)
    .bind(amount_out)
    .bind(execution_tx_hash)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_cancelled<'c, E: PgExecutor<'c>>(exec: E, id: i64, updated_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE orders SET status = 'CANCELLED', updated_at = $2 WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(id)
    .bind(updated_at)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// `MODIFIED` projection — only `target_price`/`min_amount_out` change;
/// status stays `PENDING`. Applies regardless of whether the order is
/// still pending at the DB level only when it is (a modify on a
/// terminalized order is a no-op, matching the one-way state machine).
pub async fn apply_modification<'c, E: PgExecutor<'c>>(
    exec: E,
    id: i64,
    target_price: Dec18,
    min_amount_out: Dec18,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET target_price = $2, min_amount_out = $3, updated_at = $4
        WHERE id = $1 AND status = 'PENDING'
        "#,
    )
    .bind(id)
    .bind(target_price)
    .bind(min_amount_out)
    .bind(updated_at)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// `UPDATE ... WHERE status='PENDING' AND created_at < now - 30 days`. The
/// expiry sweeper's own statement, distinct from the projector's
/// event-driven transitions. Returns the number of rows transitioned.
pub async fn sweep_expired<'c, E: PgExecutor<'c>>(exec: E, now: DateTime<Utc>) -> Result<u64> {
    let cutoff = now - chrono::Duration::days(30);
    let result = sqlx::query(
        "UPDATE orders SET status = 'EXPIRED', updated_at = $2 WHERE status = 'PENDING' AND created_at < $1",
    )
    .bind(cutoff)
    .bind(now)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

pub async fn insert_order_event<'c, E: PgExecutor<'c>>(
    exec: E,
    order_id: i64,
    event_type: EventType,
    old_status: Option<OrderStatus>,
    new_status: OrderStatus,
    tx_hash: &TxHash,
    block_number: i64,
    timestamp: DateTime<Utc>,
    raw_payload: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO order_events (order_id, event_type, old_status, new_status, tx_hash, block_number, timestamp, raw_payload)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        "#,
    )
    .bind(order_id)
    .bind(event_type)
    .bind(old_status)
    .bind(new_status)
    .bind(tx_hash)
    .bind(block_number)
    .bind(timestamp)
    .bind(raw_payload)
    .execute(exec)
    .await?;
    Ok(())
}

/// `true` if `(tx_hash, log_index)` is already in the processed-event
/// ledger — the exactly-once guard checked before every dispatch.
pub async fn check_event_processed<'c, E: PgExecutor<'c>>(exec: E, tx_hash: &TxHash, log_index: i64) -> Result<bool> {
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM processed_events WHERE tx_hash = $1 AND log_index = $2",
    )
    .bind(tx_hash)
    .bind(log_index)
    .fetch_optional(exec)
    .await?;
    Ok(row.is_some())
}

pub async fn mark_event_processed<'c, E: PgExecutor<'c>>(
    exec: E,
    tx_hash: &TxHash,
    log_index: i64,
    event_type: EventType,
    processed_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO processed_events (tx_hash, log_index, event_type, processed_at)
        VALUES ($1,$2,$3,$4)
        ON CONFLICT (tx_hash, log_index) DO NOTHING
        "#,
    )
    .bind(tx_hash)
    .bind(log_index)
    .bind(event_type)
    .bind(processed_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get_component_cursor<'c, E: PgExecutor<'c>>(exec: E, component_name: &str) -> Result<Option<ComponentCursor>> {
    let row = sqlx::query_as::<_, ComponentCursor>(
        "SELECT component_name, last_processed_block, last_tx_hash, status, updated_at FROM system_state WHERE component_name = $1",
    )
    .bind(component_name)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

pub async fn save_component_cursor<'c, E: PgExecutor<'c>>(exec: E, cursor: &ComponentCursor) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO system_state (component_name, last_processed_block, last_tx_hash, status, updated_at)
        VALUES ($1,$2,$3,$4,$5)
        ON CONFLICT (component_name) DO UPDATE
        SET last_processed_block = EXCLUDED.last_processed_block,
            last_tx_hash = EXCLUDED.last_tx_hash,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&cursor.component_name)
    .bind(cursor.last_processed_block)
    .bind(&cursor.last_tx_hash)
    .bind(cursor.status)
    .bind(cursor.updated_at)
    .execute(exec)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reads — the query API's Order surface (spec §6)
// ---------------------------------------------------------------------------

pub async fn get_order<'c, E: PgExecutor<'c>>(exec: E, id: i64) -> Result<Option<Order>> {
    let row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row)
}

pub async fn get_order_events<'c, E: PgExecutor<'c>>(exec: E, order_id: i64) -> Result<Vec<OrderEvent>> {
    let rows = sqlx::query_as::<_, OrderEvent>(
        "SELECT * FROM order_events WHERE order_id = $1 ORDER BY timestamp ASC",
    )
    .bind(order_id)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

pub async fn list_orders_by_status<'c, E: PgExecutor<'c>>(
    exec: E,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>> {
    let rows = match status {
        Some(s) => {
            sqlx::query_as::<_, Order>(
                "SELECT * FROM orders WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(s)
            .bind(limit)
            .bind(offset)
            .fetch_all(exec)
            .await?
        }
        None => {
            sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created_at DESC LIMIT $1 OFFSET $2")
                .bind(limit)
                .bind(offset)
                .fetch_all(exec)
                .await?
        }
    };
    Ok(rows)
}

pub async fn list_orders_for_user<'c, E: PgExecutor<'c>>(
    exec: E,
    user_address: &Address,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>> {
    let rows = match status {
        Some(s) => {
            sqlx::query_as::<_, Order>(
                "SELECT * FROM orders WHERE user_address = $1 AND status = $2 ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            )
            .bind(user_address)
            .bind(s)
            .bind(limit)
            .bind(offset)
            .fetch_all(exec)
            .await?
        }
        None => {
            sqlx::query_as::<_, Order>(
                "SELECT * FROM orders WHERE user_address = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(user_address)
            .bind(limit)
            .bind(offset)
            .fetch_all(exec)
            .await?
        }
    };
    Ok(rows)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusStat {
    pub total: i64,
    pub last_24h: i64,
}

pub async fn status_statistics<'c, E: PgExecutor<'c>>(exec: E, status: OrderStatus) -> Result<StatusStat>
where
    E: Copy,
{
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE status = $1")
        .bind(status)
        .fetch_one(exec)
        .await?;
    let last_24h: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM orders WHERE status = $1 AND created_at > now() - interval '24 hours'",
    )
    .bind(status)
    .fetch_one(exec)
    .await?;
    Ok(StatusStat { total: total.0, last_24h: last_24h.0 })
}

/// Build the initial `ACTIVE` cursor for a never-before-seen component.
pub fn initial_cursor(component_name: &str, starting_block: i64, now: DateTime<Utc>) -> ComponentCursor {
    ComponentCursor {
        component_name: component_name.to_string(),
        last_processed_block: starting_block,
        last_tx_hash: None,
        status: CursorStatus::Active,
        updated_at: now,
    }
}
