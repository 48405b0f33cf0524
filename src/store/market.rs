// =============================================================================
// Candle / Orderbook persistence — the historical record backing query reads
// =============================================================================
//
// Timeframe is never interpolated into SQL (spec §9's latent-injection
// note): every query binds it as a parameter, validated beforehand against
// the closed `Timeframe` registry at the API boundary.
// =============================================================================

use sqlx::PgExecutor;

use crate::decimal::Dec8;
use crate::error::Result;
use crate::market_data::{Candle, Level, OrderbookSnapshot};
use crate::timeframe::Timeframe;

/// Upsert a 1-minute candle, keyed on `(symbol, timestamp)`. Conflict
/// overwrites with the latest values — the realtime worker's "last 5
/// minutes" re-fetch intentionally re-derives rows already written during
/// catch-up, and the newer fetch is authoritative.
pub async fn upsert_candle<'c, E: PgExecutor<'c>>(exec: E, candle: &Candle) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO candles (symbol, timestamp, open, high, low, close, volume, quote_volume, trades)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        ON CONFLICT (symbol, timestamp) DO UPDATE
        SET open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low,
            close = EXCLUDED.close, volume = EXCLUDED.volume,
            quote_volume = EXCLUDED.quote_volume, trades = EXCLUDED.trades
        "#,
    )
    .bind(&candle.symbol)
    .bind(candle.bucket_start_ms)
    .bind(candle.open)
    .bind(candle.high)
    .bind(candle.low)
    .bind(candle.close)
    .bind(candle.volume)
    .bind(candle.quote_volume)
    .bind(candle.trades)
    .execute(exec)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct CandleRow {
    symbol: String,
    timestamp: i64,
    open: Dec8,
    high: Dec8,
    low: Dec8,
    close: Dec8,
    volume: Dec8,
    quote_volume: Dec8,
    trades: i32,
}

impl From<CandleRow> for Candle {
    fn from(r: CandleRow) -> Self {
        Candle {
            symbol: r.symbol,
            bucket_start_ms: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            quote_volume: r.quote_volume,
            trades: r.trades,
            is_closed: true,
        }
    }
}

/// Read 1-minute candles for `symbol` since `start_ms` (or from the
/// beginning if `None`), capped at `limit`, most recent last.
///
/// For `timeframe > 1`, this reads the stored 1-minute grain and folds it
/// client-side into the requested timeframe rather than pushing a
/// GROUP-BY-time-bucket string into SQL — the historical-query equivalent
/// of the in-memory aggregator, so both paths share the same folding logic
/// and neither can disagree about bucket boundaries (resolves spec §9's
/// latent-injection note by construction: `timeframe` never touches SQL).
pub async fn get_candles<'c, E: PgExecutor<'c>>(
    exec: E,
    symbol: &str,
    timeframe: Timeframe,
    start_ms: Option<i64>,
    limit: u32,
) -> Result<Vec<Candle>> {
    let rows: Vec<CandleRow> = match start_ms {
        Some(start) => {
            sqlx::query_as(
                "SELECT symbol, timestamp, open, high, low, close, volume, quote_volume, trades \
                 FROM candles WHERE symbol = $1 AND timestamp >= $2 ORDER BY timestamp ASC LIMIT $3",
            )
            .bind(symbol)
            .bind(start)
            .bind(limit as i64)
            .fetch_all(exec)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT symbol, timestamp, open, high, low, close, volume, quote_volume, trades \
                 FROM candles WHERE symbol = $1 ORDER BY timestamp DESC LIMIT $2",
            )
            .bind(symbol)
            .bind(limit as i64)
            .fetch_all(exec)
            .await?
        }
    };

    let mut one_minute: Vec<Candle> = rows.into_iter().map(Candle::from).collect();
    one_minute.sort_by_key(|c| c.bucket_start_ms);

    if timeframe == Timeframe::M1 {
        return Ok(one_minute);
    }

    let mut aggregator = crate::market_data::CandleAggregator::new(symbol, timeframe);
    let mut out = Vec::new();
    for m in &one_minute {
        if let Some(closed) = aggregator.fold(m) {
            out.push(closed);
        }
    }
    if let Some(tail) = aggregator.peek() {
        out.push(tail);
    }
    Ok(out)
}

/// Upsert an orderbook snapshot keyed on `(symbol, timestamp)`.
pub async fn upsert_orderbook<'c, E: PgExecutor<'c>>(exec: E, snapshot: &OrderbookSnapshot) -> Result<()> {
    let bids = levels_to_json(&snapshot.bids);
    let asks = levels_to_json(&snapshot.asks);
    sqlx::query(
        r#"
        INSERT INTO orderbook_data (symbol, timestamp, last_update_id, bids, asks)
        VALUES ($1,$2,$3,$4,$5)
        ON CONFLICT (symbol, timestamp) DO UPDATE
        SET last_update_id = EXCLUDED.last_update_id, bids = EXCLUDED.bids, asks = EXCLUDED.asks
        "#,
    )
    .bind(&snapshot.symbol)
    .bind(snapshot.timestamp_ms)
    .bind(snapshot.last_update_id)
    .bind(bids)
    .bind(asks)
    .execute(exec)
    .await?;
    Ok(())
}

fn levels_to_json(levels: &[Level]) -> serde_json::Value {
    serde_json::to_value(levels).unwrap_or_else(|_| serde_json::json!([]))
}

/// Most recent orderbook snapshot for `symbol`, `None` if it was never
/// polled — the query API surfaces this as a 404.
pub async fn get_latest_orderbook<'c, E: PgExecutor<'c>>(exec: E, symbol: &str) -> Result<Option<OrderbookSnapshot>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        symbol: String,
        timestamp: i64,
        last_update_id: i64,
        bids: serde_json::Value,
        asks: serde_json::Value,
    }

    let row: Option<Row> = sqlx::query_as(
        "SELECT symbol, timestamp, last_update_id, bids, asks FROM orderbook_data \
         WHERE symbol = $1 ORDER BY timestamp DESC LIMIT 1",
    )
    .bind(symbol)
    .fetch_optional(exec)
    .await?;

    Ok(row.map(|r| OrderbookSnapshot {
        symbol: r.symbol,
        timestamp_ms: r.timestamp,
        last_update_id: r.last_update_id,
        bids: serde_json::from_value(r.bids).unwrap_or_default(),
        asks: serde_json::from_value(r.asks).unwrap_or_default(),
    }))
}

/// Distinct symbols this service has ever recorded candles for, backing
/// `GET /symbols`.
pub async fn list_symbols<'c, E: PgExecutor<'c>>(exec: E) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT symbol FROM candles ORDER BY symbol")
        .fetch_all(exec)
        .await?;
    Ok(rows.into_iter().map(|(s,)| s).collect())
}
