// =============================================================================
// Query API (C10) — Market Data + Order surface over HTTP
// =============================================================================
//
// Unauthenticated, read-only: this service never accepts writes over HTTP,
// only the on-chain event stream mutates order state. Grounded on the
// teacher's router/CORS/state wiring shape; the endpoint set itself
// follows the market-data and order read surface this service actually
// exposes.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::error::{Error, Result};
use crate::hub::fingerprint;
use crate::store::{market, orders};
use crate::timeframe::Timeframe;
use crate::types::{OrderStatus, SubscriptionKind};

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/orderbook", get(orderbook))
        .route("/api/v1/price", get(price))
        .route("/api/v1/orders/:status", get(orders_by_status))
        .route("/api/v1/orders/:id/events", get(order_events))
        .route("/api/v1/orders/:id", get(order_by_id))
        .route("/api/v1/users/:address/orders", get(orders_for_user))
        .route("/api/v1/statistics", get(statistics))
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&state.store.pool).await {
        Ok(_) => "healthy",
        Err(e) => {
            tracing::warn!(error = %e, "health check database probe failed");
            "unhealthy"
        }
    };
    let status = if database == "healthy" { "healthy" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database": database,
    }))
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

async fn symbols(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let syms = market::list_symbols(&state.store.pool).await?;
    Ok(Json(syms))
}

#[derive(Deserialize)]
struct CandlesQuery {
    symbol: String,
    timeframe: String,
    start: Option<i64>,
    #[serde(default = "default_candle_limit")]
    limit: u32,
}

fn default_candle_limit() -> u32 {
    500
}

const MAX_CANDLE_LIMIT: u32 = 5000;

async fn candles(State(state): State<Arc<AppState>>, Query(q): Query<CandlesQuery>) -> Result<impl IntoResponse> {
    let timeframe = Timeframe::parse(&q.timeframe).ok_or_else(|| Error::invalid(format!("unknown timeframe: {}", q.timeframe)))?;
    let limit = q.limit.min(MAX_CANDLE_LIMIT);
    let rows = market::get_candles(&state.store.pool, &q.symbol, timeframe, q.start, limit).await?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: String,
}

#[derive(Deserialize)]
struct OrderbookQuery {
    symbol: String,
    levels: Option<u32>,
}

async fn orderbook(State(state): State<Arc<AppState>>, Query(q): Query<OrderbookQuery>) -> Result<impl IntoResponse> {
    let levels = match q.levels {
        Some(l) if crate::market_data::VALID_LEVELS.contains(&l) => l,
        Some(l) => return Err(Error::invalid(format!("invalid levels {l}, supported: {:?}", crate::market_data::VALID_LEVELS))),
        None => 20,
    };

    let mut snapshot = if let Some(live) = state.orderbook_cache.get(&q.symbol) {
        live
    } else {
        match market::get_latest_orderbook(&state.store.pool, &q.symbol).await? {
            Some(snapshot) => snapshot,
            None => return Err(Error::NotFound),
        }
    };
    snapshot.bids.truncate(levels as usize);
    snapshot.asks.truncate(levels as usize);
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
struct PriceQuery {
    symbol: String,
    #[serde(default = "default_price_timeframe")]
    timeframe: String,
}

fn default_price_timeframe() -> String {
    "1".to_string()
}

/// Live-aggregator-first price lookup for the requested `(symbol,
/// timeframe)` pair, falling back to the last one or two persisted candles
/// when no subscriber has hydrated a live aggregator yet. Mirrors the
/// current/previous-close and trend derivation the query layer has always
/// used for this endpoint.
async fn price(State(state): State<Arc<AppState>>, Query(q): Query<PriceQuery>) -> Result<impl IntoResponse> {
    let timeframe = Timeframe::parse(&q.timeframe).ok_or_else(|| Error::invalid(format!("unknown timeframe: {}", q.timeframe)))?;
    let key = fingerprint(&q.symbol, timeframe.label(), SubscriptionKind::Candles);
    state.registry.ensure_aggregator(&q.symbol, timeframe);
    let live = state.registry.peek(&key);

    let history_limit = if timeframe == Timeframe::M1 { 2 } else { 1 };
    let history = market::get_candles(&state.store.pool, &q.symbol, timeframe, None, history_limit).await?;

    let (current_price, current_timestamp, current_volume, previous_price) = if let Some(candle) = &live {
        let previous = history.last().map(|c| c.close).unwrap_or(candle.close);
        (candle.close, candle.bucket_start_ms, candle.volume, previous)
    } else {
        let current = match history.last() {
            Some(c) => c,
            None => return Err(Error::NotFound),
        };
        let previous = if history.len() >= 2 { history[history.len() - 2].close } else { current.close };
        (current.close, current.bucket_start_ms, current.volume, previous)
    };

    let change_absolute = current_price - previous_price;
    let change_percent = if previous_price.inner().is_zero() {
        rust_decimal::Decimal::ZERO
    } else {
        (change_absolute.inner() / previous_price.inner()) * rust_decimal::Decimal::ONE_HUNDRED
    };
    let trend = if change_absolute.inner().is_sign_positive() && !change_absolute.inner().is_zero() {
        "up"
    } else if change_absolute.inner().is_sign_negative() {
        "down"
    } else {
        "neutral"
    };

    Ok(Json(serde_json::json!({
        "symbol": q.symbol,
        "timeframe": timeframe.label(),
        "current_price": current_price.to_string(),
        "previous_price": previous_price.to_string(),
        "change_absolute": change_absolute.to_string(),
        "change_percent": format!("{:.2}", change_percent),
        "trend": trend,
        "timestamp": current_timestamp,
        "volume": current_volume.to_string(),
    })))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_page_limit() -> i64 {
    100
}

const MAX_PAGE_LIMIT: i64 = 1000;

fn parse_status_path(raw: &str) -> Result<Option<OrderStatus>> {
    if raw.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    raw.parse::<OrderStatus>().map(Some)
}

async fn orders_by_status(
    State(state): State<Arc<AppState>>,
    Path(status): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let status = parse_status_path(&status)?;
    let limit = page.limit.clamp(1, MAX_PAGE_LIMIT);
    let rows = orders::list_orders_by_status(&state.store.pool, status, limit, page.offset.max(0)).await?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
struct UserOrdersQuery {
    status: Option<String>,
    #[serde(default = "default_page_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

async fn orders_for_user(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(q): Query<UserOrdersQuery>,
) -> Result<impl IntoResponse> {
    let status = q.status.map(|s| s.parse::<OrderStatus>()).transpose()?;
    let limit = q.limit.clamp(1, MAX_PAGE_LIMIT);
    let rows = orders::list_orders_for_user(&state.store.pool, &address, status, limit, q.offset.max(0)).await?;
    Ok(Json(rows))
}

async fn order_by_id(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    match orders::get_order(&state.store.pool, id).await? {
        Some(order) => Ok(Json(order)),
        None => Err(Error::NotFound),
    }
}

async fn order_events(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    let events = orders::get_order_events(&state.store.pool, id).await?;
    Ok(Json(events))
}

async fn statistics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let pool = &state.store.pool;
    let pending = orders::status_statistics(pool, OrderStatus::Pending).await?;
    let executed = orders::status_statistics(pool, OrderStatus::Executed).await?;
    let cancelled = orders::status_statistics(pool, OrderStatus::Cancelled).await?;
    let expired = orders::status_statistics(pool, OrderStatus::Expired).await?;
    Ok(Json(serde_json::json!({
        "pending": pending,
        "executed": executed,
        "cancelled": cancelled,
        "expired": expired,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_path_accepts_all_case_insensitively() {
        assert_eq!(parse_status_path("ALL").unwrap(), None);
        assert_eq!(parse_status_path("all").unwrap(), None);
    }

    #[test]
    fn parse_status_path_parses_known_status() {
        assert_eq!(parse_status_path("pending").unwrap(), Some(OrderStatus::Pending));
    }

    #[test]
    fn parse_status_path_rejects_unknown() {
        assert!(parse_status_path("bogus").is_err());
    }
}
