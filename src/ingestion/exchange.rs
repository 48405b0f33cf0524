// =============================================================================
// Exchange Client — public REST market-data endpoints (klines, depth)
// =============================================================================
//
// Unsigned, public endpoints only: this system never authenticates to or
// trades on an exchange, it only reads klines and order-book depth. Two
// `reqwest::Client`s are held with the timeouts spec §5 assigns to each
// call family (30s klines, 10s orderbook).
// =============================================================================

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::decimal::Dec8;
use crate::error::{Error, Result};
use crate::ingestion::rate_limit::RateLimitTracker;
use crate::market_data::{Candle, OrderbookSnapshot};

/// HTTP status Binance-shaped exchanges use for "too many requests".
pub const HTTP_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Clone)]
pub struct ExchangeClient {
    base_url: String,
    klines_client: reqwest::Client,
    depth_client: reqwest::Client,
    pub rate_limit: std::sync::Arc<RateLimitTracker>,
}

/// Outcome of a single fetch attempt, distinguishing the retry-worthy
/// "too many requests" case from other transient failures so the caller
/// can apply the back-off policy spec §4.6 specifies for each.
pub enum FetchOutcome<T> {
    Ok(T),
    TooManyRequests,
    Error(Error),
}

impl ExchangeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let klines_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");
        let depth_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url,
            klines_client,
            depth_client,
            rate_limit: std::sync::Arc::new(RateLimitTracker::new()),
        }
    }

    /// GET `/api/v3/klines` — up to `limit` 1-minute candles starting at
    /// `start_time_ms` (inclusive), oldest first.
    #[instrument(skip(self), name = "exchange::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        start_time_ms: i64,
        limit: u32,
    ) -> FetchOutcome<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval=1m&startTime={}&limit={}",
            self.base_url, symbol, start_time_ms, limit
        );

        let resp = match self.klines_client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Error(Error::Exchange(e)),
        };

        self.rate_limit.update_from_headers(resp.headers());

        if resp.status().as_u16() == HTTP_TOO_MANY_REQUESTS {
            return FetchOutcome::TooManyRequests;
        }
        if !resp.status().is_success() {
            return FetchOutcome::Error(Error::invalid(format!(
                "klines request for {symbol} returned HTTP {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return FetchOutcome::Error(Error::Exchange(e)),
        };

        FetchOutcome::Ok(parse_klines(symbol, &body))
    }

    /// GET `/api/v3/depth` — the top `levels` bid/ask rows, normalized.
    #[instrument(skip(self), name = "exchange::get_depth")]
    pub async fn get_depth(&self, symbol: &str, levels: u32) -> FetchOutcome<OrderbookSnapshot> {
        let url = format!("{}/api/v3/depth?symbol={}&limit={}", self.base_url, symbol, levels);

        let resp = match self.depth_client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Error(Error::Exchange(e)),
        };

        self.rate_limit.update_from_headers(resp.headers());

        if resp.status().as_u16() == HTTP_TOO_MANY_REQUESTS {
            return FetchOutcome::TooManyRequests;
        }
        if !resp.status().is_success() {
            return FetchOutcome::Error(Error::invalid(format!(
                "depth request for {symbol} returned HTTP {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return FetchOutcome::Error(Error::Exchange(e)),
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        FetchOutcome::Ok(OrderbookSnapshot::from_raw(symbol, now_ms, &body, levels))
    }
}

/// Exchange klines array-of-arrays shape:
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, ...]`.
/// A malformed entry is skipped with a warning rather than failing the
/// whole batch (spec §7 malformed-payload policy).
fn parse_klines(symbol: &str, body: &serde_json::Value) -> Vec<Candle> {
    let Some(rows) = body.as_array() else {
        warn!(symbol, "klines response was not an array, skipping batch");
        return Vec::new();
    };

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(arr) = row.as_array() else { continue };
        if arr.len() < 9 {
            warn!(symbol, fields = arr.len(), "skipping malformed kline row");
            continue;
        }
        let Some(open_time) = arr[0].as_i64() else { continue };
        candles.push(Candle {
            symbol: symbol.to_string(),
            bucket_start_ms: open_time,
            open: Dec8::normalize(&arr[1]),
            high: Dec8::normalize(&arr[2]),
            low: Dec8::normalize(&arr[3]),
            close: Dec8::normalize(&arr[4]),
            volume: Dec8::normalize(&arr[5]),
            quote_volume: Dec8::normalize(&arr[7]),
            trades: arr[8].as_i64().unwrap_or(0) as i32,
            is_closed: true,
        });
    }
    debug!(symbol, count = candles.len(), "klines parsed");
    candles
}

#[derive(Debug, Deserialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<SymbolEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolEntry {
    pub symbol: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_klines_skips_malformed_rows() {
        let body = json!([
            ["not", "enough", "fields"],
            [1000i64, "100", "101", "99", "100.5", "10", 1059i64, "1000", 5],
        ]);
        let candles = parse_klines("BTCUSDT", &body);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].trades, 5);
        assert!(candles[0].is_closed);
    }

    #[test]
    fn parse_klines_on_non_array_returns_empty() {
        let body = json!({"error": "bad request"});
        assert!(parse_klines("BTCUSDT", &body).is_empty());
    }
}
