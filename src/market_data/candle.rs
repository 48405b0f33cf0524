// =============================================================================
// Candle — OHLCV record, and the per-(symbol,timeframe) aggregator that folds
// 1-minute candles into arbitrary timeframes.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::decimal::Dec8;
use crate::timeframe::Timeframe;

/// A single OHLCV candle for one symbol at one bucket start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub bucket_start_ms: i64,
    pub open: Dec8,
    pub high: Dec8,
    pub low: Dec8,
    pub close: Dec8,
    pub volume: Dec8,
    pub quote_volume: Dec8,
    pub trades: i32,
    /// Whether this candle's bucket has finished and will not be mutated
    /// further. 1-minute candles sourced straight from the exchange are
    /// always closed; candles emitted mid-aggregation for `peek()` are not.
    pub is_closed: bool,
}

impl Candle {
    fn seed(symbol: &str, bucket_start_ms: i64, m: &Candle) -> Self {
        Self {
            symbol: symbol.to_string(),
            bucket_start_ms,
            open: m.open,
            high: m.high,
            low: m.low,
            close: m.close,
            volume: m.volume,
            quote_volume: m.quote_volume,
            trades: m.trades,
            is_closed: false,
        }
    }

    fn fold(&mut self, m: &Candle) {
        if m.high > self.high {
            self.high = m.high;
        }
        if m.low < self.low {
            self.low = m.low;
        }
        self.close = m.close;
        self.volume += m.volume;
        self.quote_volume += m.quote_volume;
        self.trades += m.trades;
    }
}

/// Per-`(symbol, timeframe)` fold of 1-minute candles into the active
/// bucket. Not thread-safe by itself — callers (the subscription registry)
/// own exclusivity via their own lock.
pub struct CandleAggregator {
    symbol: String,
    timeframe: Timeframe,
    current_bucket_start: Option<i64>,
    current: Option<Candle>,
}

impl CandleAggregator {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            current_bucket_start: None,
            current: None,
        }
    }

    /// Fold one incoming 1-minute candle into this aggregator's state.
    /// Returns `Some(closed_candle)` when a bucket completes as a result of
    /// this fold, `None` otherwise.
    pub fn fold(&mut self, m: &Candle) -> Option<Candle> {
        let b = self.timeframe.align(m.bucket_start_ms);

        if self.timeframe == Timeframe::M1 {
            // No aggregation state to keep — every 1-minute candle is
            // already a complete bucket of its own.
            let mut out = m.clone();
            out.is_closed = true;
            return Some(out);
        }

        match self.current_bucket_start {
            Some(cur) if cur != b => {
                // New bucket started: emit the held candle, seed a new one.
                let mut closed = self.current.take();
                if let Some(c) = closed.as_mut() {
                    c.is_closed = true;
                }
                self.current_bucket_start = Some(b);
                self.current = Some(Candle::seed(&self.symbol, b, m));
                closed
            }
            Some(cur) if cur == b => {
                if let Some(c) = self.current.as_mut() {
                    c.fold(m);
                } else {
                    self.current = Some(Candle::seed(&self.symbol, b, m));
                }
                None
            }
            _ => {
                self.current_bucket_start = Some(b);
                self.current = Some(Candle::seed(&self.symbol, b, m));
                None
            }
        }
    }

    /// Non-destructive read of the in-progress candle, used for periodic
    /// refresh pushes and the `price` endpoint's live override.
    pub fn peek(&self) -> Option<Candle> {
        self.current.clone()
    }

    /// Force the current in-progress bucket to close, returning it if one
    /// exists. Used on subscription teardown so the last partial bucket is
    /// not silently dropped.
    pub fn force_complete(&mut self) -> Option<Candle> {
        let mut closed = self.current.take();
        if let Some(c) = closed.as_mut() {
            c.is_closed = true;
        }
        self.current_bucket_start = None;
        closed
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minute_candle(symbol: &str, ts: i64, open: &str, high: &str, low: &str, close: &str, volume: &str) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            bucket_start_ms: ts,
            open: open.parse().unwrap(),
            high: high.parse().unwrap(),
            low: low.parse().unwrap(),
            close: close.parse().unwrap(),
            volume: volume.parse().unwrap(),
            quote_volume: Dec8::ZERO,
            trades: 1,
            is_closed: true,
        }
    }

    #[test]
    fn one_minute_passthrough_emits_every_candle() {
        let mut agg = CandleAggregator::new("BTCUSDT", Timeframe::M1);
        let m = minute_candle("BTCUSDT", 0, "100", "101", "99", "100.5", "10");
        let out = agg.fold(&m).expect("1m timeframe always emits");
        assert_eq!(out.close.to_string(), "100.50000000");
        assert!(out.is_closed);
    }

    #[test]
    fn aggregation_correctness_scenario() {
        // Scenario 1 from the testable-properties list: 5 one-minute
        // candles into timeframe 5 starting at bucket t0.
        let t0 = Timeframe::M5.align(0);
        let mut agg = CandleAggregator::new("BTCUSDT", Timeframe::M5);

        let opens = [100, 101, 102, 103, 104];
        let closes = [101, 102, 103, 104, 105];
        let mut last_out = None;
        for (i, (&o, &c)) in opens.iter().zip(closes.iter()).enumerate() {
            let ts = t0 + (i as i64) * 60_000;
            let m = minute_candle(
                "BTCUSDT",
                ts,
                &o.to_string(),
                &(o + 1).to_string(),
                &(o - 1).to_string(),
                &c.to_string(),
                "10",
            );
            last_out = agg.fold(&m);
        }
        // All 5 candles fall in the same 5-minute bucket, so nothing closes
        // until the aggregator is forced or a 6th candle arrives.
        assert!(last_out.is_none());

        let peeked = agg.peek().expect("in-progress candle exists");
        assert_eq!(peeked.open.to_string(), "100.00000000");
        assert_eq!(peeked.close.to_string(), "105.00000000");
        assert_eq!(peeked.high.to_string(), "105.00000000");
        assert_eq!(peeked.low.to_string(), "99.00000000");
        assert_eq!(peeked.volume.to_string(), "50.00000000");
        assert_eq!(peeked.trades, 5);
    }

    #[test]
    fn next_bucket_closes_previous() {
        let t0 = Timeframe::M5.align(0);
        let mut agg = CandleAggregator::new("BTCUSDT", Timeframe::M5);
        for i in 0..5 {
            let ts = t0 + i * 60_000;
            agg.fold(&minute_candle("BTCUSDT", ts, "100", "101", "99", "100", "1"));
        }
        let next_bucket_ts = t0 + 5 * 60_000;
        let closed = agg
            .fold(&minute_candle("BTCUSDT", next_bucket_ts, "200", "201", "199", "200", "1"))
            .expect("crossing into a new bucket closes the previous one");
        assert!(closed.is_closed);
        assert_eq!(closed.trades, 5);

        let in_progress = agg.peek().unwrap();
        assert_eq!(in_progress.open.to_string(), "200.00000000");
        assert!(!in_progress.is_closed);
    }

    #[test]
    fn force_complete_flushes_in_progress_bucket() {
        let mut agg = CandleAggregator::new("BTCUSDT", Timeframe::M5);
        agg.fold(&minute_candle("BTCUSDT", 0, "100", "101", "99", "100", "1"));
        let flushed = agg.force_complete().expect("bucket was in progress");
        assert!(flushed.is_closed);
        assert!(agg.peek().is_none());
    }

    #[test]
    fn force_complete_on_empty_aggregator_returns_none() {
        let mut agg = CandleAggregator::new("BTCUSDT", Timeframe::M15);
        assert!(agg.force_complete().is_none());
    }
}
