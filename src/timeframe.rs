// =============================================================================
// Period Aligner — maps a millisecond timestamp to its timeframe bucket start
// =============================================================================

use chrono::{Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed registry of supported timeframes, keyed by their wire label.
/// Unknown labels must be rejected at the API boundary — never reach the
/// aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    M45,
    H1,
    H2,
    H3,
    H4,
    H8,
    H12,
    D1,
    W1,
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 15] = [
        Self::M1, Self::M3, Self::M5, Self::M15, Self::M30, Self::M45,
        Self::H1, Self::H2, Self::H3, Self::H4, Self::H8, Self::H12,
        Self::D1, Self::W1, Self::Mo1,
    ];

    /// Minutes per bucket. Month is approximated by calendar rules in
    /// `align`, not a fixed minute count, but is reported as 43200 (30
    /// days) for display/registry purposes per spec.
    pub fn minutes(self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M3 => 3,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::M45 => 45,
            Self::H1 => 60,
            Self::H2 => 120,
            Self::H3 => 180,
            Self::H4 => 240,
            Self::H8 => 480,
            Self::H12 => 720,
            Self::D1 => 1440,
            Self::W1 => 10080,
            Self::Mo1 => 43200,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::M1 => "1",
            Self::M3 => "3",
            Self::M5 => "5",
            Self::M15 => "15",
            Self::M30 => "30",
            Self::M45 => "45",
            Self::H1 => "1H",
            Self::H2 => "2H",
            Self::H3 => "3H",
            Self::H4 => "4H",
            Self::H8 => "8H",
            Self::H12 => "12H",
            Self::D1 => "1D",
            Self::W1 => "1W",
            Self::Mo1 => "1M",
        }
    }

    /// Reject unknown labels at the boundary — the registry is closed.
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tf| tf.label() == label)
    }

    /// Map `timestamp_ms` to the UTC bucket start, in milliseconds, for
    /// this timeframe. Alignment is always computed in UTC so it is
    /// stable across DST.
    pub fn align(self, timestamp_ms: i64) -> i64 {
        let dt = Utc.timestamp_millis_opt(timestamp_ms).single().unwrap_or_else(Utc::now);

        match self {
            Self::M1 | Self::M3 | Self::M5 | Self::M15 | Self::M30 | Self::M45 => {
                let m = self.minutes();
                let floored_minute = (dt.minute() as i64 / m) * m;
                let aligned = dt
                    .with_minute(floored_minute as u32)
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .unwrap_or(dt);
                aligned.timestamp_millis()
            }
            Self::H1 | Self::H2 | Self::H3 | Self::H4 | Self::H8 | Self::H12 => {
                let hours = self.minutes() / 60;
                let floored_hour = (dt.hour() as i64 / hours) * hours;
                let aligned = dt
                    .with_hour(floored_hour as u32)
                    .and_then(|d| d.with_minute(0))
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .unwrap_or(dt);
                aligned.timestamp_millis()
            }
            Self::D1 => {
                let aligned = dt
                    .with_hour(0)
                    .and_then(|d| d.with_minute(0))
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .unwrap_or(dt);
                aligned.timestamp_millis()
            }
            Self::W1 => {
                // Floor to Monday 00:00 UTC.
                let midnight = dt
                    .with_hour(0)
                    .and_then(|d| d.with_minute(0))
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .unwrap_or(dt);
                let days_since_monday = midnight.weekday().num_days_from_monday() as i64;
                (midnight - chrono::Duration::days(days_since_monday)).timestamp_millis()
            }
            Self::Mo1 => {
                let aligned = Utc
                    .with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
                    .single()
                    .unwrap_or(dt);
                aligned.timestamp_millis()
            }
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap().timestamp_millis()
    }

    #[test]
    fn parse_rejects_unknown_label() {
        assert!(Timeframe::parse("7").is_none());
        assert!(Timeframe::parse("1H").is_some());
    }

    #[test]
    fn minute_alignment_floors_to_multiple() {
        let ts = ms(2024, 3, 1, 10, 37, 42);
        assert_eq!(Timeframe::M5.align(ts), ms(2024, 3, 1, 10, 35, 0));
        assert_eq!(Timeframe::M15.align(ts), ms(2024, 3, 1, 10, 30, 0));
    }

    #[test]
    fn hour_alignment_floors_to_multiple() {
        let ts = ms(2024, 3, 1, 13, 45, 0);
        assert_eq!(Timeframe::H4.align(ts), ms(2024, 3, 1, 12, 0, 0));
        assert_eq!(Timeframe::H1.align(ts), ms(2024, 3, 1, 13, 0, 0));
    }

    #[test]
    fn day_alignment_is_midnight_utc() {
        let ts = ms(2024, 3, 1, 23, 59, 59);
        assert_eq!(Timeframe::D1.align(ts), ms(2024, 3, 1, 0, 0, 0));
    }

    #[test]
    fn week_alignment_floors_to_monday() {
        // 2024-03-06 is a Wednesday.
        let ts = ms(2024, 3, 6, 12, 0, 0);
        // 2024-03-04 is the preceding Monday.
        assert_eq!(Timeframe::W1.align(ts), ms(2024, 3, 4, 0, 0, 0));
    }

    #[test]
    fn month_alignment_floors_to_first_of_month() {
        let ts = ms(2024, 3, 17, 8, 30, 0);
        assert_eq!(Timeframe::Mo1.align(ts), ms(2024, 3, 1, 0, 0, 0));
    }

    #[test]
    fn all_registry_entries_round_trip_through_label() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.label()), Some(tf));
        }
    }
}
