// =============================================================================
// Decimal Normalizer — parses exchange numerics into fixed-point values
// =============================================================================
//
// External feeds hand us numbers as strings, integers, or floats, sometimes
// in scientific notation ("1.5E-8"). Losing a single field to a parse
// error would corrupt downstream aggregation, so normalization never fails
// the caller: on bad input it logs a warning and returns zero.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Fixed-point value carrying exactly 8 fractional decimal digits.
///
/// Used for candle OHLCV fields, order-book native-currency prices and
/// quantities, and anywhere spec calls for "dec8".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dec8(Decimal);

/// Fixed-point value carrying exactly 18 fractional decimal digits, used
/// for on-chain order amounts converted from wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dec18(Decimal);

macro_rules! impl_fixed_point {
    ($name:ident, $scale:literal) => {
        impl $name {
            pub const SCALE: u32 = $scale;

            pub const ZERO: Self = Self(Decimal::ZERO);

            /// Normalize any JSON-numeric-shaped value into this fixed-point
            /// type. Unparseable input yields zero and a logged warning —
            /// this must never fail the surrounding pipeline.
            pub fn normalize(value: &serde_json::Value) -> Self {
                let parsed = match value {
                    serde_json::Value::String(s) => Self::parse_str(s),
                    serde_json::Value::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            Some(Decimal::from(i))
                        } else {
                            n.as_f64().and_then(Decimal::from_f64_retain)
                        }
                    }
                    _ => None,
                };

                match parsed {
                    Some(d) => Self(d.round_dp($scale)),
                    None => {
                        warn!(raw = %value, "failed to normalize decimal value, defaulting to zero");
                        Self::ZERO
                    }
                }
            }

            /// Parse a plain or scientific-notation decimal string directly.
            /// Public so the store layer can normalize values already typed
            /// as strings without round-tripping through `serde_json::Value`.
            pub fn parse_str(s: &str) -> Option<Decimal> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                // `rust_decimal::Decimal::from_str` does not accept scientific
                // notation directly; route through `f64` for exponent forms,
                // and straight through `Decimal::from_str_exact` otherwise so
                // plain decimal strings keep their exact precision.
                if trimmed.contains(['e', 'E']) {
                    trimmed.parse::<f64>().ok().and_then(Decimal::from_f64_retain)
                } else {
                    trimmed.parse::<Decimal>().ok()
                }
            }

            pub fn from_decimal(d: Decimal) -> Self {
                Self(d.round_dp($scale))
            }

            pub fn inner(self) -> Decimal {
                self.0
            }

            pub fn zero() -> Self {
                Self::ZERO
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.*}", $scale as usize, self.0)
            }
        }

        impl std::ops::Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self::from_decimal(self.0 + rhs.0)
            }
        }

        impl std::ops::AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                *self = *self + rhs;
            }
        }

        impl std::ops::Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self::from_decimal(self.0 - rhs.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;
            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Self::parse_str(s)
                    .map(Self::from_decimal)
                    .ok_or_else(|| anyhow::anyhow!("invalid decimal literal: {s}"))
            }
        }

        // Stored as NUMERIC columns; delegate en/decoding straight to
        // `rust_decimal`'s own sqlx impl so the store layer never has to
        // round-trip through text.
        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
                let d = <Decimal as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(Self::from_decimal(d))
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

impl_fixed_point!(Dec8, 8);
impl_fixed_point!(Dec18, 18);

impl Dec18 {
    /// Convert an 18-decimal wei-denominated integer string (as returned by
    /// `eth_call`/log decoding) into the application's `dec18` type.
    pub fn from_wei_str(wei: &str) -> Self {
        match wei.parse::<Decimal>() {
            Ok(d) => Self::from_decimal(d / Decimal::from(10u64.pow(18))),
            Err(_) => {
                warn!(raw = %wei, "failed to parse wei amount, defaulting to zero");
                Self::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_plain_string() {
        let d = Dec8::normalize(&json!("1.23"));
        assert_eq!(d.to_string(), "1.23000000");
    }

    #[test]
    fn normalize_scientific_notation_string() {
        let d = Dec8::normalize(&json!("1.5E-8"));
        assert_eq!(d.to_string(), "0.00000002");
    }

    #[test]
    fn normalize_zero_scientific_notation() {
        let d = Dec8::normalize(&json!("0E-8"));
        assert_eq!(d, Dec8::ZERO);
    }

    #[test]
    fn normalize_integer_value() {
        let d = Dec8::normalize(&json!(42));
        assert_eq!(d.to_string(), "42.00000000");
    }

    #[test]
    fn normalize_unparseable_defaults_to_zero() {
        let d = Dec8::normalize(&json!("not-a-number"));
        assert_eq!(d, Dec8::ZERO);
    }

    #[test]
    fn normalize_unparseable_type_defaults_to_zero() {
        let d = Dec8::normalize(&json!(null));
        assert_eq!(d, Dec8::ZERO);
    }

    #[test]
    fn round_trip_property() {
        // normalize("1.23E-4") * 10_000 == normalize("1.23") within 8dp.
        let a = Dec8::normalize(&json!("1.23E-4"));
        let b = Dec8::normalize(&json!("1.23"));
        let scaled = Dec8::from_decimal(a.inner() * Decimal::from(10_000u32));
        assert_eq!(scaled, b);
    }

    #[test]
    fn dec18_from_wei_str() {
        // 1 token with 18 decimals.
        let d = Dec18::from_wei_str("1000000000000000000");
        assert_eq!(d.to_string(), "1.000000000000000000");
    }

    #[test]
    fn dec18_from_wei_str_invalid_defaults_to_zero() {
        let d = Dec18::from_wei_str("garbage");
        assert_eq!(d, Dec18::ZERO);
    }

    #[test]
    fn addition_preserves_scale() {
        let a = Dec8::normalize(&json!("1.00000001"));
        let b = Dec8::normalize(&json!("2.00000002"));
        assert_eq!((a + b).to_string(), "3.00000003");
    }
}
