// =============================================================================
// Shared domain types for the order-state projection and query surface
// =============================================================================

use serde::{Deserialize, Serialize};

/// An EVM address, stored and transported as its `0x`-prefixed hex form.
pub type Address = String;

/// A transaction hash, `0x`-prefixed hex.
pub type TxHash = String;

/// `orders.order_type` — the kind of order the contract recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    StopLoss,
    Market,
    Conditional,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Limit => "LIMIT",
            Self::StopLoss => "STOP_LOSS",
            Self::Market => "MARKET",
            Self::Conditional => "CONDITIONAL",
        };
        write!(f, "{s}")
    }
}

impl OrderType {
    /// Decode the `u8` order-type discriminant carried in contract events.
    /// Unknown discriminants fall back to `Conditional` — the catch-all the
    /// contract itself uses for order kinds it cannot further classify.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Limit,
            1 => Self::StopLoss,
            2 => Self::Market,
            _ => Self::Conditional,
        }
    }
}

/// `orders.status` — the terminal/non-terminal lifecycle state.
///
/// Transitions obey `PENDING -> {EXECUTED, CANCELLED, EXPIRED}` only; the
/// three right-hand states are terminal. The store never writes a
/// transition that violates this (see `store::orders::update_order`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Executed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Executed => "EXECUTED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "EXECUTED" => Ok(Self::Executed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(crate::error::Error::invalid(format!("unknown order status: {other}"))),
        }
    }
}

/// The four contract log topics the projector dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Created,
    Executed,
    Cancelled,
    Modified,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Executed => "EXECUTED",
            Self::Cancelled => "CANCELLED",
            Self::Modified => "MODIFIED",
        };
        write!(f, "{s}")
    }
}

/// `system_state.status` — the component cursor's own health/mode state
/// machine (spec §4.8). Distinct from `OrderStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum CursorStatus {
    Active,
    Error,
    Recovery,
    Reset,
}

impl std::fmt::Display for CursorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::Recovery => "RECOVERY",
            Self::Reset => "RESET",
        };
        write!(f, "{s}")
    }
}

/// Subscription discriminator: which stream a socket subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Candles,
    Orderbook,
}

impl SubscriptionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candles" => Some(Self::Candles),
            "orderbook" => Some(Self::Orderbook),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Candles => "candles",
            Self::Orderbook => "orderbook",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// On-chain order projection. Owned exclusively by the Order State Store;
/// the projector only ever writes through `store::orders`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub user_address: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: crate::decimal::Dec18,
    pub target_price: crate::decimal::Dec18,
    pub min_amount_out: crate::decimal::Dec18,
    pub amount_out: crate::decimal::Dec18,
    pub order_type: OrderType,
    pub is_long: bool,
    pub self_executable: bool,
    pub status: OrderStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub executed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub tx_hash: TxHash,
    pub block_number: i64,
    pub executor_address: Option<Address>,
    pub execution_tx_hash: Option<TxHash>,
}

/// Append-only audit trail row, written in the same transaction as the
/// order mutation it describes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderEvent {
    pub id: i64,
    pub order_id: i64,
    pub event_type: EventType,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub tx_hash: TxHash,
    pub block_number: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub raw_payload: serde_json::Value,
}

/// `(component_name -> last_processed_block, ...)` — survives restarts and
/// is committed by the projector in the same transaction as its events.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ComponentCursor {
    pub component_name: String,
    pub last_processed_block: i64,
    pub last_tx_hash: Option<TxHash>,
    pub status: CursorStatus,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_type_unknown_discriminant_falls_back_to_conditional() {
        assert_eq!(OrderType::from_u8(0), OrderType::Limit);
        assert_eq!(OrderType::from_u8(99), OrderType::Conditional);
    }

    #[test]
    fn order_status_parses_case_insensitively() {
        assert_eq!("pending".parse::<OrderStatus>().unwrap(), OrderStatus::Pending);
        assert!("bogus".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn terminal_status_classification() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Executed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn subscription_kind_round_trips_through_label() {
        assert_eq!(SubscriptionKind::parse("candles"), Some(SubscriptionKind::Candles));
        assert_eq!(SubscriptionKind::parse("orderbook"), Some(SubscriptionKind::Orderbook));
        assert_eq!(SubscriptionKind::parse("bogus"), None);
    }
}
