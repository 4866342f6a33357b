use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Buy or sell direction of a broker order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "order_side", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for `Buy`, -1 for `Sell` -- used throughout the exit-policy math
    /// to express progress-toward-target in a side-agnostic way.
    pub fn direction(self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Closed,
    Pending,
}

/// A broker-side order/position record as reported by the MT4 bridge.
///
/// Invariant: `status == Closed` iff `close_time.is_some()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub current_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub profit: Decimal,
    pub swap: Decimal,
    pub commission: Decimal,
    pub open_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub status: OrderStatus,
}

// ---------------------------------------------------------------------------
// Bridge wire shapes
// ---------------------------------------------------------------------------

/// `getOpenPositions` tolerates two response shapes:
/// `{ data: { orders: [...] } }` and `{ orders: [...] }`. This wrapper
/// accepts both and normalizes to a single `Vec<WireOrder>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenPositionsResponse {
    Nested { orders: Vec<WireOrder> },
    Flat(Vec<WireOrder>),
}

impl OpenPositionsResponse {
    pub fn into_orders(self) -> Vec<WireOrder> {
        match self {
            OpenPositionsResponse::Nested { orders } => orders,
            OpenPositionsResponse::Flat(orders) => orders,
        }
    }
}

/// Raw order fields as they arrive on the wire, before being lifted into
/// the domain `Order` type (which additionally derives `status`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireOrder {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub open_price: Decimal,
    #[serde(default)]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub profit: Decimal,
    #[serde(default)]
    pub swap: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    pub open_time: DateTime<Utc>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
}

impl WireOrder {
    pub fn into_order(self) -> Order {
        let status = if self.close_time.is_some() {
            OrderStatus::Closed
        } else {
            OrderStatus::Open
        };

        Order {
            ticket: self.ticket,
            symbol: self.symbol,
            side: self.side,
            volume: self.volume,
            open_price: self.open_price,
            current_price: self.current_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            profit: self.profit,
            swap: self.swap,
            commission: self.commission,
            open_time: self.open_time,
            close_time: self.close_time,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_positions_response_nested_and_flat_agree() {
        let nested = r#"{"orders":[]}"#;
        let flat = r#"[]"#;

        let n: OpenPositionsResponse = serde_json::from_str(nested).unwrap();
        let f: OpenPositionsResponse = serde_json::from_str(flat).unwrap();

        assert_eq!(n.into_orders().len(), f.into_orders().len());
    }

    #[test]
    fn side_direction() {
        assert_eq!(Side::Buy.direction(), 1);
        assert_eq!(Side::Sell.direction(), -1);
    }
}
