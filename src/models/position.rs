use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::order::Side;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "position_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Cancelled,
}

/// The persisted counterpart of a `MonitoredPosition`.
///
/// Invariant: `status == Open` implies a matching live MT4 position is
/// expected to exist; reconciliation is responsible for
/// correcting documents that drift from that invariant.
///
/// Field-ownership split with the external MT4-trade-manager subsystem:
/// the position monitor only ever writes `current_price` / `profit` here;
/// `status` and the two activation flags are written by that other
/// subsystem and are treated as read-only inputs by this core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionDocument {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub user_id: String,
    pub agent_id: String,
    pub mt4_ticket: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub lot_size: Decimal,
    pub profit: Decimal,
    pub status: PositionStatus,
    pub break_even_activated: bool,
    pub trailing_stop_activated: bool,
    pub entry_signal_data: serde_json::Value,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared with other subsystems; the monitor only updates `close_reason`,
/// `performance_notes`, and `pnl`, leaving `status = "filled"` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub user_id: String,
    pub symbol: String,
    pub status: String,
    pub close_reason: Option<String>,
    pub performance_notes: Option<String>,
    pub pnl: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Category tag embedded in `entry_signal_data`; only positions whose
/// category is `FIBONACCI_SCALPING` are eligible for LLM-driven exit
/// evaluation (gate 1 of the monitor tick).
pub const FIBONACCI_SCALPING_CATEGORY: &str = "FIBONACCI_SCALPING";

/// Only symbol the monitor currently evaluates (gate 1, an extensible point).
pub const MONITORED_SYMBOL: &str = "BTCUSDT";

/// Read `entrySignalData.category` out of the persisted JSON blob.
pub fn entry_signal_category(entry_signal_data: &serde_json::Value) -> Option<&str> {
    entry_signal_data.get("category").and_then(|v| v.as_str())
}
