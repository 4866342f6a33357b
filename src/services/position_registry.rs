use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

/// In-memory projection of a position under active monitoring. Owned
/// exclusively by the Position Monitor.
#[derive(Debug, Clone)]
pub struct MonitoredPosition {
    pub trade_id: Uuid,
    pub user_id: String,
    pub agent_id: String,
    pub symbol: String,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub entry_time: DateTime<Utc>,
    pub entry_signal_data: Value,
    pub last_check_time: Option<DateTime<Utc>>,
    pub mt4_ticket: Option<u64>,
}

/// Process-global index of monitored positions keyed by `trade_id`, plus the
/// single-flight bookkeeping that keeps two ticks from overlapping for the
/// same entry.
#[derive(Default)]
pub struct PositionRegistry {
    positions: Mutex<HashMap<Uuid, MonitoredPosition>>,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by `trade_id`: a second call for the
    /// same trade is a no-op rather than overwriting in-flight monitor state.
    pub fn add_position(&self, position: MonitoredPosition) {
        let mut positions = self.positions.lock().expect("position registry poisoned");
        positions.entry(position.trade_id).or_insert(position);
    }

    /// No-op if absent.
    pub fn remove_position(&self, trade_id: Uuid) {
        self.positions.lock().expect("position registry poisoned").remove(&trade_id);
    }

    /// Snapshot for fan-out: iteration must not observe concurrent
    /// `add_position`/`remove_position` calls mid-tick.
    pub fn snapshot(&self) -> Vec<MonitoredPosition> {
        self.positions
            .lock()
            .expect("position registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.positions.lock().expect("position registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn update_live(&self, trade_id: Uuid, current_price: Decimal, checked_at: DateTime<Utc>) {
        if let Some(position) = self.positions.lock().expect("position registry poisoned").get_mut(&trade_id) {
            position.current_price = Some(current_price);
            position.last_check_time = Some(checked_at);
        }
    }

    /// Try to claim the single-flight slot for `trade_id`. Returns `false`
    /// if a tick is already running for this entry, in which case the
    /// caller must skip it.
    pub fn try_begin_tick(&self, trade_id: Uuid) -> bool {
        self.in_flight.lock().expect("position registry poisoned").insert(trade_id)
    }

    pub fn end_tick(&self, trade_id: Uuid) {
        self.in_flight.lock().expect("position registry poisoned").remove(&trade_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(trade_id: Uuid) -> MonitoredPosition {
        MonitoredPosition {
            trade_id,
            user_id: "user_1".into(),
            agent_id: "agent_1".into(),
            symbol: "BTCUSDT".into(),
            entry_price: Decimal::new(4300000, 2),
            current_price: None,
            entry_time: Utc::now(),
            entry_signal_data: serde_json::json!({"category": "FIBONACCI_SCALPING"}),
            last_check_time: None,
            mt4_ticket: Some(1001),
        }
    }

    #[test]
    fn add_is_idempotent_by_trade_id() {
        let registry = PositionRegistry::new();
        let trade_id = Uuid::new_v4();
        registry.add_position(sample(trade_id));
        let mut second = sample(trade_id);
        second.symbol = "ETHUSDT".into();
        registry.add_position(second);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].symbol, "BTCUSDT");
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = PositionRegistry::new();
        registry.remove_position(Uuid::new_v4());
        assert!(registry.is_empty());
    }

    #[test]
    fn single_flight_blocks_concurrent_tick() {
        let registry = PositionRegistry::new();
        let trade_id = Uuid::new_v4();

        assert!(registry.try_begin_tick(trade_id));
        assert!(!registry.try_begin_tick(trade_id));

        registry.end_tick(trade_id);
        assert!(registry.try_begin_tick(trade_id));
    }
}
