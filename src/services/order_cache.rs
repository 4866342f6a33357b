use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;

use crate::models::{AccountSnapshot, Order, SymbolInfo};
use crate::redis::RedisPool;

/// Bound on the in-process order map. Fixed as a constant rather than
/// configurable, distinct from the Redis TTLs below.
pub const ORDER_CACHE_MAX_SIZE: usize = 1000;

const ORDER_TTL_SECS: u64 = 3600;
const ACCOUNT_TTL_SECS: u64 = 300;
const SYMBOLS_TTL_SECS: u64 = 3600;

/// In-process LRU over broker orders, backing the caller-driven cache-through
/// path in front of Redis.
///
/// Invariant: `entries` and `access_times` are mutated together under the
/// same lock -- no ticket may exist in one map and not the other.
pub struct OrderLru {
    inner: Mutex<LruState>,
}

struct LruState {
    entries: HashMap<u64, Order>,
    access_times: HashMap<u64, Instant>,
}

impl Default for OrderLru {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderLru {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruState {
                entries: HashMap::new(),
                access_times: HashMap::new(),
            }),
        }
    }

    /// Insert or overwrite `order`, evicting the oldest-accessed entry first
    /// if the map is at capacity and `order.ticket` is not already present.
    pub fn insert(&self, order: Order) {
        let mut state = self.inner.lock().expect("order LRU poisoned");
        let ticket = order.ticket;

        if !state.entries.contains_key(&ticket) && state.entries.len() >= ORDER_CACHE_MAX_SIZE {
            if let Some(&oldest_ticket) = state
                .access_times
                .iter()
                .min_by_key(|(_, &accessed)| accessed)
                .map(|(ticket, _)| ticket)
            {
                state.entries.remove(&oldest_ticket);
                state.access_times.remove(&oldest_ticket);
            }
        }

        state.entries.insert(ticket, order);
        state.access_times.insert(ticket, Instant::now());
    }

    /// Look up a ticket, refreshing its access time on hit.
    pub fn get(&self, ticket: u64) -> Option<Order> {
        let mut state = self.inner.lock().expect("order LRU poisoned");
        if state.entries.contains_key(&ticket) {
            state.access_times.insert(ticket, Instant::now());
        }
        state.entries.get(&ticket).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("order LRU poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` iff every entry has a corresponding access-time entry and vice
    /// versa -- the bijection invariant this type exists to uphold.
    #[cfg(test)]
    fn is_bijective(&self) -> bool {
        let state = self.inner.lock().expect("order LRU poisoned");
        state.entries.len() == state.access_times.len()
            && state.entries.keys().all(|t| state.access_times.contains_key(t))
    }
}

// ---------------------------------------------------------------------------
// Redis cache-through
// ---------------------------------------------------------------------------

/// `mt4_order:<ticket>`, TTL 3600s, plus a `mt4_orders:<symbol>` sorted-set
/// entry scored by write time for symbol-scoped lookups. Cache failures are
/// logged and swallowed: the bridge, not the cache, is authoritative.
pub async fn cache_order(redis: &RedisPool, order: &Order) {
    let mut conn = redis.clone();
    let key = format!("mt4_order:{}", order.ticket);

    let Ok(payload) = serde_json::to_string(order) else {
        tracing::warn!(ticket = order.ticket, "failed to serialize order for cache");
        return;
    };

    if let Err(e) = redis::cmd("SET")
        .arg(&key)
        .arg(&payload)
        .arg("EX")
        .arg(ORDER_TTL_SECS)
        .query_async::<_, ()>(&mut conn)
        .await
    {
        tracing::warn!(ticket = order.ticket, error = %e, "order cache write failed");
        return;
    }

    let symbol_key = format!("mt4_orders:{}", order.symbol);
    let score = Utc::now().timestamp();
    if let Err(e) = redis::cmd("ZADD")
        .arg(&symbol_key)
        .arg(score)
        .arg(order.ticket.to_string())
        .query_async::<_, ()>(&mut conn)
        .await
    {
        tracing::warn!(ticket = order.ticket, error = %e, "symbol index cache write failed");
    }
}

pub async fn get_cached_order(redis: &RedisPool, ticket: u64) -> Option<Order> {
    let mut conn = redis.clone();
    let key = format!("mt4_order:{ticket}");
    let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await.ok()?;
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

pub async fn cache_account(redis: &RedisPool, user_id: &str, snapshot: &AccountSnapshot) {
    let mut conn = redis.clone();
    let key = format!("mt4_account:{user_id}");
    let Ok(payload) = serde_json::to_string(snapshot) else {
        return;
    };
    if let Err(e) = redis::cmd("SET")
        .arg(&key)
        .arg(&payload)
        .arg("EX")
        .arg(ACCOUNT_TTL_SECS)
        .query_async::<_, ()>(&mut conn)
        .await
    {
        tracing::warn!(user_id, error = %e, "account cache write failed");
    }
}

pub async fn get_cached_account(redis: &RedisPool, user_id: &str) -> Option<AccountSnapshot> {
    let mut conn = redis.clone();
    let key = format!("mt4_account:{user_id}");
    let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await.ok()?;
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

pub async fn cache_symbols(redis: &RedisPool, user_id: &str, symbols: &[SymbolInfo]) {
    let mut conn = redis.clone();
    let key = format!("mt4_symbols:{user_id}");
    let Ok(payload) = serde_json::to_string(symbols) else {
        return;
    };
    if let Err(e) = redis::cmd("SET")
        .arg(&key)
        .arg(&payload)
        .arg("EX")
        .arg(SYMBOLS_TTL_SECS)
        .query_async::<_, ()>(&mut conn)
        .await
    {
        tracing::warn!(user_id, error = %e, "symbols cache write failed");
    }
}

pub async fn get_cached_symbols(redis: &RedisPool, user_id: &str) -> Option<Vec<SymbolInfo>> {
    let mut conn = redis.clone();
    let key = format!("mt4_symbols:{user_id}");
    let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await.ok()?;
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, Side};
    use rust_decimal::Decimal;

    fn sample_order(ticket: u64) -> Order {
        Order {
            ticket,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            volume: Decimal::new(10, 2),
            open_price: Decimal::new(4300000, 2),
            current_price: None,
            stop_loss: None,
            take_profit: None,
            profit: Decimal::ZERO,
            swap: Decimal::ZERO,
            commission: Decimal::ZERO,
            open_time: Utc::now(),
            close_time: None,
            status: OrderStatus::Open,
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let lru = OrderLru::new();
        lru.insert(sample_order(1001));
        assert_eq!(lru.get(1001).map(|o| o.ticket), Some(1001));
        assert!(lru.is_bijective());
    }

    #[test]
    fn eviction_keeps_bijection_and_bound() {
        let lru = OrderLru::new();
        for ticket in 0..(ORDER_CACHE_MAX_SIZE as u64 + 50) {
            lru.insert(sample_order(ticket));
            assert!(lru.is_bijective());
            assert!(lru.len() <= ORDER_CACHE_MAX_SIZE);
        }
        assert_eq!(lru.len(), ORDER_CACHE_MAX_SIZE);
    }

    #[test]
    fn oldest_accessed_entry_is_evicted() {
        let lru = OrderLru::new();
        for ticket in 0..ORDER_CACHE_MAX_SIZE as u64 {
            lru.insert(sample_order(ticket));
        }
        // touch ticket 0 so it is no longer the oldest
        lru.get(0);
        lru.insert(sample_order(ORDER_CACHE_MAX_SIZE as u64));

        assert!(lru.get(0).is_some());
        assert!(lru.get(1).is_none());
    }
}
