use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::config::Config;
use crate::error::BridgeError;
use crate::models::{
    AccountSnapshot, OpenPositionsResponse, Order, OrderStatus, PriceQuote, Side, SymbolInfo,
    WireAccountSnapshot, WireOrder,
};
use crate::redis::RedisPool;
use crate::services::order_cache::{self, OrderLru};
use crate::services::order_poller;
use crate::services::pubsub;
use crate::services::retry::{run_with_retry, AttemptOutcome, RetryPolicy};
use crate::services::symbol_mapper::SymbolMapper;
use crate::utils::crypto::magic_number;

/// The only code path that talks to the MT4 bridge. Holds a single
/// shared HTTP client authenticated with *process-level* bridge credentials
/// -- never user credentials, since the bridge is account-scoped and user
/// identity is carried only in the per-call `user_id` for logging and symbol
/// lookups.
#[derive(Clone)]
pub struct BridgeClient {
    pub(crate) http_client: reqwest::Client,
    pub(crate) redis: RedisPool,
    pub(crate) config: Arc<Config>,
    pub(crate) symbol_mapper: Arc<dyn SymbolMapper>,
    pub(crate) order_lru: Arc<OrderLru>,
}

fn min_volume() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

impl BridgeClient {
    pub fn new(
        http_client: reqwest::Client,
        redis: RedisPool,
        config: Arc<Config>,
        symbol_mapper: Arc<dyn SymbolMapper>,
        order_lru: Arc<OrderLru>,
    ) -> Self {
        Self {
            http_client,
            redis,
            config,
            symbol_mapper,
            order_lru,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.mt4_bridge_url, path)
    }

    fn basic_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.config.mt4_bridge_username, Some(&self.config.mt4_bridge_password))
    }

    /// Drive a request through the retry matrix: linear backoff on
    /// transport errors and retryable broker codes, immediate return on
    /// fatal codes.
    async fn send_with_retry<T, F>(&self, mut make_request: F) -> Result<T, BridgeError>
    where
        T: for<'de> Deserialize<'de>,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let policy = RetryPolicy::from_config(&self.config);
        run_with_retry(&policy, |_attempt| {
            let request = make_request();
            async move {
                match request.send().await {
                    Ok(response) => match response.json::<BridgeEnvelope<T>>().await {
                        Ok(envelope) if envelope.success => match envelope.data {
                            Some(data) => AttemptOutcome::Done(data),
                            None => AttemptOutcome::Fatal(BridgeError::Internal(
                                "bridge reported success with no data".into(),
                            )),
                        },
                        Ok(envelope) => classify_broker_error(envelope.error.unwrap_or_else(|| "unknown bridge error".into())),
                        Err(e) => AttemptOutcome::Retry(BridgeError::Reqwest(e)),
                    },
                    Err(e) => AttemptOutcome::Retry(BridgeError::Reqwest(e)),
                }
            }
        })
        .await
    }

    // -----------------------------------------------------------------
    // createMarketOrder
    // -----------------------------------------------------------------

    pub async fn create_market_order(
        &self,
        user_id: &str,
        universal_symbol: &str,
        side: Side,
        volume: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<Order, BridgeError> {
        let broker_symbol = self
            .symbol_mapper
            .to_broker_symbol(universal_symbol)
            .await
            .ok_or_else(|| BridgeError::SymbolUnavailable(universal_symbol.to_string()))?;

        if volume < min_volume() {
            return Err(BridgeError::InvalidVolume(format!(
                "volume {volume} is below the 0.01 minimum"
            )));
        }

        let magic = magic_number(user_id);
        let body = serde_json::json!({
            "symbol": broker_symbol,
            "side": side_wire(side),
            "volume": volume,
            "stopLoss": stop_loss.unwrap_or(Decimal::ZERO),
            "takeProfit": take_profit.unwrap_or(Decimal::ZERO),
            "magicNumber": magic,
        });

        let wire_order: WireOrder = self
            .send_with_retry(|| self.basic_auth(self.http_client.post(self.url("/api/v1/orders"))).json(&body))
            .await?;

        let order = wire_order.into_order();
        order_cache::cache_order(&self.redis, &order).await;
        self.order_lru.insert(order.clone());
        metrics::counter!("mt4_orders_created_total").increment(1);

        order_poller::spawn(self.clone(), order.ticket, user_id.to_string());

        Ok(order)
    }

    // -----------------------------------------------------------------
    // closePosition
    // -----------------------------------------------------------------

    pub async fn close_position(&self, user_id: &str, ticket: u64, volume: Option<Decimal>) -> Result<Order, BridgeError> {
        let open = self.get_open_positions(user_id, None).await?;
        if !open.iter().any(|o| o.ticket == ticket) {
            return Err(BridgeError::PositionAlreadyClosed(ticket));
        }

        let body = serde_json::json!({
            "ticket": ticket,
            "volume": volume.unwrap_or(Decimal::ZERO),
        });

        let wire_order: WireOrder = self
            .send_with_retry(|| self.basic_auth(self.http_client.post(self.url("/api/v1/orders/close"))).json(&body))
            .await?;

        let mut order = wire_order.into_order();
        // the bridge's close response is minimal and may lack close_time
        order.status = OrderStatus::Closed;
        if order.close_time.is_none() {
            order.close_time = Some(Utc::now());
        }

        order_cache::cache_order(&self.redis, &order).await;
        self.order_lru.insert(order.clone());
        metrics::counter!("mt4_orders_closed_total", "reason" => "api").increment(1);

        let payload = serde_json::json!({
            "type": "order_closed",
            "ticket": order.ticket,
            "profit": order.profit,
            "closeTime": order.close_time,
        });
        let mut conn = self.redis.clone();
        if let Err(e) = pubsub::publish_order_closed(&mut conn, user_id, payload).await {
            tracing::warn!(ticket, error = %e, "failed to publish order_closed event");
        }

        Ok(order)
    }

    // -----------------------------------------------------------------
    // closeAllPositions
    // -----------------------------------------------------------------

    pub async fn close_all_positions(&self, user_id: &str, universal_symbol: Option<&str>) -> Result<CloseAllResult, BridgeError> {
        let broker_symbol = match universal_symbol {
            Some(sym) => self.symbol_mapper.to_broker_symbol(sym).await.unwrap_or_default(),
            None => String::new(),
        };

        let body = serde_json::json!({ "symbol": broker_symbol });

        // no retry loop beyond the transport layer -- the bridge is
        // authoritative for counts.
        let response = self
            .basic_auth(self.http_client.post(self.url("/api/v1/orders/close-all")))
            .json(&body)
            .send()
            .await?;
        let envelope: BridgeEnvelope<CloseAllResult> = response.json().await?;

        if !envelope.success {
            return Err(BridgeError::OrderFailed {
                code: 0,
                message: envelope.error.unwrap_or_else(|| "close-all failed".into()),
            });
        }

        tracing::info!(user_id, "close-all dispatched");
        envelope
            .data
            .ok_or_else(|| BridgeError::Internal("bridge reported success with no data".into()))
    }

    // -----------------------------------------------------------------
    // modifyStopLoss
    // -----------------------------------------------------------------

    pub async fn modify_stop_loss(
        &self,
        _user_id: &str,
        ticket: u64,
        new_stop_loss: Option<Decimal>,
        new_take_profit: Option<Decimal>,
    ) -> Result<Order, BridgeError> {
        let body = serde_json::json!({
            "stopLoss": new_stop_loss,
            "takeProfit": new_take_profit,
        });

        let wire_order: WireOrder = self
            .send_with_retry(|| self.basic_auth(self.http_client.put(self.url(&format!("/api/v1/orders/{ticket}")))).json(&body))
            .await?;

        let order = wire_order.into_order();
        order_cache::cache_order(&self.redis, &order).await;
        self.order_lru.insert(order.clone());
        Ok(order)
    }

    // -----------------------------------------------------------------
    // getOpenPositions
    // -----------------------------------------------------------------

    pub async fn get_open_positions(&self, user_id: &str, universal_symbol: Option<&str>) -> Result<Vec<Order>, BridgeError> {
        let mut request = self.basic_auth(self.http_client.get(self.url("/api/v1/orders/open")));

        if let Some(sym) = universal_symbol {
            if let Some(broker_symbol) = self.symbol_mapper.to_broker_symbol(sym).await {
                request = request.query(&[("symbol", broker_symbol)]);
            }
        }

        let response = request.send().await?;
        let envelope: BridgeEnvelope<OpenPositionsResponse> = response.json().await?;

        if !envelope.success {
            return Err(BridgeError::BridgeUnavailable(
                envelope.error.unwrap_or_else(|| "getOpenPositions failed".into()),
            ));
        }

        let orders: Vec<Order> = envelope
            .data
            .map(OpenPositionsResponse::into_orders)
            .unwrap_or_default()
            .into_iter()
            .map(WireOrder::into_order)
            .collect();

        for order in &orders {
            order_cache::cache_order(&self.redis, order).await;
            self.order_lru.insert(order.clone());
        }

        tracing::debug!(user_id, count = orders.len(), "fetched open positions");
        Ok(orders)
    }

    /// Single-order state. No local cache read: the
    /// poller wants the live bridge state on every attempt.
    pub async fn get_order(&self, user_id: &str, ticket: u64) -> Result<Order, BridgeError> {
        let response = self
            .basic_auth(self.http_client.get(self.url(&format!("/api/v1/orders/{ticket}"))))
            .send()
            .await?;
        let envelope: BridgeEnvelope<WireOrder> = response.json().await?;

        if !envelope.success {
            return Err(BridgeError::NotFound(format!("ticket {ticket} not found")));
        }

        let order = envelope
            .data
            .ok_or_else(|| BridgeError::Internal("bridge reported success with no data".into()))?
            .into_order();

        order_cache::cache_order(&self.redis, &order).await;
        self.order_lru.insert(order.clone());
        tracing::trace!(user_id, ticket, status = ?order.status, "polled order state");
        Ok(order)
    }

    // -----------------------------------------------------------------
    // getBalance
    // -----------------------------------------------------------------

    pub async fn get_balance(&self, user_id: &str) -> Result<AccountSnapshot, BridgeError> {
        if let Some(cached) = order_cache::get_cached_account(&self.redis, user_id).await {
            return Ok(cached);
        }

        let response = self
            .basic_auth(self.http_client.get(self.url("/api/v1/account/info")))
            .send()
            .await?;
        let envelope: BridgeEnvelope<WireAccountSnapshot> = response.json().await?;

        if !envelope.success {
            return Err(BridgeError::BridgeUnavailable(
                envelope.error.unwrap_or_else(|| "getBalance failed".into()),
            ));
        }

        let wire = envelope
            .data
            .ok_or_else(|| BridgeError::Internal("bridge reported success with no data".into()))?;
        let margin_level = AccountSnapshot::compute_margin_level(wire.equity, wire.margin);

        let snapshot = AccountSnapshot {
            account_number: wire.account_number,
            broker: wire.broker,
            currency: wire.currency,
            balance: wire.balance,
            equity: wire.equity,
            margin: wire.margin,
            free_margin: wire.free_margin,
            margin_level,
            profit: wire.profit,
        };

        order_cache::cache_account(&self.redis, user_id, &snapshot).await;
        Ok(snapshot)
    }

    // -----------------------------------------------------------------
    // getAvailableSymbols
    // -----------------------------------------------------------------

    pub async fn get_available_symbols(&self, user_id: &str) -> Result<Vec<SymbolInfo>, BridgeError> {
        if let Some(cached) = order_cache::get_cached_symbols(&self.redis, user_id).await {
            return Ok(cached);
        }

        let response = self.basic_auth(self.http_client.get(self.url("/api/v1/symbols"))).send().await?;
        let envelope: BridgeEnvelope<Vec<SymbolInfo>> = response.json().await?;

        if !envelope.success {
            return Err(BridgeError::BridgeUnavailable(
                envelope.error.unwrap_or_else(|| "getAvailableSymbols failed".into()),
            ));
        }

        let symbols = envelope.data.unwrap_or_default();
        order_cache::cache_symbols(&self.redis, user_id, &symbols).await;
        Ok(symbols)
    }

    // -----------------------------------------------------------------
    // getPrice (never cached -- scalping is latency-sensitive to stale prices)
    // -----------------------------------------------------------------

    pub async fn get_price(&self, _user_id: &str, universal_symbol: &str) -> Result<PriceQuote, BridgeError> {
        let broker_symbol = self
            .symbol_mapper
            .to_broker_symbol(universal_symbol)
            .await
            .ok_or_else(|| BridgeError::SymbolUnavailable(universal_symbol.to_string()))?;

        let response = self
            .basic_auth(self.http_client.get(self.url(&format!("/api/v1/price/{broker_symbol}"))))
            .send()
            .await?;
        let envelope: BridgeEnvelope<PriceQuote> = response.json().await?;

        if !envelope.success {
            return Err(BridgeError::BridgeUnavailable(
                envelope.error.unwrap_or_else(|| "getPrice failed".into()),
            ));
        }

        envelope
            .data
            .ok_or_else(|| BridgeError::Internal("bridge reported success with no data".into()))
    }

    // -----------------------------------------------------------------
    // ping / pingBridge
    // -----------------------------------------------------------------

    /// `true` only if the bridge is reachable and reports ZMQ connectivity.
    pub async fn ping(&self, _user_id: &str) -> bool {
        self.ping_bridge().await.connected
    }

    /// The only call that must work without any user record present -- used
    /// by health checks.
    pub async fn ping_bridge(&self) -> BridgePingResult {
        let bridge_url = self.config.mt4_bridge_url.clone();

        let response = match self.basic_auth(self.http_client.get(self.url("/api/v1/ping"))).send().await {
            Ok(r) => r,
            Err(e) => {
                return BridgePingResult {
                    connected: false,
                    bridge_url: Some(bridge_url),
                    error: Some(e.to_string()),
                }
            }
        };

        match response.json::<BridgeEnvelope<PingData>>().await {
            Ok(envelope) => {
                let connected = envelope.data.map(|d| d.zmq_connected).unwrap_or(false);
                BridgePingResult {
                    connected,
                    bridge_url: Some(bridge_url),
                    error: if connected { None } else { envelope.error },
                }
            }
            Err(e) => BridgePingResult {
                connected: false,
                bridge_url: Some(bridge_url),
                error: Some(e.to_string()),
            },
        }
    }

    // -----------------------------------------------------------------
    // calculateLotSize
    // -----------------------------------------------------------------

    /// Fixed lot sizing by policy, not risk-based: empirically,
    /// LLM-derived position sizes were unstable, so this core always returns
    /// the configured default, clamped into `[min, max]` and floor-quantized
    /// to two decimals. `usdt_amount`, `stop_loss_price`, and `entry_price`
    /// are accepted but ignored, preserved only for caller compatibility.
    pub fn calculate_lot_size(
        &self,
        _user_id: &str,
        _universal_symbol: &str,
        _usdt_amount: Decimal,
        _stop_loss_price: Option<Decimal>,
        _entry_price: Option<Decimal>,
    ) -> Decimal {
        let default_lot: Decimal = self.config.mt4_default_lot_size.parse().unwrap_or_else(|_| Decimal::new(10, 2));
        let min_lot: Decimal = self.config.mt4_min_lot_size.parse().unwrap_or_else(|_| Decimal::new(1, 2));
        let max_lot: Decimal = self.config.mt4_max_lot_size.parse().unwrap_or(Decimal::ONE);

        clamp_lot_size(default_lot, min_lot, max_lot)
    }
}

fn clamp_lot_size(lot: Decimal, min: Decimal, max: Decimal) -> Decimal {
    lot.max(min).min(max).round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

fn side_wire(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn classify_broker_error<T>(message: String) -> AttemptOutcome<T> {
    match parse_broker_error_code(&message) {
        Some(code) if BridgeError::is_retryable_code(code) => AttemptOutcome::Retry(BridgeError::OrderFailed { code, message }),
        Some(code) => AttemptOutcome::Fatal(BridgeError::OrderFailed { code, message }),
        None => AttemptOutcome::Fatal(BridgeError::OrderFailed { code: 0, message }),
    }
}

/// Broker error strings embed `"error code: <n>"`; this extracts `<n>`
/// without pulling in a regex dependency for one fixed pattern.
fn parse_broker_error_code(message: &str) -> Option<i32> {
    let lower = message.to_ascii_lowercase();
    let marker = "error code:";
    let idx = lower.find(marker)?;
    let rest = &message[idx + marker.len()..];
    let digits: String = rest.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Wire types local to the bridge client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct BridgeEnvelope<T> {
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct PingData {
    #[serde(default)]
    zmq_connected: bool,
}

#[derive(Debug, Clone)]
pub struct BridgePingResult {
    pub connected: bool,
    pub bridge_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloseAllResult {
    pub closed: u32,
    pub failed: u32,
    #[serde(rename = "totalProfit")]
    pub total_profit: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broker_error_code() {
        assert_eq!(parse_broker_error_code("Trade context busy (error code: 146)"), Some(146));
        assert_eq!(parse_broker_error_code("Invalid ticket (error code: 4108)"), Some(4108));
        assert_eq!(parse_broker_error_code("no code here"), None);
    }

    #[test]
    fn lot_size_clamps_and_floors() {
        assert_eq!(clamp_lot_size(Decimal::new(500, 2), Decimal::new(1, 2), Decimal::ONE), Decimal::ONE);
        assert_eq!(clamp_lot_size(Decimal::new(0, 2), Decimal::new(1, 2), Decimal::ONE), Decimal::new(1, 2));
        assert_eq!(
            clamp_lot_size(Decimal::new(1239, 4), Decimal::new(1, 2), Decimal::new(100, 2)),
            Decimal::new(12, 2)
        );
    }

    #[test]
    fn volume_boundary() {
        assert!(Decimal::new(9, 3) < min_volume());
        assert!(Decimal::new(1, 2) >= min_volume());
    }
}
