use std::time::Duration;

use crate::models::OrderStatus;
use crate::services::bridge_client::BridgeClient;
use crate::services::pubsub;

/// Spawn a bounded per-ticket poller: polls the bridge for `ticket`
/// every `mt4_poll_interval` up to `mt4_poll_max_attempts` times, writing
/// through the cache on every response and publishing `order_closed` on the
/// first observed terminal status.
///
/// Holds no locks; it only touches the cache and the pub/sub channel.
/// On `max_attempts` reached it terminates silently -- authoritative close
/// detection then falls back to the position monitor's live-fetch and
/// reconciliation.
pub fn spawn(client: BridgeClient, ticket: u64, user_id: String) {
    tokio::spawn(async move {
        run(client, ticket, user_id).await;
    });
}

async fn run(client: BridgeClient, ticket: u64, user_id: String) {
    let interval = client.config.mt4_poll_interval();
    let max_attempts = client.config.mt4_poll_max_attempts;

    for attempt in 1..=max_attempts {
        match client.get_order(&user_id, ticket).await {
            Ok(order) => {
                if order.status == OrderStatus::Closed {
                    let payload = serde_json::json!({
                        "type": "order_closed",
                        "ticket": order.ticket,
                        "profit": order.profit,
                        "closeTime": order.close_time,
                    });
                    let mut conn = client.redis.clone();
                    if let Err(e) = pubsub::publish_order_closed(&mut conn, &user_id, payload).await {
                        tracing::warn!(ticket, error = %e, "poller failed to publish order_closed");
                    }
                    tracing::debug!(ticket, attempt, "poller observed terminal close, stopping");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(ticket, attempt, error = %e, "poller failed to fetch order state");
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::debug!(ticket, max_attempts, "poller exhausted attempts without observing close");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn poll_budget_matches_spec() {
        // 2s interval * 30 attempts ~= 1 minute
        let interval = StdDuration::from_secs(2);
        let max_attempts = 30u32;
        assert_eq!(interval.as_secs() * max_attempts as u64, 60);
    }
}
