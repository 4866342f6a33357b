use futures::stream::Stream;
use futures::StreamExt;
use redis::aio::ConnectionManager;

use crate::error::BridgeResult;

// ---------------------------------------------------------------------------
// Publishing (uses the shared ConnectionManager)
// ---------------------------------------------------------------------------

/// Publish `{type: "order_closed", ticket, profit, closeTime}` to
/// `mt4_order:<user_id>`. Fire-and-forget: publish failures are logged
/// and swallowed by the caller, never a reason to undo an already-completed
/// close.
pub async fn publish_order_closed(
    conn: &mut ConnectionManager,
    user_id: &str,
    data: serde_json::Value,
) -> BridgeResult<()> {
    let channel = format!("mt4_order:{user_id}");
    let payload = serde_json::to_string(&data)?;

    redis::cmd("PUBLISH")
        .arg(&channel)
        .arg(&payload)
        .query_async::<_, i64>(conn)
        .await?;

    tracing::debug!(channel = %channel, "published order_closed event");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subscribing (creates a NEW redis connection -- can't reuse ConnectionManager
// for pubsub because it enters a special subscription mode)
// ---------------------------------------------------------------------------

/// Subscribe to a single user's order-event channel and return a stream of
/// JSON strings. Consumers of this stream are out of scope for this core.
pub async fn subscribe_order_events(
    redis_url: &str,
    user_id: &str,
) -> BridgeResult<impl Stream<Item = String>> {
    let channel = format!("mt4_order:{user_id}");
    subscribe_channel(redis_url, &channel).await
}

/// Internal: open a fresh Redis connection, SUBSCRIBE to `channel`, and wrap
/// the incoming messages as an async `Stream<Item = String>`.
///
/// In redis 0.25 the pubsub API uses `Client::get_async_pubsub()` which
/// returns a dedicated `PubSub` handle (not a multiplexed connection).
async fn subscribe_channel(redis_url: &str, channel: &str) -> BridgeResult<impl Stream<Item = String>> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| crate::error::BridgeError::Internal(format!("redis client error: {e}")))?;

    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| crate::error::BridgeError::Internal(format!("redis pubsub error: {e}")))?;

    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| crate::error::BridgeError::Internal(format!("redis subscribe error: {e}")))?;

    let stream = pubsub.into_on_message().filter_map(|msg| async move { msg.get_payload::<String>().ok() });

    Ok(stream)
}
