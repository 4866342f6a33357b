use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors produced anywhere in the bridge client, cache, poller, or monitor.
///
/// The `IntoResponse` impl only matters for the ambient health/metrics
/// surface -- nothing in the order-submission or position-monitor path is
/// exposed over HTTP, so most variants here are surfaced through
/// `tracing::error!` at the call site rather than ever reaching a client.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("symbol unavailable: {0}")]
    SymbolUnavailable(String),

    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    #[error("order failed (code {code}): {message}")]
    OrderFailed { code: i32, message: String },

    #[error("position already closed: ticket {0}")]
    PositionAlreadyClosed(u64),

    #[error("bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("bridge timed out after {0} attempts")]
    RetriesExhausted(u32),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl BridgeError {
    /// `true` for the broker error codes the retry driver should retry
    /// against: requote, off quotes, broker
    /// busy, and a handful of transient MT4 trade-context codes.
    pub fn is_retryable_code(code: i32) -> bool {
        matches!(code, 4 | 6 | 8 | 129 | 136 | 137 | 146)
    }

    /// `4108` ("invalid ticket") is fatal -- the position is gone, retrying
    /// only wastes the attempt budget.
    pub fn is_fatal_code(code: i32) -> bool {
        code == 4108
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            BridgeError::SymbolUnavailable(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            BridgeError::InvalidVolume(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            BridgeError::OrderFailed { message, .. } => (StatusCode::BAD_GATEWAY, message.clone()),
            BridgeError::PositionAlreadyClosed(ticket) => (
                StatusCode::CONFLICT,
                format!("position already closed: ticket {ticket}"),
            ),
            BridgeError::BridgeUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            BridgeError::RetriesExhausted(attempts) => (
                StatusCode::BAD_GATEWAY,
                format!("bridge timed out after {attempts} attempts"),
            ),
            BridgeError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            BridgeError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
            BridgeError::Sqlx(e) => {
                tracing::error!("database error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "database error".into())
            }
            BridgeError::Redis(e) => {
                tracing::error!("redis error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "cache error".into())
            }
            BridgeError::Reqwest(e) => {
                tracing::error!("http client error: {e}");
                (StatusCode::BAD_GATEWAY, "upstream service error".into())
            }
            BridgeError::SerdeJson(e) => {
                tracing::error!("serialization error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization error".into())
            }
        };

        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        for code in [4, 6, 8, 129, 136, 137, 146] {
            assert!(BridgeError::is_retryable_code(code), "{code} should retry");
        }
        assert!(!BridgeError::is_retryable_code(4108));
    }

    #[test]
    fn fatal_code() {
        assert!(BridgeError::is_fatal_code(4108));
        assert!(!BridgeError::is_fatal_code(4));
    }
}
