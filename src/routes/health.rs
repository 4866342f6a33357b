use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};
use crate::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    db: &'static str,
    redis: &'static str,
    bridge: &'static str,
    version: &'static str,
}

/// Ambient ops surface only: the REST/WS consumer and
/// dashboard that front this core are out of scope, so this crate exposes
/// nothing beyond liveness, readiness, and Prometheus metrics.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

/// Liveness probe: always returns 200 with component status.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = check_db(&state).await;
    let redis_ok = check_redis(&state).await;
    let bridge_ok = state.bridge.ping_bridge().await.connected;

    let overall = if db_ok && redis_ok && bridge_ok { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: overall,
        db: if db_ok { "connected" } else { "disconnected" },
        redis: if redis_ok { "connected" } else { "disconnected" },
        bridge: if bridge_ok { "connected" } else { "disconnected" },
        version: VERSION,
    })
}

/// Readiness probe: returns 200 only when ALL backing services -- including
/// the MT4 bridge's own ZMQ liveness -- are reachable.
async fn readiness_check(State(state): State<AppState>) -> BridgeResult<Json<HealthResponse>> {
    let db_ok = check_db(&state).await;
    let redis_ok = check_redis(&state).await;
    let bridge_ok = state.bridge.ping_bridge().await.connected;

    if !db_ok || !redis_ok || !bridge_ok {
        return Err(BridgeError::BridgeUnavailable("backing service unreachable".into()));
    }

    Ok(Json(HealthResponse {
        status: "ready",
        db: "connected",
        redis: "connected",
        bridge: "connected",
        version: VERSION,
    }))
}

async fn check_db(state: &AppState) -> bool {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db).await.is_ok()
}

async fn check_redis(state: &AppState) -> bool {
    let mut conn = state.redis.clone();
    redis::cmd("PING").query_async::<_, String>(&mut conn).await.is_ok()
}
