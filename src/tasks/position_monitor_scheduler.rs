use tokio::time;

use crate::AppState;

/// Recurring timer driving the Position Monitor: on startup, rehydrate the registry
/// from persisted open positions, then fire `monitor_all_positions` every
/// `mt4_monitor_tick_secs`.
///
/// Single-flight per `tradeId` is enforced inside `PositionMonitor` itself
/// (`PositionRegistry::try_begin_tick`), so a slow tick here never blocks the
/// next timer fire from covering the other positions.
pub async fn run(state: AppState) {
    match state.monitor.load_existing_positions().await {
        Ok(count) => tracing::info!(count, "position monitor: seeded registry on startup"),
        Err(e) => tracing::error!(error = %e, "position monitor: failed to load existing positions"),
    }

    let mut interval = time::interval(state.config.mt4_monitor_tick());

    loop {
        interval.tick().await;
        state.monitor.monitor_all_positions().await;
    }
}
