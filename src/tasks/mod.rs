pub mod position_monitor_scheduler;

use crate::AppState;

pub fn spawn_all(state: AppState) {
    tokio::spawn(position_monitor_scheduler::run(state));
    tracing::info!("background tasks spawned");
}
