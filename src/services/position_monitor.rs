use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::db::Pool;
use crate::error::BridgeError;
use crate::models::position::{entry_signal_category, FIBONACCI_SCALPING_CATEGORY, MONITORED_SYMBOL};
use crate::models::{Order, PositionDocument, PositionStatus};
use crate::services::bridge_client::BridgeClient;
use crate::services::exit_signal::{ExitSignal, ExitSignalGenerator, ExitType};
use crate::services::notification::{ExitNotification, Notifier};
use crate::services::position_registry::{MonitoredPosition, PositionRegistry};

/// Periodic job that walks the registry, refreshes live price/profit, gates
/// exit evaluation with policy rules, invokes the LLM-exit signal generator,
/// and -- if permitted -- closes the position via the Bridge Client and
/// notifies.
#[derive(Clone)]
pub struct PositionMonitor {
    bridge: BridgeClient,
    db: Pool,
    registry: Arc<PositionRegistry>,
    exit_signal_generator: Arc<dyn ExitSignalGenerator>,
    notifier: Arc<dyn Notifier>,
}

impl PositionMonitor {
    pub fn new(
        bridge: BridgeClient,
        db: Pool,
        registry: Arc<PositionRegistry>,
        exit_signal_generator: Arc<dyn ExitSignalGenerator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            bridge,
            db,
            registry,
            exit_signal_generator,
            notifier,
        }
    }

    pub fn add_position(
        &self,
        trade_id: Uuid,
        user_id: String,
        agent_id: String,
        symbol: String,
        entry_price: Decimal,
        entry_signal_data: serde_json::Value,
        mt4_ticket: Option<u64>,
    ) {
        self.registry.add_position(MonitoredPosition {
            trade_id,
            user_id,
            agent_id,
            symbol,
            entry_price,
            current_price: None,
            entry_time: Utc::now(),
            entry_signal_data,
            last_check_time: None,
            mt4_ticket,
        });
    }

    pub fn remove_position(&self, trade_id: Uuid) {
        self.registry.remove_position(trade_id);
    }

    /// Startup hook. The source left this as a
    /// TODO with undefined crash-recovery semantics; this
    /// core resolves it deterministically: rehydrate every PositionDocument
    /// with `status = open` that also passes the gate-1 scope filter, since
    /// those are the only entries the tick algorithm would ever act on.
    pub async fn load_existing_positions(&self) -> Result<usize, BridgeError> {
        let rows = sqlx::query_as::<_, PositionDocument>(
            "SELECT * FROM position_documents \
             WHERE status = 'open' AND symbol = $1 AND entry_signal_data->>'category' = $2",
        )
        .bind(MONITORED_SYMBOL)
        .bind(FIBONACCI_SCALPING_CATEGORY)
        .fetch_all(&self.db)
        .await?;

        let count = rows.len();
        for doc in rows {
            self.registry.add_position(MonitoredPosition {
                trade_id: doc.trade_id,
                user_id: doc.user_id,
                agent_id: doc.agent_id,
                symbol: doc.symbol,
                entry_price: doc.entry_price,
                current_price: doc.current_price,
                entry_time: doc.created_at,
                entry_signal_data: doc.entry_signal_data,
                last_check_time: None,
                mt4_ticket: doc.mt4_ticket.map(|t| t as u64),
            });
        }

        tracing::info!(count, "rehydrated monitored positions from persisted documents");
        Ok(count)
    }

    /// Scheduler entrypoint, fired every `mt4_monitor_tick_secs`. Fans out one
    /// task per entry over a snapshot so iteration never observes a
    /// concurrent `add_position`/`remove_position`, and awaits all of them.
    pub async fn monitor_all_positions(&self) {
        let snapshot = self.registry.snapshot();
        let mut handles = Vec::with_capacity(snapshot.len());

        for position in snapshot {
            let trade_id = position.trade_id;
            if !self.registry.try_begin_tick(trade_id) {
                tracing::debug!(%trade_id, "tick already in flight, skipping (single-flight)");
                continue;
            }

            let monitor = self.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = monitor.run_tick(&position).await {
                    tracing::warn!(trade_id = %position.trade_id, error = %e, "monitor tick failed");
                }
                monitor.registry.end_tick(trade_id);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "monitor tick task panicked");
            }
        }

        metrics::counter!("mt4_monitor_ticks_total").increment(1);
    }

    /// Per-position tick algorithm, gates executed strictly in order.
    /// Any error here is caught at this per-position boundary -- the tick as
    /// a whole never fails.
    async fn run_tick(&self, position: &MonitoredPosition) -> Result<(), BridgeError> {
        // 1. Scope filter.
        if position.symbol != MONITORED_SYMBOL
            || entry_signal_category(&position.entry_signal_data) != Some(FIBONACCI_SCALPING_CATEGORY)
        {
            return Ok(());
        }

        // 2. Persistent liveness.
        let mut document = match self.load_document(position.trade_id).await? {
            Some(doc) if doc.status == PositionStatus::Open => doc,
            _ => {
                self.registry.remove_position(position.trade_id);
                return Ok(());
            }
        };

        let ticket = match document.mt4_ticket {
            Some(t) => t as u64,
            None => {
                self.registry.remove_position(position.trade_id);
                return Ok(());
            }
        };

        // 3. Live refresh.
        self.refresh_live(position, &mut document, ticket).await;
        let current_price = document.current_price.unwrap_or(document.entry_price);
        let profit = document.profit;

        self.registry.update_live(position.trade_id, current_price, Utc::now());
        self.persist_live_fields(position.trade_id, current_price, profit).await?;

        let direction = Decimal::from(document.side.direction());

        // 4. Trailing-stop gate.
        if document.break_even_activated || document.trailing_stop_activated {
            tracing::debug!(trade_id = %position.trade_id, "trailing-stop gate: skipping LLM exit evaluation");
            return Ok(());
        }

        // 5. Profit-protection gate.
        if let Some(take_profit) = document.take_profit {
            if let Some(progress) = progress_to_tp(current_price, document.entry_price, take_profit, direction) {
                if progress >= Decimal::new(40, 2) {
                    tracing::debug!(trade_id = %position.trade_id, %progress, "profit-protection gate: skipping LLM exit evaluation");
                    return Ok(());
                }
            }
        }

        let minutes_open = (Utc::now() - position.entry_time).num_minutes();

        // 6. Stagnant-loser gate (overrides LLM).
        let forced_signal = stagnant_loser_signal(&document, profit, minutes_open, current_price, direction);

        let exit_signal = match forced_signal {
            Some(signal) => signal,
            None => {
                let pnl_percent = compute_pnl_percent(profit, document.entry_price, document.lot_size, current_price, direction);

                // 7. LLM exit signal.
                let signal = match self
                    .exit_signal_generator
                    .generate_exit_signal(document.entry_price, pnl_percent, &document.entry_signal_data)
                    .await
                {
                    Ok(signal) => signal,
                    Err(e) => {
                        tracing::warn!(trade_id = %position.trade_id, error = %e, "exit-signal generator failed, skipping tick");
                        return Ok(());
                    }
                };

                if !signal.should_exit {
                    return Ok(());
                }

                // 8. Winner-consensus rule.
                if profit > Decimal::ZERO && !signal.llm_recommendations.unanimous_exit() {
                    metrics::counter!("mt4_exit_vetoes_total", "gate" => "winner_consensus").increment(1);
                    tracing::info!(
                        trade_id = %position.trade_id,
                        votes = signal.llm_recommendations.exit_vote_count(),
                        "winner-consensus veto: {}/4 exit vote",
                        signal.llm_recommendations.exit_vote_count()
                    );
                    return Ok(());
                }

                signal
            }
        };

        // 9. Dispatch exit.
        self.dispatch_exit(position, &document, ticket, exit_signal).await
    }

    async fn refresh_live(&self, position: &MonitoredPosition, document: &mut PositionDocument, ticket: u64) {
        match self.bridge.get_open_positions(&position.user_id, Some(&position.symbol)).await {
            Ok(orders) => {
                if let Some(live) = orders.iter().find(|o| o.ticket == ticket) {
                    if let Some(current_price) = live.current_price {
                        document.current_price = Some(current_price);
                    }
                    document.profit = live.profit;
                }
            }
            Err(e) => {
                tracing::warn!(trade_id = %position.trade_id, ticket, error = %e, "live refresh failed, using cached values");
            }
        }
    }

    async fn load_document(&self, trade_id: Uuid) -> Result<Option<PositionDocument>, BridgeError> {
        let doc = sqlx::query_as::<_, PositionDocument>("SELECT * FROM position_documents WHERE trade_id = $1")
            .bind(trade_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(doc)
    }

    /// The monitor only ever writes `current_price`/`profit`; `status` and
    /// the activation flags belong to the external MT4-trade-manager
    /// subsystem.
    async fn persist_live_fields(&self, trade_id: Uuid, current_price: Decimal, profit: Decimal) -> Result<(), BridgeError> {
        sqlx::query("UPDATE position_documents SET current_price = $1, profit = $2, updated_at = now() WHERE trade_id = $3")
            .bind(current_price)
            .bind(profit)
            .bind(trade_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Exit execution: re-verify, then FULL or PARTIAL close.
    async fn dispatch_exit(
        &self,
        position: &MonitoredPosition,
        document: &PositionDocument,
        ticket: u64,
        exit_signal: ExitSignal,
    ) -> Result<(), BridgeError> {
        let still_open = match self.bridge.get_open_positions(&position.user_id, Some(&position.symbol)).await {
            Ok(orders) => orders.iter().any(|o| o.ticket == ticket),
            Err(e) => {
                tracing::warn!(trade_id = %position.trade_id, ticket, error = %e, "re-verify failed, attempting close anyway");
                true
            }
        };

        if !still_open {
            return self.mark_vanished(position.trade_id, ticket).await;
        }

        match exit_signal.exit_type {
            ExitType::Full => {
                let order = self.bridge.close_position(&position.user_id, ticket, None).await?;
                self.finish_exit(position, &exit_signal, order).await
            }
            // Open question #2 (resolved, see DESIGN.md): forward the
            // requested partial volume as best-effort; only fall back to a
            // FULL close if the bridge reports partial-close as unsupported.
            ExitType::Partial => {
                let pct = exit_signal.partial_exit_percentage.unwrap_or(Decimal::ONE_HUNDRED);
                let requested_volume = (document.lot_size * pct / Decimal::ONE_HUNDRED)
                    .round_dp_with_strategy(2, RoundingStrategy::ToZero);

                let order = match self.bridge.close_position(&position.user_id, ticket, Some(requested_volume)).await {
                    Ok(order) => order,
                    Err(BridgeError::OrderFailed { message, .. }) if message.to_ascii_lowercase().contains("partial") => {
                        tracing::warn!(
                            trade_id = %position.trade_id,
                            "bridge does not support partial close, falling back to full exit"
                        );
                        self.bridge.close_position(&position.user_id, ticket, None).await?
                    }
                    Err(e) => return Err(e),
                };

                self.finish_exit(position, &exit_signal, order).await
            }
        }
    }

    async fn mark_vanished(&self, trade_id: Uuid, ticket: u64) -> Result<(), BridgeError> {
        sqlx::query(
            "UPDATE position_documents SET status = 'closed', closed_at = now(), close_reason = $1, updated_at = now() WHERE trade_id = $2",
        )
        .bind("mt4-already-closed")
        .bind(trade_id)
        .execute(&self.db)
        .await?;

        self.registry.remove_position(trade_id);
        tracing::info!(%trade_id, ticket, "position vanished from bridge, reconciled as closed");
        Ok(())
    }

    async fn finish_exit(&self, position: &MonitoredPosition, exit_signal: &ExitSignal, order: Order) -> Result<(), BridgeError> {
        let performance_notes = format!("{} (confidence {})", exit_signal.reason, exit_signal.confidence);

        sqlx::query("UPDATE trade_records SET close_reason = $1, performance_notes = $2, pnl = $3, updated_at = now() WHERE trade_id = $4")
            .bind("early-exit-llm")
            .bind(&performance_notes)
            .bind(order.profit)
            .bind(position.trade_id)
            .execute(&self.db)
            .await?;

        sqlx::query(
            "UPDATE position_documents SET status = 'closed', closed_at = now(), close_reason = $1, updated_at = now() WHERE trade_id = $2",
        )
        .bind("early-exit-llm")
        .bind(position.trade_id)
        .execute(&self.db)
        .await?;

        self.registry.remove_position(position.trade_id);
        metrics::counter!("mt4_orders_closed_total", "reason" => "monitor").increment(1);

        let notification = ExitNotification {
            user_id: position.user_id.clone(),
            symbol: position.symbol.clone(),
            entry_price: position.entry_price,
            exit_price: order.current_price,
            pnl: order.profit,
            reason: exit_signal.reason.clone(),
            confidence: exit_signal.confidence,
            llm_reasons: vec![
                exit_signal.llm_recommendations.fibonacci.reason.clone(),
                exit_signal.llm_recommendations.trend_momentum.reason.clone(),
                exit_signal.llm_recommendations.volume_price_action.reason.clone(),
                exit_signal.llm_recommendations.support_resistance.reason.clone(),
            ],
        };

        if let Err(e) = self.notifier.notify_exit(notification).await {
            tracing::warn!(trade_id = %position.trade_id, error = %e, "exit notification failed");
        }

        Ok(())
    }
}

/// `((currentPrice − entryPrice) × direction) / |takeProfit − entryPrice|`.
fn progress_to_tp(current_price: Decimal, entry_price: Decimal, take_profit: Decimal, direction: Decimal) -> Option<Decimal> {
    let denom = (take_profit - entry_price).abs();
    if denom.is_zero() {
        return None;
    }
    Some((current_price - entry_price) * direction / denom)
}

/// `((entryPrice − currentPrice) × direction) / |entryPrice − stopLoss|`.
fn progress_to_sl(current_price: Decimal, entry_price: Decimal, stop_loss: Decimal, direction: Decimal) -> Option<Decimal> {
    let denom = (entry_price - stop_loss).abs();
    if denom.is_zero() {
        return None;
    }
    Some((entry_price - current_price) * direction / denom)
}

fn stagnant_loser_signal(
    document: &PositionDocument,
    profit: Decimal,
    minutes_open: i64,
    current_price: Decimal,
    direction: Decimal,
) -> Option<ExitSignal> {
    let stop_loss = document.stop_loss?;
    if profit > Decimal::ZERO || minutes_open < 10 {
        return None;
    }

    let progress = progress_to_sl(current_price, document.entry_price, stop_loss, direction)?;
    if progress < Decimal::new(50, 2) {
        return None;
    }

    let progress_pct = (progress * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(50);
    Some(ExitSignal::stagnant_loser(minutes_open, progress_pct))
}

/// `profit / (entryPrice × lotSize) × 100`, falling back to a pure
/// direction-aware price-change percent when position value is `≤ 0`.
fn compute_pnl_percent(profit: Decimal, entry_price: Decimal, lot_size: Decimal, current_price: Decimal, direction: Decimal) -> Decimal {
    let position_value = entry_price * lot_size;
    if position_value > Decimal::ZERO {
        return profit / position_value * Decimal::ONE_HUNDRED;
    }
    if entry_price.is_zero() {
        return Decimal::ZERO;
    }
    (current_price - entry_price) * direction / entry_price * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profit_protection_threshold_trips_at_forty_percent() {
        // open 43000, TP 43400, live 43180 -> 0.45 >= 0.40
        let progress = progress_to_tp(Decimal::new(4318000, 2), Decimal::new(4300000, 2), Decimal::new(4340000, 2), Decimal::ONE).unwrap();
        assert_eq!(progress, Decimal::new(45, 2));
        assert!(progress >= Decimal::new(40, 2));
    }

    #[test]
    fn stagnant_loser_threshold_trips_at_fifty_percent() {
        // open buy 43000, SL 42800, live 42900 -> 100/200 = 0.50
        let progress = progress_to_sl(Decimal::new(4290000, 2), Decimal::new(4300000, 2), Decimal::new(4280000, 2), Decimal::ONE).unwrap();
        assert_eq!(progress, Decimal::new(50, 2));
        assert!(progress >= Decimal::new(50, 2));
    }

    #[test]
    fn pnl_percent_falls_back_to_price_change_when_no_position_value() {
        let pct = compute_pnl_percent(Decimal::new(-500, 2), Decimal::new(4300000, 2), Decimal::ZERO, Decimal::new(4295000, 2), Decimal::ONE);
        assert!(pct < Decimal::ZERO);
    }
}
