use async_trait::async_trait;
use rust_decimal::Decimal;

/// Structured exit report pushed to the notification collaborator.
#[derive(Debug, Clone)]
pub struct ExitNotification {
    pub user_id: String,
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub pnl: Decimal,
    pub reason: String,
    pub confidence: u8,
    pub llm_reasons: Vec<String>,
}

/// Mail/Telegram transport. A failed send is logged and
/// swallowed by the caller -- it never rolls back an already-completed
/// close.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_exit(&self, notification: ExitNotification) -> anyhow::Result<()>;
}

/// No-op notifier used when no transport is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify_exit(&self, notification: ExitNotification) -> anyhow::Result<()> {
        tracing::debug!(
            user_id = %notification.user_id,
            symbol = %notification.symbol,
            pnl = %notification.pnl,
            "exit notification (no transport configured)"
        );
        Ok(())
    }
}
