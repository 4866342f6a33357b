use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One analyzer's vote inside an `ExitSignal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerVote {
    pub exit: bool,
    pub reason: String,
}

/// The four named analyzers the winner-consensus rule counts over. Field names are load-bearing: external callers key
/// off them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRecommendations {
    pub fibonacci: AnalyzerVote,
    pub trend_momentum: AnalyzerVote,
    pub volume_price_action: AnalyzerVote,
    pub support_resistance: AnalyzerVote,
}

impl LlmRecommendations {
    /// Number of analyzers voting to exit (0-4).
    pub fn exit_vote_count(&self) -> u8 {
        [
            &self.fibonacci,
            &self.trend_momentum,
            &self.volume_price_action,
            &self.support_resistance,
        ]
        .iter()
        .filter(|v| v.exit)
        .count() as u8
    }

    /// `true` iff all four analyzers voted to exit -- the winner-consensus
    /// requirement for closing a profitable position.
    pub fn unanimous_exit(&self) -> bool {
        self.exit_vote_count() == 4
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitType {
    Full,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSignal {
    pub should_exit: bool,
    pub exit_type: ExitType,
    pub partial_exit_percentage: Option<Decimal>,
    pub confidence: u8,
    pub reason: String,
    pub llm_recommendations: LlmRecommendations,
}

impl ExitSignal {
    /// Synthesize the forced stagnant-loser signal: a FULL
    /// exit at fixed confidence 80 that bypasses the LLM call entirely.
    pub fn stagnant_loser(minutes_open: i64, progress_to_sl_pct: i64) -> Self {
        let vote = AnalyzerVote {
            exit: true,
            reason: "stagnant-loser override".into(),
        };
        Self {
            should_exit: true,
            exit_type: ExitType::Full,
            partial_exit_percentage: None,
            confidence: 80,
            reason: format!("Stagnant loser: {minutes_open}min open, {progress_to_sl_pct}% to SL"),
            llm_recommendations: LlmRecommendations {
                fibonacci: vote.clone(),
                trend_momentum: vote.clone(),
                volume_price_action: vote.clone(),
                support_resistance: vote,
            },
        }
    }
}

/// `generateExitSignal`: the only call this core makes into the LLM
/// exit-analysis panel. The panel's internals (prompting, model selection,
/// consensus aggregation) are out of scope; this core only consumes the
/// resulting four-way vote.
#[async_trait]
pub trait ExitSignalGenerator: Send + Sync {
    async fn generate_exit_signal(
        &self,
        entry_price: Decimal,
        pnl_percent: Decimal,
        entry_signal_data: &Value,
    ) -> anyhow::Result<ExitSignal>;
}

/// Default production collaborator: posts `{entryPrice, pnlPercent,
/// entrySignalData}` to a configured LLM exit-analysis panel endpoint and
/// parses its `ExitSignal` response.
///
/// The panel's internals are out of scope; this is only the thin client
/// edge, analogous to how `BridgeClient` is the thin edge onto the MT4
/// bridge -- no retry matrix here, since the panel is not the broker and a
/// failed call just skips the tick.
pub struct HttpExitSignalGenerator {
    http_client: reqwest::Client,
    endpoint_url: String,
}

impl HttpExitSignalGenerator {
    pub fn new(http_client: reqwest::Client, endpoint_url: String) -> Self {
        Self {
            http_client,
            endpoint_url,
        }
    }
}

#[async_trait]
impl ExitSignalGenerator for HttpExitSignalGenerator {
    async fn generate_exit_signal(
        &self,
        entry_price: Decimal,
        pnl_percent: Decimal,
        entry_signal_data: &Value,
    ) -> anyhow::Result<ExitSignal> {
        let body = serde_json::json!({
            "entryPrice": entry_price,
            "pnlPercent": pnl_percent,
            "entrySignalData": entry_signal_data,
        });

        let signal = self
            .http_client
            .post(&self.endpoint_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<ExitSignal>()
            .await?;

        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(exit: bool) -> AnalyzerVote {
        AnalyzerVote {
            exit,
            reason: "test".into(),
        }
    }

    #[test]
    fn unanimous_requires_all_four() {
        let three_of_four = LlmRecommendations {
            fibonacci: vote(true),
            trend_momentum: vote(true),
            volume_price_action: vote(false),
            support_resistance: vote(true),
        };
        assert_eq!(three_of_four.exit_vote_count(), 3);
        assert!(!three_of_four.unanimous_exit());

        let all_four = LlmRecommendations {
            fibonacci: vote(true),
            trend_momentum: vote(true),
            volume_price_action: vote(true),
            support_resistance: vote(true),
        };
        assert!(all_four.unanimous_exit());
    }

    #[test]
    fn stagnant_loser_signal_shape() {
        let signal = ExitSignal::stagnant_loser(11, 50);
        assert!(signal.should_exit);
        assert_eq!(signal.exit_type, ExitType::Full);
        assert_eq!(signal.confidence, 80);
        assert_eq!(signal.reason, "Stagnant loser: 11min open, 50% to SL");
    }
}
