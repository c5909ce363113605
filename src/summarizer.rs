// =============================================================================
// History Summarizer (C5)
// =============================================================================
//
// Keeps the prompt small while preserving a bot's "learned" reflections
// (spec §4.5). Dispatches through the LLM Dispatcher (C3) with
// `RequestKind::Summary`; on failure, leaves the previous summary in place
// and surfaces a non-fatal warning — the bot keeps trading on stale
// learning rather than blocking a turn.

use tracing::warn;

use crate::db::models::{Bot, Decision, HistorySummary, Provider};
use crate::db::Db;
use crate::error::AppResult;
use crate::llm::provider::estimate_tokens;
use crate::llm::LlmDispatcher;
use crate::types::RequestKind;

pub struct SummarizerConfig {
    pub token_budget: u32,
    pub min_new_decisions: u64,
}

pub enum SummarizeOutcome {
    Unchanged,
    Updated(HistorySummary),
    Failed { warning: String },
}

pub struct Summarizer {
    db: Db,
    dispatcher: LlmDispatcher,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(db: Db, dispatcher: LlmDispatcher, config: SummarizerConfig) -> Self {
        Self {
            db,
            dispatcher,
            config,
        }
    }

    /// Evaluates the dual trigger (token budget AND minimum new-decision
    /// count) and regenerates the summary when both hold. Both conditions
    /// must hold — this prevents per-turn thrash (spec §4.5).
    ///
    /// `current_prompt` is the prompt this turn's decision loop just
    /// assembled (or attempted) — the trigger is "the prompt + current
    /// summary + recent unsummarized decisions", not the summary and history
    /// alone.
    pub async fn maybe_summarize(
        &self,
        bot: &Bot,
        provider: &Provider,
        decrypted_api_key: &str,
        current_prompt: &str,
    ) -> AppResult<SummarizeOutcome> {
        let prior = self.db.get_history_summary(&bot.id).await?;
        let watermark = prior.as_ref().map(|s| s.summarized_count).unwrap_or(0);

        let pending = self.db.decisions_since(&bot.id, watermark).await?;
        if (pending.len() as u64) < self.config.min_new_decisions {
            return Ok(SummarizeOutcome::Unchanged);
        }

        let prior_text = prior.as_ref().map(|s| s.text.as_str()).unwrap_or("");
        // Render history the same compact way the decision loop's own prompt
        // builder does (`decision_loop::build_prompt`'s `history_block`),
        // rather than re-estimating against the full historical prompt text
        // those decisions were originally generated with.
        let history_block = compact_history_block(&pending);

        let estimated_tokens =
            estimate_tokens(current_prompt) + estimate_tokens(prior_text) + estimate_tokens(&history_block);
        if estimated_tokens < self.config.token_budget as u64 {
            return Ok(SummarizeOutcome::Unchanged);
        }

        let summarization_prompt = build_summarization_prompt(prior_text, &history_block);

        let (result, latency_ms) = self
            .dispatcher
            .call(provider, decrypted_api_key, &summarization_prompt, RequestKind::Summary)
            .await;
        let _ = latency_ms; // token-usage accounting is the caller's concern (C4)

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                let warning = format!("summarization failed, keeping prior summary: {err}");
                warn!(bot_id = %bot.id, %warning);
                return Ok(SummarizeOutcome::Failed { warning });
            }
        };

        let now = chrono::Utc::now().to_rfc3339();
        let from_timestamp = pending
            .first()
            .map(|d| d.timestamp.clone())
            .unwrap_or_else(|| now.clone());
        let to_timestamp = pending
            .last()
            .map(|d| d.timestamp.clone())
            .unwrap_or_else(|| now.clone());

        let summary = HistorySummary {
            bot_id: bot.id.clone(),
            owner_id: bot.owner_id.clone(),
            text: reply.text,
            summarized_count: watermark + pending.len() as u64,
            from_timestamp,
            to_timestamp,
            generated_at: now,
            token_count: reply.usage.output_tokens as u32,
        };

        self.db.replace_history_summary(&summary).await?;
        Ok(SummarizeOutcome::Updated(summary))
    }
}

/// Matches `decision_loop::build_prompt`'s `history_block` rendering:
/// timestamp, parsed decisions, and notes only — never the full prompt text.
fn compact_history_block(decisions: &[Decision]) -> String {
    decisions
        .iter()
        .map(|d| format!("- timestamp={} decisions={} notes={:?}", d.timestamp, d.parsed_decisions, d.notes))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_summarization_prompt(prior_summary: &str, pending_decisions: &str) -> String {
    if prior_summary.is_empty() {
        format!(
            "Summarize the following trading decisions into a concise reflection for future turns:\n{pending_decisions}"
        )
    } else {
        format!(
            "Update the prior summary with the following new decisions, preserving any still-relevant lessons.\n\nPrior summary:\n{prior_summary}\n\nNew decisions:\n{pending_decisions}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_prior_summary_omits_update_framing() {
        let prompt = build_summarization_prompt("", "decision A\ndecision B");
        assert!(prompt.contains("decision A"));
        assert!(!prompt.contains("Prior summary"));
    }

    #[test]
    fn prompt_with_prior_summary_includes_it() {
        let prompt = build_summarization_prompt("learned to avoid overtrading", "decision C");
        assert!(prompt.contains("learned to avoid overtrading"));
        assert!(prompt.contains("decision C"));
    }

    #[test]
    fn compact_history_block_omits_full_prompt_text() {
        let decision = Decision {
            id: "d1".into(),
            owner_id: "owner1".into(),
            bot_id: "bot1".into(),
            prompt: "a".repeat(10_000),
            parsed_decisions: serde_json::json!([{"action": "HOLD"}]),
            notes: vec!["hold".into()],
            success: true,
            timestamp: "2026-07-26T00:00:00Z".into(),
        };
        let block = compact_history_block(&[decision]);
        assert!(!block.contains(&"a".repeat(10_000)));
        assert!(block.contains("HOLD"));
    }
}
