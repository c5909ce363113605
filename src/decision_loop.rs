// =============================================================================
// Decision Loop (C7)
// =============================================================================
//
// One invocation per bot turn (spec §4.7): assembles a prompt from the bot's
// current state, resolves any ANALYZE tool calls locally, executes the
// resulting trading decisions against the Trading Engine (C6), and persists
// a Decision + Snapshot row. Grounded on the teacher's `decision_envelope.rs`
// builder-constructor shape and `strategy.rs`'s per-tick control flow,
// generalized from a fixed technical-analysis pipeline to an LLM-driven one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{Bot, Decision, Provider, Snapshot};
use crate::db::Db;
use crate::error::AppResult;
use crate::llm::provider::DispatchError;
use crate::llm::LlmDispatcher;
use crate::summarizer::Summarizer;
use crate::token_tracker::{TokenTracker, UsageEvent};
use crate::trading::engine::{CloseOutcome, OpenOutcome, SnapshotDraft, TradingEngine, TurnWrite};
use crate::trading::tools::{self, ToolContext};
use crate::types::{CloseReason, PositionSide, ProposedAction, RequestKind};
use crate::config::Settings;

const MAX_ITERATIONS: u32 = 5;
const RETRY_BACKOFF_MS: u64 = 300;

/// Read-mostly market state refreshed by a single background task and
/// shared across every bot's turn (spec §4.8.2).
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub prices: HashMap<String, f64>,
    pub change_24h_pct: HashMap<String, f64>,
    pub closes_by_symbol: HashMap<String, Vec<f64>>,
}

impl MarketSnapshot {
    fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }
}

pub struct TurnOutcome {
    pub decision: Decision,
    pub snapshot: Snapshot,
}

pub struct DecisionLoop {
    db: Db,
    dispatcher: LlmDispatcher,
    engine: Arc<TradingEngine>,
    summarizer: Arc<Summarizer>,
    token_tracker: Arc<TokenTracker>,
}

impl DecisionLoop {
    pub fn new(
        db: Db,
        dispatcher: LlmDispatcher,
        engine: Arc<TradingEngine>,
        summarizer: Arc<Summarizer>,
        token_tracker: Arc<TokenTracker>,
    ) -> Self {
        Self {
            db,
            dispatcher,
            engine,
            summarizer,
            token_tracker,
        }
    }

    /// Writes a `Snapshot` on demand, outside the regular turn cadence — used
    /// by the manual `POST /bots/:id/snapshot` endpoint so a caller can force
    /// a balance/PnL data point between scheduled turns.
    pub async fn write_manual_snapshot(
        &self,
        bot: &Bot,
        ledger: &crate::trading::engine::BotLedger,
        now: DateTime<Utc>,
    ) -> AppResult<Snapshot> {
        self.write_snapshot(bot, ledger, now).await
    }

    /// Runs one bot turn to completion: prompt assembly, the multi-iteration
    /// ANALYZE loop, execution of the final decisions, and persistence. Never
    /// modifies positions if the LLM call ultimately fails (spec §4.7.3).
    pub async fn run_turn(
        &self,
        bot: &Bot,
        provider: &Provider,
        decrypted_api_key: &str,
        market: &MarketSnapshot,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> AppResult<TurnOutcome> {
        let allowed_symbols = bot
            .allowed_symbols
            .clone()
            .unwrap_or_else(|| settings.trading_symbols.clone());

        let ledger = self.engine.ledger_snapshot(&bot.id).unwrap_or_default();
        let recent_trades = self.db.recent_closed_trades(&bot.id, 10).await?;
        let recent_decisions = self.db.list_decisions_for_bot(&bot.id, 5).await?;
        let history_summary = self.db.get_history_summary(&bot.id).await?;

        let mut accumulated_analyses: Vec<Value> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut iteration: u32 = 1;

        let (final_prompt, final_decisions) = loop {
            let prompt = build_prompt(
                bot,
                &ledger,
                &recent_trades,
                &allowed_symbols,
                market,
                &recent_decisions,
                history_summary.as_ref(),
                &accumulated_analyses,
                now,
            );

            let (result, latency_ms) = self.call_with_retry(provider, decrypted_api_key, &prompt).await;

            let reply = match result {
                Ok(reply) => {
                    self.record_usage(bot, provider, &prompt, reply.usage.input_tokens, reply.usage.output_tokens, latency_ms, now)
                        .await;
                    reply
                }
                Err(err) => {
                    let usage = err.fallback_usage(&prompt);
                    self.record_usage(bot, provider, &prompt, usage.input_tokens, usage.output_tokens, latency_ms, now)
                        .await;

                    let note = format!("llm call failed: {err}");
                    warn!(bot_id = %bot.id, %note);
                    let decision = build_decision(bot, &prompt, &json!([]), vec![note], false, now);
                    let draft = snapshot_draft(bot, &ledger, now);
                    let snapshot = self.engine.persist_turn(Vec::new(), decision.clone(), draft).await?;
                    self.spawn_summarizer(bot.clone(), provider.clone(), decrypted_api_key.to_string(), prompt.clone());
                    return Ok(TurnOutcome { decision, snapshot });
                }
            };

            let decisions = parse_decisions(&reply.text);

            if iteration >= MAX_ITERATIONS {
                notes.push(format!("iteration cap reached at {iteration}; residual ANALYZE decisions discarded"));
                let non_analyze: Vec<ProposedAction> =
                    decisions.into_iter().filter(|d| !d.is_analyze()).collect();
                break (prompt, non_analyze);
            }

            let (analyze, non_analyze): (Vec<ProposedAction>, Vec<ProposedAction>) =
                decisions.into_iter().partition(ProposedAction::is_analyze);

            if analyze.is_empty() {
                notes.push(format!("iterations: {iteration}"));
                break (prompt, non_analyze);
            }

            let ctx = ToolContext {
                closes_by_symbol: market.closes_by_symbol.clone(),
                now,
            };
            for action in analyze {
                if let ProposedAction::Analyze { tool, parameters } = action {
                    let result = tools::run_tool(&tool, &parameters, &ctx);
                    accumulated_analyses.push(json!({ "tool": tool, "params": parameters, "result": result }));
                }
            }
            iteration += 1;
        };

        let _ = final_prompt;

        let mut success = true;
        let mut pending_writes: Vec<TurnWrite> = Vec::new();
        for action in &final_decisions {
            match action {
                ProposedAction::Long { symbol, size, leverage, stop_loss, take_profit }
                | ProposedAction::Short { symbol, size, leverage, stop_loss, take_profit } => {
                    let side = if matches!(action, ProposedAction::Long { .. }) {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    };
                    let Some(mark_price) = market.price(symbol) else {
                        notes.push(format!("no mark price available for {symbol}; {} skipped", action.kind()));
                        continue;
                    };
                    match self
                        .engine
                        .open(
                            &bot.id,
                            &bot.owner_id,
                            side,
                            symbol,
                            *size,
                            *leverage,
                            *stop_loss,
                            *take_profit,
                            mark_price,
                            &allowed_symbols,
                            settings,
                            now,
                        )
                        .await
                    {
                        Ok(OpenOutcome::Opened { position, trade, note }) => {
                            pending_writes.push(TurnWrite::Open { position, trade });
                            if let Some(note) = note {
                                notes.push(note);
                            }
                        }
                        Ok(OpenOutcome::Rejected { note }) => notes.push(note),
                        Err(err) => {
                            notes.push(format!("open failed: {err}"));
                            success = false;
                        }
                    }
                }
                ProposedAction::Close { position_id } => {
                    let Some(current_ledger) = self.engine.ledger_snapshot(&bot.id) else {
                        notes.push(format!("no open positions for bot; close {position_id} skipped"));
                        continue;
                    };
                    let Some(position) = current_ledger.opened_position_for_symbol_by_id(position_id) else {
                        notes.push(format!("position {position_id} not found or already closed"));
                        continue;
                    };
                    let Some(mark_price) = market.price(&position.symbol) else {
                        notes.push(format!("no mark price available for {}; close skipped", position.symbol));
                        continue;
                    };
                    match self
                        .engine
                        .close(&bot.id, position_id, None, mark_price, CloseReason::Manual, settings, now)
                        .await
                    {
                        Ok(CloseOutcome::Closed { position, trade }) => {
                            pending_writes.push(TurnWrite::Close { position, trade });
                        }
                        Ok(CloseOutcome::NotFound) => notes.push(format!("position {position_id} not found")),
                        Err(err) => {
                            notes.push(format!("close failed: {err}"));
                            success = false;
                        }
                    }
                }
                ProposedAction::Hold => notes.push("hold".to_string()),
                ProposedAction::Analyze { .. } => {
                    notes.push("residual ANALYZE decision discarded after iteration cap".to_string());
                }
            }
        }

        let parsed_decisions = serde_json::to_value(&final_decisions).unwrap_or(Value::Null);
        let decision = build_decision(bot, &final_prompt, &parsed_decisions, notes, success, now);

        let ledger_after = self.engine.ledger_snapshot(&bot.id).unwrap_or_default();
        let draft = snapshot_draft(bot, &ledger_after, now);
        let snapshot = self
            .engine
            .persist_turn(pending_writes, decision.clone(), draft)
            .await?;

        self.spawn_summarizer(bot.clone(), provider.clone(), decrypted_api_key.to_string(), final_prompt.clone());

        info!(bot_id = %bot.id, success, "bot turn complete");

        Ok(TurnOutcome { decision, snapshot })
    }

    async fn call_with_retry(
        &self,
        provider: &Provider,
        api_key: &str,
        prompt: &str,
    ) -> (Result<crate::llm::LlmReply, DispatchError>, u64) {
        let (result, latency_ms) = self.dispatcher.call(provider, api_key, prompt, RequestKind::Decision).await;
        match &result {
            Err(DispatchError::Timeout) | Err(DispatchError::RateLimit) => {
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                self.dispatcher.call(provider, api_key, prompt, RequestKind::Decision).await
            }
            _ => (result, latency_ms),
        }
    }

    async fn record_usage(
        &self,
        bot: &Bot,
        provider: &Provider,
        prompt: &str,
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
        now: DateTime<Utc>,
    ) {
        let _ = prompt;
        if let Err(err) = self
            .token_tracker
            .track(UsageEvent {
                owner_id: bot.owner_id.clone(),
                bot_id: bot.id.clone(),
                provider_id: provider.id.clone(),
                provider_variant: provider.variant.to_string(),
                request_kind: RequestKind::Decision,
                input_tokens,
                output_tokens,
                model: provider.model_name.clone(),
                latency_ms,
                timestamp: now.to_rfc3339(),
            })
            .await
        {
            warn!(bot_id = %bot.id, %err, "failed to record token usage");
        }
    }

    async fn write_snapshot(
        &self,
        bot: &Bot,
        ledger: &crate::trading::engine::BotLedger,
        now: DateTime<Utc>,
    ) -> AppResult<Snapshot> {
        let unrealized_pnl: f64 = ledger.open_positions.iter().map(|p| p.unrealized_pnl).sum();
        let realized_pnl = self.db.sum_realized_pnl(&bot.id).await?;
        let trade_count = self.db.count_trades_for_bot(&bot.id).await?;
        let wins = self.db.winning_trades_count(&bot.id).await?;
        let win_rate = if trade_count > 0 { wins as f64 / trade_count as f64 } else { 0.0 };

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            owner_id: bot.owner_id.clone(),
            bot_id: bot.id.clone(),
            balance: ledger.balance,
            unrealized_pnl,
            realized_pnl,
            total_value: ledger.balance + unrealized_pnl,
            trade_count,
            win_rate,
            timestamp: now.to_rfc3339(),
        };
        self.db.insert_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    /// Fires the summarizer without holding up the next turn (spec §4.7.3:
    /// "must not block the next turn"). Failures are logged, not propagated —
    /// a stale summary is acceptable; a blocked scheduler is not.
    fn spawn_summarizer(&self, bot: Bot, provider: Provider, decrypted_api_key: String, current_prompt: String) {
        let summarizer = self.summarizer.clone();
        tokio::spawn(async move {
            match summarizer
                .maybe_summarize(&bot, &provider, &decrypted_api_key, &current_prompt)
                .await
            {
                Ok(crate::summarizer::SummarizeOutcome::Failed { warning }) => {
                    warn!(bot_id = %bot.id, %warning, "background summarization failed");
                }
                Err(err) => {
                    warn!(bot_id = %bot.id, %err, "background summarization errored");
                }
                _ => {}
            }
        });
    }
}

/// Builds the `Decision` row for a turn without persisting it — the caller
/// threads the result through [`TradingEngine::persist_turn`] so it commits
/// alongside that turn's position/trade writes and Snapshot.
fn build_decision(
    bot: &Bot,
    prompt: &str,
    parsed_decisions: &Value,
    notes: Vec<String>,
    success: bool,
    now: DateTime<Utc>,
) -> Decision {
    Decision {
        id: Uuid::new_v4().to_string(),
        owner_id: bot.owner_id.clone(),
        bot_id: bot.id.clone(),
        prompt: prompt.to_string(),
        parsed_decisions: parsed_decisions.clone(),
        notes,
        success,
        timestamp: now.to_rfc3339(),
    }
}

/// Builds the known-before-commit half of a turn's `Snapshot` — the
/// realized-pnl/trade-count/win-rate fields are filled in by
/// [`TradingEngine::persist_turn`] inside the same transaction as the turn's
/// writes, so they see any trade this turn just closed.
fn snapshot_draft(bot: &Bot, ledger: &crate::trading::engine::BotLedger, now: DateTime<Utc>) -> SnapshotDraft {
    let unrealized_pnl: f64 = ledger.open_positions.iter().map(|p| p.unrealized_pnl).sum();
    SnapshotDraft {
        id: Uuid::new_v4().to_string(),
        owner_id: bot.owner_id.clone(),
        bot_id: bot.id.clone(),
        balance: ledger.balance,
        unrealized_pnl,
        timestamp: now.to_rfc3339(),
    }
}

/// Parses the LLM's reply text into a list of decisions. Tolerates the
/// common case of a JSON array embedded in surrounding prose by slicing
/// between the first `[` and the last `]`. A reply with no decisions (or one
/// that cannot be parsed at all) is treated as a single HOLD (spec §4.7.2).
fn parse_decisions(text: &str) -> Vec<ProposedAction> {
    if let Ok(decisions) = serde_json::from_str::<Vec<ProposedAction>>(text) {
        return decisions;
    }

    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(decisions) = serde_json::from_str::<Vec<ProposedAction>>(&text[start..=end]) {
                return decisions;
            }
        }
    }

    vec![ProposedAction::Hold]
}

#[allow(clippy::too_many_arguments)]
fn build_prompt(
    bot: &Bot,
    ledger: &crate::trading::engine::BotLedger,
    recent_trades: &[crate::db::models::Trade],
    allowed_symbols: &[String],
    market: &MarketSnapshot,
    recent_decisions: &[Decision],
    history_summary: Option<&crate::db::models::HistorySummary>,
    accumulated_analyses: &[Value],
    now: DateTime<Utc>,
) -> String {
    let mut sections = Vec::new();

    sections.push(bot.system_prompt.clone());

    let unrealized_pnl: f64 = ledger.open_positions.iter().map(|p| p.unrealized_pnl).sum();
    let mut context = format!(
        "Account state:\nbalance: {:.2}\nunrealized_pnl: {:.2}\n",
        ledger.balance, unrealized_pnl
    );
    context.push_str("open_positions:\n");
    for pos in &ledger.open_positions {
        let opened_at: DateTime<Utc> = pos.opened_at.parse().unwrap_or(now);
        let age_ms = (now - opened_at).num_milliseconds().max(0);
        context.push_str(&format!(
            "- id={} symbol={} side={} size={:.2} leverage={:.1} entry={:.2} unrealized_pnl={:.2} age_ms={}\n",
            pos.id, pos.symbol, pos.side, pos.size, pos.leverage, pos.entry_price, pos.unrealized_pnl, age_ms
        ));
    }
    context.push_str("recent_closed_trades:\n");
    for trade in recent_trades.iter().take(10) {
        context.push_str(&format!(
            "- symbol={} side={} realized_pnl={:.2} executed_at={}\n",
            trade.symbol, trade.side, trade.realized_pnl, trade.executed_at
        ));
    }
    context.push_str("cooldowns:\n");
    for (symbol, expiry) in &ledger.cooldowns {
        let remaining = (*expiry - now).num_milliseconds().max(0);
        context.push_str(&format!("- symbol={symbol} remaining_ms={remaining}\n"));
    }
    sections.push(context);

    let mut market_block = String::from("Market snapshot:\n");
    for symbol in allowed_symbols {
        let price = market.prices.get(symbol).copied().unwrap_or(0.0);
        let change = market.change_24h_pct.get(symbol).copied().unwrap_or(0.0);
        market_block.push_str(&format!("- {symbol}: price={price:.2} change_24h_pct={change:.2}\n"));
    }
    sections.push(market_block);

    let mut history_block = String::from("Last 5 decisions:\n");
    for d in recent_decisions.iter().take(5) {
        history_block.push_str(&format!(
            "- timestamp={} decisions={} notes={:?}\n",
            d.timestamp, d.parsed_decisions, d.notes
        ));
    }
    sections.push(history_block);

    if let Some(summary) = history_summary {
        sections.push(format!("Learning so far:\n{}", summary.text));
    }

    if !accumulated_analyses.is_empty() {
        let analyses = serde_json::to_string(accumulated_analyses).unwrap_or_default();
        sections.push(format!("Tool results from this turn:\n{analyses}"));
    }

    sections.push(TOOL_SCHEMA.to_string());

    sections.join("\n\n")
}

const TOOL_SCHEMA: &str = r#"Respond with a JSON array of decisions. Each element has an "action" field:
- {"action":"LONG","symbol":"...","size":number,"leverage":number,"stopLoss":number|null,"takeProfit":number|null}
- {"action":"SHORT","symbol":"...","size":number,"leverage":number,"stopLoss":number|null,"takeProfit":number|null}
- {"action":"CLOSE","positionId":"..."}
- {"action":"HOLD"}
- {"action":"ANALYZE","tool":"rsi"|"moving_average"|"kelly"|"custom_equation"|"moon_phase","parameters":{...}}
An empty array or an unparseable response is treated as HOLD."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_array() {
        let text = r#"[{"action":"HOLD"}]"#;
        let decisions = parse_decisions(text);
        assert_eq!(decisions.len(), 1);
        assert!(matches!(decisions[0], ProposedAction::Hold));
    }

    #[test]
    fn parses_json_array_embedded_in_prose() {
        let text = "Here is my decision: [{\"action\":\"HOLD\"}] — done.";
        let decisions = parse_decisions(text);
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn unparseable_text_treated_as_hold() {
        let decisions = parse_decisions("I am not sure what to do.");
        assert_eq!(decisions.len(), 1);
        assert!(matches!(decisions[0], ProposedAction::Hold));
    }

    #[test]
    fn parses_analyze_then_long() {
        let text = r#"[{"action":"ANALYZE","tool":"rsi","parameters":{"symbol":"ETHUSDT","period":14}}]"#;
        let decisions = parse_decisions(text);
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].is_analyze());
    }
}
