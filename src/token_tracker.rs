// =============================================================================
// Token Tracker (C4)
// =============================================================================
//
// The sole place pricing decisions are made (spec §4.4). Wraps the `pricing`
// and `token_usage` tables written in `db/pricing.rs` / `db/token_usage.rs`
// with the cost-computation and idempotent-insert contract the rest of the
// engine depends on.

use tracing::warn;
use uuid::Uuid;

use crate::db::models::TokenUsage;
use crate::db::Db;
use crate::error::AppResult;
use crate::types::RequestKind;

/// Raw usage observed by the LLM Dispatcher, ahead of cost computation.
pub struct UsageEvent {
    pub owner_id: String,
    pub bot_id: String,
    pub provider_id: String,
    pub provider_variant: String,
    pub request_kind: RequestKind,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    pub latency_ms: u64,
    pub timestamp: String,
}

pub struct TokenTracker {
    db: Db,
}

impl TokenTracker {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Inserts a usage row with its cost computed from the active pricing
    /// row for `event.provider_variant`. If no pricing row exists, cost is
    /// zero and a warning is logged — the usage row is still written (spec
    /// §4.4).
    pub async fn track(&self, event: UsageEvent) -> AppResult<TokenUsage> {
        let cost_minor_units = match self.db.get_pricing(&event.provider_variant).await? {
            Some(pricing) => compute_cost_minor_units(
                event.input_tokens,
                event.output_tokens,
                pricing.input_price_per_million,
                pricing.output_price_per_million,
                pricing.markup_pct,
            ),
            None => {
                warn!(
                    provider_variant = %event.provider_variant,
                    "no pricing row for provider variant; recording zero-cost usage"
                );
                0
            }
        };

        let row = TokenUsage {
            id: Uuid::new_v4().to_string(),
            owner_id: event.owner_id,
            bot_id: event.bot_id,
            provider_id: event.provider_id,
            request_kind: event.request_kind,
            input_tokens: event.input_tokens,
            output_tokens: event.output_tokens,
            cost_minor_units,
            model: event.model,
            latency_ms: event.latency_ms,
            reported_to_biller: false,
            timestamp: event.timestamp,
        };

        self.db.insert_token_usage(&row).await?;
        Ok(row)
    }

    pub async fn usage_for_period(
        &self,
        owner_id: &str,
        from: &str,
        to: &str,
    ) -> AppResult<Vec<TokenUsage>> {
        Ok(self.db.usage_for_period(owner_id, from, to).await?)
    }

    pub async fn unreported_usage(&self, owner_id: &str) -> AppResult<Vec<TokenUsage>> {
        Ok(self.db.unreported_usage(owner_id).await?)
    }

    pub async fn mark_reported(&self, ids: &[String]) -> AppResult<()> {
        Ok(self.db.mark_reported(ids).await?)
    }
}

/// `(input_tokens * input_price + output_tokens * output_price) / 1_000_000`,
/// marked up by `markup_pct`, rounded up to the nearest minor currency unit.
fn compute_cost_minor_units(
    input_tokens: u64,
    output_tokens: u64,
    input_price_per_million: f64,
    output_price_per_million: f64,
    markup_pct: f64,
) -> i64 {
    let base = (input_tokens as f64) * input_price_per_million / 1_000_000.0
        + (output_tokens as f64) * output_price_per_million / 1_000_000.0;
    let marked_up = base * (1.0 + markup_pct / 100.0);
    marked_up.ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pricing::PricingRow;

    #[test]
    fn compute_cost_applies_markup_and_rounds_up() {
        let cost = compute_cost_minor_units(1_000_000, 0, 10.0, 0.0, 0.0);
        assert_eq!(cost, 10);

        let cost_with_markup = compute_cost_minor_units(1_000_000, 0, 10.0, 0.0, 10.0);
        assert_eq!(cost_with_markup, 11);
    }

    #[test]
    fn compute_cost_rounds_fractional_units_up() {
        // 100 input tokens at $10/million => 0.001 minor units, rounds up to 1.
        let cost = compute_cost_minor_units(100, 0, 10.0, 0.0, 0.0);
        assert_eq!(cost, 1);
    }

    #[tokio::test]
    async fn track_with_no_pricing_row_records_zero_cost() {
        let (db, _tmp) = crate::db::test_db();
        let tracker = TokenTracker::new(db);
        let row = tracker
            .track(UsageEvent {
                owner_id: "u1".into(),
                bot_id: "b1".into(),
                provider_id: "p1".into(),
                provider_variant: "openai".into(),
                request_kind: RequestKind::Decision,
                input_tokens: 100,
                output_tokens: 50,
                model: "gpt-test".into(),
                latency_ms: 42,
                timestamp: "2026-07-26T00:00:00Z".into(),
            })
            .await
            .unwrap();
        assert_eq!(row.cost_minor_units, 0);
    }

    #[tokio::test]
    async fn track_applies_pricing_row() {
        let (db, _tmp) = crate::db::test_db();
        db.upsert_pricing(
            "openai",
            PricingRow {
                input_price_per_million: 10.0,
                output_price_per_million: 30.0,
                markup_pct: 0.0,
            },
        )
        .await
        .unwrap();

        let tracker = TokenTracker::new(db);
        let row = tracker
            .track(UsageEvent {
                owner_id: "u1".into(),
                bot_id: "b1".into(),
                provider_id: "p1".into(),
                provider_variant: "openai".into(),
                request_kind: RequestKind::Decision,
                input_tokens: 1_000_000,
                output_tokens: 1_000_000,
                model: "gpt-test".into(),
                latency_ms: 10,
                timestamp: "2026-07-26T00:00:00Z".into(),
            })
            .await
            .unwrap();
        assert_eq!(row.cost_minor_units, 40);
    }
}
