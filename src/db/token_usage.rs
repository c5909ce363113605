use anyhow::Result;
use rusqlite::params;

use super::models::TokenUsage;
use super::Db;
use crate::types::RequestKind;

impl Db {
    pub async fn insert_token_usage(&self, u: &TokenUsage) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO token_usage (id, owner_id, bot_id, provider_id, request_kind, input_tokens, output_tokens, cost_minor_units, model, latency_ms, reported_to_biller, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                u.id,
                u.owner_id,
                u.bot_id,
                u.provider_id,
                u.request_kind.to_string(),
                u.input_tokens as i64,
                u.output_tokens as i64,
                u.cost_minor_units,
                u.model,
                u.latency_ms as i64,
                u.reported_to_biller,
                u.timestamp,
            ],
        )?;
        Ok(())
    }

    pub async fn usage_for_period(&self, owner_id: &str, from: &str, to: &str) -> Result<Vec<TokenUsage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE owner_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 ORDER BY timestamp ASC",
            select_sql()
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![owner_id, from, to], row_to_usage)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn unreported_usage(&self, owner_id: &str) -> Result<Vec<TokenUsage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE owner_id = ?1 AND reported_to_biller = 0 ORDER BY timestamp ASC",
            select_sql()
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![owner_id], row_to_usage)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn mark_reported(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("UPDATE token_usage SET reported_to_biller = 1 WHERE id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }
}

fn select_sql() -> &'static str {
    "SELECT id, owner_id, bot_id, provider_id, request_kind, input_tokens, output_tokens, cost_minor_units, model, latency_ms, reported_to_biller, timestamp FROM token_usage"
}

fn row_to_usage(row: &rusqlite::Row) -> rusqlite::Result<TokenUsage> {
    let kind_str: String = row.get(4)?;
    let input: i64 = row.get(5)?;
    let output: i64 = row.get(6)?;
    let latency: i64 = row.get(9)?;
    Ok(TokenUsage {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        bot_id: row.get(2)?,
        provider_id: row.get(3)?,
        request_kind: match kind_str.as_str() {
            "summary" => RequestKind::Summary,
            "sandbox" => RequestKind::Sandbox,
            _ => RequestKind::Decision,
        },
        input_tokens: input as u64,
        output_tokens: output as u64,
        cost_minor_units: row.get(7)?,
        model: row.get(8)?,
        latency_ms: latency as u64,
        reported_to_biller: row.get(10)?,
        timestamp: row.get(11)?,
    })
}
