use anyhow::Result;
use rusqlite::params;

use super::models::Decision;
use super::Db;

impl Db {
    pub async fn insert_decision(&self, d: &Decision) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_decision_conn(&conn, d)?;
        Ok(())
    }

    pub fn insert_decision_tx(tx: &rusqlite::Transaction, d: &Decision) -> rusqlite::Result<()> {
        insert_decision_conn(tx, d)
    }

    pub async fn list_decisions_for_bot(&self, bot_id: &str, limit: i64) -> Result<Vec<Decision>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE bot_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
            select_sql()
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![bot_id, limit.clamp(1, 1000)], row_to_decision)? {
            out.push(row?);
        }
        Ok(out)
    }

    /// The decisions in a bot's history not yet covered by the current
    /// `HistorySummary` watermark (`summarized_count`), oldest-first — used
    /// by the Summarizer (spec §4.5).
    pub async fn decisions_since(&self, bot_id: &str, summarized_count: u64) -> Result<Vec<Decision>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE bot_id = ?1 ORDER BY timestamp ASC LIMIT -1 OFFSET ?2",
            select_sql()
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![bot_id, summarized_count as i64], row_to_decision)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn count_decisions_for_bot(&self, bot_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM decisions WHERE bot_id = ?1",
            params![bot_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }
}

fn insert_decision_conn(conn: &rusqlite::Connection, d: &Decision) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO decisions (id, owner_id, bot_id, prompt, parsed_decisions, notes, success, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            d.id,
            d.owner_id,
            d.bot_id,
            d.prompt,
            d.parsed_decisions.to_string(),
            serde_json::to_string(&d.notes).unwrap_or_default(),
            d.success,
            d.timestamp,
        ],
    )?;
    Ok(())
}

fn select_sql() -> &'static str {
    "SELECT id, owner_id, bot_id, prompt, parsed_decisions, notes, success, timestamp FROM decisions"
}

fn row_to_decision(row: &rusqlite::Row) -> rusqlite::Result<Decision> {
    let parsed_str: String = row.get(4)?;
    let notes_str: String = row.get(5)?;
    Ok(Decision {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        bot_id: row.get(2)?,
        prompt: row.get(3)?,
        parsed_decisions: serde_json::from_str(&parsed_str).unwrap_or(serde_json::Value::Null),
        notes: serde_json::from_str(&notes_str).unwrap_or_default(),
        success: row.get(6)?,
        timestamp: row.get(7)?,
    })
}
