use anyhow::Result;
use rusqlite::params;

use super::models::HistorySummary;
use super::Db;

impl Db {
    pub async fn get_history_summary(&self, bot_id: &str) -> Result<Option<HistorySummary>> {
        let conn = self.conn.lock().await;
        let row = conn.query_row(
            &format!("{} WHERE bot_id = ?1", select_sql()),
            params![bot_id],
            row_to_summary,
        );
        match row {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the bot's summary entirely — regeneration, never
    /// accumulation (spec §3 HistorySummary lifecycle).
    pub async fn replace_history_summary(&self, s: &HistorySummary) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO history_summaries (bot_id, owner_id, text, summarized_count, from_timestamp, to_timestamp, generated_at, token_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(bot_id) DO UPDATE SET
                text = excluded.text,
                summarized_count = excluded.summarized_count,
                from_timestamp = excluded.from_timestamp,
                to_timestamp = excluded.to_timestamp,
                generated_at = excluded.generated_at,
                token_count = excluded.token_count",
            params![
                s.bot_id,
                s.owner_id,
                s.text,
                s.summarized_count as i64,
                s.from_timestamp,
                s.to_timestamp,
                s.generated_at,
                s.token_count,
            ],
        )?;
        Ok(())
    }

    /// Deletes only the HistorySummary row — the "clear learning" endpoint,
    /// distinct from a full bot reset (spec §4.8.1 / S6).
    pub async fn clear_history_summary(&self, bot_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM history_summaries WHERE bot_id = ?1", params![bot_id])?;
        Ok(())
    }
}

fn select_sql() -> &'static str {
    "SELECT bot_id, owner_id, text, summarized_count, from_timestamp, to_timestamp, generated_at, token_count FROM history_summaries"
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<HistorySummary> {
    let summarized_count: i64 = row.get(3)?;
    Ok(HistorySummary {
        bot_id: row.get(0)?,
        owner_id: row.get(1)?,
        text: row.get(2)?,
        summarized_count: summarized_count as u64,
        from_timestamp: row.get(4)?,
        to_timestamp: row.get(5)?,
        generated_at: row.get(6)?,
        token_count: row.get(7)?,
    })
}
