use anyhow::Result;
use rusqlite::params;

use super::Db;

impl Db {
    /// Overwrites the single arena-state row with `blob` (spec §3
    /// `ArenaState`: "a projection; losing it must never lose money or
    /// history — it can be reconstructed from relational tables").
    pub async fn replace_arena_state(&self, blob: &serde_json::Value, updated_at: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO arena_state (id, blob, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
            params![blob.to_string(), updated_at],
        )?;
        Ok(())
    }

    pub async fn read_arena_state(&self) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT blob FROM arena_state WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let blob: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&blob).unwrap_or(serde_json::Value::Null)))
            }
            None => Ok(None),
        }
    }
}
