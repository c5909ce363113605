use anyhow::Result;
use rusqlite::params;

use super::models::AuditEntry;
use super::Db;

impl Db {
    pub async fn insert_audit(&self, e: &AuditEntry) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO audit_log (id, event_type, entity_kind, entity_id, actor_user_id, details, ip, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                e.id,
                e.event_type,
                e.entity_kind,
                e.entity_id,
                e.actor_user_id,
                e.details.to_string(),
                e.ip,
                e.timestamp,
            ],
        )?;
        Ok(())
    }

    pub async fn list_audit(&self, limit: i64, offset: i64) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, event_type, entity_kind, entity_id, actor_user_id, details, ip, timestamp
             FROM audit_log ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2",
        )?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![limit.clamp(1, 1000), offset.max(0)], row_to_audit)? {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_audit(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
    let details_str: String = row.get(5)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        event_type: row.get(1)?,
        entity_kind: row.get(2)?,
        entity_id: row.get(3)?,
        actor_user_id: row.get(4)?,
        details: serde_json::from_str(&details_str).unwrap_or(serde_json::Value::Null),
        ip: row.get(6)?,
        timestamp: row.get(7)?,
    })
}
