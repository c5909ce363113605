use anyhow::{Context, Result};
use rusqlite::params;

use super::models::Bot;
use super::Db;
use crate::types::BotMode;

impl Db {
    pub async fn create_bot(&self, b: &Bot) -> Result<()> {
        let conn = self.conn.lock().await;
        let allowed = b
            .allowed_symbols
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());
        conn.execute(
            "INSERT INTO bots (id, owner_id, name, system_prompt, provider_id, mode, active, paused, avatar, allowed_symbols, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                b.id,
                b.owner_id,
                b.name,
                b.system_prompt,
                b.provider_id,
                b.mode.to_string(),
                b.active,
                b.paused,
                b.avatar,
                allowed,
                b.created_at,
            ],
        )
        .context("insert bot")?;
        Ok(())
    }

    pub async fn get_bot(&self, id: &str, owner_id: Option<&str>) -> Result<Option<Bot>> {
        let conn = self.conn.lock().await;
        let row = if let Some(owner) = owner_id {
            conn.query_row(
                "SELECT id, owner_id, name, system_prompt, provider_id, mode, active, paused, avatar, allowed_symbols, created_at
                 FROM bots WHERE id = ?1 AND owner_id = ?2",
                params![id, owner],
                row_to_bot,
            )
        } else {
            conn.query_row(
                "SELECT id, owner_id, name, system_prompt, provider_id, mode, active, paused, avatar, allowed_symbols, created_at
                 FROM bots WHERE id = ?1",
                params![id],
                row_to_bot,
            )
        };
        match row {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_bots(&self, owner_id: Option<&str>) -> Result<Vec<Bot>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        if let Some(owner) = owner_id {
            let mut stmt = conn.prepare_cached(
                "SELECT id, owner_id, name, system_prompt, provider_id, mode, active, paused, avatar, allowed_symbols, created_at
                 FROM bots WHERE owner_id = ?1 ORDER BY created_at ASC",
            )?;
            for row in stmt.query_map(params![owner], row_to_bot)? {
                out.push(row?);
            }
        } else {
            let mut stmt = conn.prepare_cached(
                "SELECT id, owner_id, name, system_prompt, provider_id, mode, active, paused, avatar, allowed_symbols, created_at
                 FROM bots ORDER BY created_at ASC",
            )?;
            for row in stmt.query_map([], row_to_bot)? {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// All active bots across all owners — used by the scheduler at startup
    /// (spec §4.8.1: "load all bots where active=true").
    pub async fn list_active_bots(&self) -> Result<Vec<Bot>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, owner_id, name, system_prompt, provider_id, mode, active, paused, avatar, allowed_symbols, created_at
             FROM bots WHERE active = 1 ORDER BY created_at ASC",
        )?;
        let mut out = Vec::new();
        for row in stmt.query_map([], row_to_bot)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn update_bot(&self, b: &Bot) -> Result<()> {
        let conn = self.conn.lock().await;
        let allowed = b
            .allowed_symbols
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());
        let changed = conn.execute(
            "UPDATE bots SET name = ?1, system_prompt = ?2, provider_id = ?3, mode = ?4, active = ?5, allowed_symbols = ?6
             WHERE id = ?7 AND owner_id = ?8",
            params![b.name, b.system_prompt, b.provider_id, b.mode.to_string(), b.active, allowed, b.id, b.owner_id],
        )?;
        if changed == 0 {
            anyhow::bail!("bot not found: {}", b.id);
        }
        Ok(())
    }

    pub async fn set_paused(&self, id: &str, owner_id: &str, paused: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE bots SET paused = ?1 WHERE id = ?2 AND owner_id = ?3",
            params![paused, id, owner_id],
        )?;
        if changed == 0 {
            anyhow::bail!("bot not found: {id}");
        }
        Ok(())
    }

    pub async fn soft_delete_bot(&self, id: &str, owner_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE bots SET active = 0 WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;
        if changed == 0 {
            anyhow::bail!("bot not found: {id}");
        }
        Ok(())
    }

    /// Bots whose owning user no longer exists (spec's admin
    /// `/admin/orphaned-bots`).
    pub async fn list_orphaned_bots(&self) -> Result<Vec<Bot>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT b.id, b.owner_id, b.name, b.system_prompt, b.provider_id, b.mode, b.active, b.paused, b.avatar, b.allowed_symbols, b.created_at
             FROM bots b LEFT JOIN users u ON b.owner_id = u.id WHERE u.id IS NULL",
        )?;
        let mut out = Vec::new();
        for row in stmt.query_map([], row_to_bot)? {
            out.push(row?);
        }
        Ok(out)
    }

    /// One-transaction reset: clears positions/trades/decisions/snapshots for
    /// a bot (spec §4.8.1 "Reset"), writing a fresh opening snapshot.
    pub async fn reset_bot_data(&self, bot_id: &str, owner_id: &str, initial_balance: f64, now: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM positions WHERE bot_id = ?1", params![bot_id])?;
            tx.execute("DELETE FROM trades WHERE bot_id = ?1", params![bot_id])?;
            tx.execute("DELETE FROM decisions WHERE bot_id = ?1", params![bot_id])?;
            tx.execute("DELETE FROM snapshots WHERE bot_id = ?1", params![bot_id])?;
            tx.execute(
                "INSERT INTO snapshots (id, owner_id, bot_id, balance, unrealized_pnl, realized_pnl, total_value, trade_count, win_rate, timestamp)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?4, 0, 0, ?5)",
                params![uuid::Uuid::new_v4().to_string(), owner_id, bot_id, initial_balance, now],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_bot(row: &rusqlite::Row) -> rusqlite::Result<Bot> {
    let mode_str: String = row.get(5)?;
    let allowed_str: Option<String> = row.get(9)?;
    Ok(Bot {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        system_prompt: row.get(3)?,
        provider_id: row.get(4)?,
        mode: mode_str.parse().unwrap_or(BotMode::Paper),
        active: row.get(6)?,
        paused: row.get(7)?,
        avatar: row.get(8)?,
        allowed_symbols: allowed_str.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(10)?,
    })
}
