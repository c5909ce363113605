use anyhow::{Context, Result};
use rusqlite::params;

use super::models::Position;
use super::Db;
use crate::types::{CloseReason, PositionSide, PositionStatus};

impl Db {
    pub async fn insert_position(&self, p: &Position) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_position_conn(&conn, p)?;
        Ok(())
    }

    /// Insert a position as part of an already-open transaction (used by the
    /// trading engine's atomic open-position write).
    pub fn insert_position_tx(tx: &rusqlite::Transaction, p: &Position) -> rusqlite::Result<()> {
        insert_position_conn(tx, p)
    }

    pub async fn get_position(&self, id: &str, owner_id: Option<&str>) -> Result<Option<Position>> {
        let conn = self.conn.lock().await;
        let row = if let Some(owner) = owner_id {
            conn.query_row(&select_sql("WHERE id = ?1 AND owner_id = ?2"), params![id, owner], row_to_position)
        } else {
            conn.query_row(&select_sql("WHERE id = ?1"), params![id], row_to_position)
        };
        match row {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_positions_for_bot(
        &self,
        bot_id: &str,
        owner_id: Option<&str>,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        let sql = match (owner_id, status) {
            (Some(_), Some(_)) => select_sql("WHERE bot_id = ?1 AND owner_id = ?2 AND status = ?3 ORDER BY opened_at DESC"),
            (Some(_), None) => select_sql("WHERE bot_id = ?1 AND owner_id = ?2 ORDER BY opened_at DESC"),
            (None, Some(_)) => select_sql("WHERE bot_id = ?1 AND status = ?2 ORDER BY opened_at DESC"),
            (None, None) => select_sql("WHERE bot_id = ?1 ORDER BY opened_at DESC"),
        };
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = match (owner_id, status) {
            (Some(owner), Some(st)) => stmt.query_map(params![bot_id, owner, st.to_string()], row_to_position)?,
            (Some(owner), None) => stmt.query_map(params![bot_id, owner], row_to_position)?,
            (None, Some(st)) => stmt.query_map(params![bot_id, st.to_string()], row_to_position)?,
            (None, None) => stmt.query_map(params![bot_id], row_to_position)?,
        };
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_open_positions_for_bot(&self, bot_id: &str) -> Result<Vec<Position>> {
        self.list_positions_for_bot(bot_id, None, Some(PositionStatus::Open)).await
    }

    pub async fn update_unrealized_pnl(&self, id: &str, unrealized_pnl: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET unrealized_pnl = ?1 WHERE id = ?2",
            params![unrealized_pnl, id],
        )
        .context("update unrealized pnl")?;
        Ok(())
    }

    /// Closes a position as part of an already-open transaction.
    pub fn close_position_tx(
        tx: &rusqlite::Transaction,
        id: &str,
        close_reason: CloseReason,
        closed_at: &str,
    ) -> rusqlite::Result<()> {
        tx.execute(
            "UPDATE positions SET status = 'closed', close_reason = ?1, closed_at = ?2 WHERE id = ?3",
            params![close_reason.to_string(), closed_at, id],
        )?;
        Ok(())
    }
}

fn insert_position_conn(conn: &rusqlite::Connection, p: &Position) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO positions (id, owner_id, bot_id, symbol, side, entry_price, size, leverage, liquidation_price, stop_loss, take_profit, unrealized_pnl, status, close_reason, opened_at, closed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            p.id,
            p.owner_id,
            p.bot_id,
            p.symbol,
            p.side.to_string(),
            p.entry_price,
            p.size,
            p.leverage,
            p.liquidation_price,
            p.stop_loss,
            p.take_profit,
            p.unrealized_pnl,
            p.status.to_string(),
            p.close_reason.map(|r| r.to_string()),
            p.opened_at,
            p.closed_at,
        ],
    )?;
    Ok(())
}

fn select_sql(tail: &str) -> String {
    format!(
        "SELECT id, owner_id, bot_id, symbol, side, entry_price, size, leverage, liquidation_price, stop_loss, take_profit, unrealized_pnl, status, close_reason, opened_at, closed_at
         FROM positions {tail}"
    )
}

fn row_to_position(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    let side_str: String = row.get(4)?;
    let status_str: String = row.get(12)?;
    let close_reason_str: Option<String> = row.get(13)?;
    Ok(Position {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        bot_id: row.get(2)?,
        symbol: row.get(3)?,
        side: if side_str == "LONG" { PositionSide::Long } else { PositionSide::Short },
        entry_price: row.get(5)?,
        size: row.get(6)?,
        leverage: row.get(7)?,
        liquidation_price: row.get(8)?,
        stop_loss: row.get(9)?,
        take_profit: row.get(10)?,
        unrealized_pnl: row.get(11)?,
        status: if status_str == "open" { PositionStatus::Open } else { PositionStatus::Closed },
        close_reason: close_reason_str.and_then(|s| match s.as_str() {
            "manual" => Some(CloseReason::Manual),
            "stop_loss" => Some(CloseReason::StopLoss),
            "take_profit" => Some(CloseReason::TakeProfit),
            "liquidated" => Some(CloseReason::Liquidated),
            _ => None,
        }),
        opened_at: row.get(14)?,
        closed_at: row.get(15)?,
    })
}
