use anyhow::Result;
use rusqlite::params;

use super::models::Trade;
use super::Db;
use crate::types::{PositionSide, TradeAction};

impl Db {
    pub async fn insert_trade(&self, t: &Trade) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_trade_conn(&conn, t)?;
        Ok(())
    }

    pub fn insert_trade_tx(tx: &rusqlite::Transaction, t: &Trade) -> rusqlite::Result<()> {
        insert_trade_conn(tx, t)
    }

    pub async fn list_trades_for_bot(&self, bot_id: &str, limit: i64, offset: i64) -> Result<Vec<Trade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE bot_id = ?1 ORDER BY executed_at DESC LIMIT ?2 OFFSET ?3", select_sql()))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![bot_id, limit.clamp(1, 1000), offset.max(0)], row_to_trade)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn recent_closed_trades(&self, bot_id: &str, count: i64) -> Result<Vec<Trade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE bot_id = ?1 AND action = 'CLOSE' ORDER BY executed_at DESC LIMIT ?2",
            select_sql()
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![bot_id, count.clamp(1, 1000)], row_to_trade)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn count_trades_for_bot(&self, bot_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE bot_id = ?1 AND action = 'CLOSE'",
            params![bot_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    pub async fn sum_realized_pnl(&self, bot_id: &str) -> Result<f64> {
        let conn = self.conn.lock().await;
        let sum: f64 = conn.query_row(
            "SELECT COALESCE(SUM(realized_pnl), 0) FROM trades WHERE bot_id = ?1 AND action = 'CLOSE'",
            params![bot_id],
            |r| r.get(0),
        )?;
        Ok(sum)
    }

    /// Used by the Decision Loop's Snapshot write and the Leaderboard
    /// Service's win-rate aggregation (spec §4.10).
    pub async fn winning_trades_count(&self, bot_id: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE bot_id = ?1 AND action = 'CLOSE' AND realized_pnl > 0",
            params![bot_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Transaction-scoped counterpart of [`Db::count_trades_for_bot`] — reads
    /// through the same connection as an in-flight `with_tx`, so a trade
    /// inserted earlier in the transaction is already counted.
    pub fn count_trades_for_bot_tx(tx: &rusqlite::Transaction, bot_id: &str) -> rusqlite::Result<u64> {
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM trades WHERE bot_id = ?1 AND action = 'CLOSE'",
            params![bot_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Transaction-scoped counterpart of [`Db::sum_realized_pnl`].
    pub fn sum_realized_pnl_tx(tx: &rusqlite::Transaction, bot_id: &str) -> rusqlite::Result<f64> {
        tx.query_row(
            "SELECT COALESCE(SUM(realized_pnl), 0) FROM trades WHERE bot_id = ?1 AND action = 'CLOSE'",
            params![bot_id],
            |r| r.get(0),
        )
    }

    /// Transaction-scoped counterpart of [`Db::winning_trades_count`].
    pub fn winning_trades_count_tx(tx: &rusqlite::Transaction, bot_id: &str) -> rusqlite::Result<u64> {
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM trades WHERE bot_id = ?1 AND action = 'CLOSE' AND realized_pnl > 0",
            params![bot_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Closed trades for one bot within `[from, to)` — the Leaderboard
    /// Service's per-period aggregation window (spec §4.10).
    pub async fn closed_trades_in_period(&self, bot_id: &str, from: &str, to: &str) -> Result<Vec<Trade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE bot_id = ?1 AND action = 'CLOSE' AND executed_at >= ?2 AND executed_at < ?3 ORDER BY executed_at ASC",
            select_sql()
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![bot_id, from, to], row_to_trade)? {
            out.push(row?);
        }
        Ok(out)
    }
}

fn insert_trade_conn(conn: &rusqlite::Connection, t: &Trade) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO trades (id, owner_id, bot_id, position_id, symbol, side, action, entry_price, exit_price, size, leverage, realized_pnl, fee, executed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            t.id,
            t.owner_id,
            t.bot_id,
            t.position_id,
            t.symbol,
            t.side.to_string(),
            t.action.to_string(),
            t.entry_price,
            t.exit_price,
            t.size,
            t.leverage,
            t.realized_pnl,
            t.fee,
            t.executed_at,
        ],
    )?;
    Ok(())
}

fn select_sql() -> &'static str {
    "SELECT id, owner_id, bot_id, position_id, symbol, side, action, entry_price, exit_price, size, leverage, realized_pnl, fee, executed_at FROM trades"
}

fn row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    let side_str: String = row.get(5)?;
    let action_str: String = row.get(6)?;
    Ok(Trade {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        bot_id: row.get(2)?,
        position_id: row.get(3)?,
        symbol: row.get(4)?,
        side: if side_str == "LONG" { PositionSide::Long } else { PositionSide::Short },
        action: if action_str == "OPEN" { TradeAction::Open } else { TradeAction::Close },
        entry_price: row.get(7)?,
        exit_price: row.get(8)?,
        size: row.get(9)?,
        leverage: row.get(10)?,
        realized_pnl: row.get(11)?,
        fee: row.get(12)?,
        executed_at: row.get(13)?,
    })
}
