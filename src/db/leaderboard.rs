use anyhow::Result;
use rusqlite::params;

use super::Db;

/// One ranked row within a single leaderboard period (spec §4.10 / §3
/// `LeaderboardEntry`).
#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub period: String,
    pub rank: u32,
    pub bot_id: String,
    pub owner_id: String,
    pub total_pnl: f64,
    pub trade_count: u64,
    pub win_rate: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub computed_at: String,
}

impl Db {
    /// Atomically replaces every row for `period` with `entries` — the
    /// Leaderboard Service writes the full ranked set each cadence tick
    /// rather than mutating individual rows (spec §4.10: "written atomically
    /// per period").
    pub async fn replace_leaderboard_period(&self, period: &str, entries: &[LeaderboardEntry]) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM leaderboard_entries WHERE period = ?1", params![period])?;
            for e in entries {
                tx.execute(
                    "INSERT INTO leaderboard_entries (period, rank, bot_id, owner_id, total_pnl, trade_count, win_rate, sharpe, max_drawdown, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        e.period,
                        e.rank,
                        e.bot_id,
                        e.owner_id,
                        e.total_pnl,
                        e.trade_count as i64,
                        e.win_rate,
                        e.sharpe,
                        e.max_drawdown,
                        e.computed_at,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn leaderboard_for_period(&self, period: &str, limit: i64) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT period, rank, bot_id, owner_id, total_pnl, trade_count, win_rate, sharpe, max_drawdown, computed_at
             FROM leaderboard_entries WHERE period = ?1 ORDER BY rank ASC LIMIT ?2",
        )?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![period, limit.clamp(1, 1000)], row_to_entry)? {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn leaderboard_entry_for_bot(&self, period: &str, bot_id: &str) -> Result<Option<LeaderboardEntry>> {
        let conn = self.conn.lock().await;
        let row = conn.query_row(
            "SELECT period, rank, bot_id, owner_id, total_pnl, trade_count, win_rate, sharpe, max_drawdown, computed_at
             FROM leaderboard_entries WHERE period = ?1 AND bot_id = ?2",
            params![period, bot_id],
            row_to_entry,
        );
        match row {
            Ok(e) => Ok(Some(e)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn leaderboard_entries_for_owner(&self, period: &str, owner_id: &str) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT period, rank, bot_id, owner_id, total_pnl, trade_count, win_rate, sharpe, max_drawdown, computed_at
             FROM leaderboard_entries WHERE period = ?1 AND owner_id = ?2 ORDER BY rank ASC",
        )?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![period, owner_id], row_to_entry)? {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LeaderboardEntry> {
    let rank: i64 = row.get(1)?;
    let trade_count: i64 = row.get(5)?;
    Ok(LeaderboardEntry {
        period: row.get(0)?,
        rank: rank as u32,
        bot_id: row.get(2)?,
        owner_id: row.get(3)?,
        total_pnl: row.get(4)?,
        trade_count: trade_count as u64,
        win_rate: row.get(6)?,
        sharpe: row.get(7)?,
        max_drawdown: row.get(8)?,
        computed_at: row.get(9)?,
    })
}
