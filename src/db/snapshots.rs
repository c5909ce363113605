use anyhow::Result;
use rusqlite::params;

use super::models::Snapshot;
use super::Db;

impl Db {
    pub async fn insert_snapshot(&self, s: &Snapshot) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_snapshot_conn(&conn, s)?;
        Ok(())
    }

    pub fn insert_snapshot_tx(tx: &rusqlite::Transaction, s: &Snapshot) -> rusqlite::Result<()> {
        insert_snapshot_conn(tx, s)
    }

    pub async fn latest_snapshot(&self, bot_id: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().await;
        let row = conn.query_row(
            &format!("{} WHERE bot_id = ?1 ORDER BY timestamp DESC LIMIT 1", select_sql()),
            params![bot_id],
            row_to_snapshot,
        );
        match row {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn snapshots_in_range(&self, bot_id: &str, from: &str, to: &str) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE bot_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 ORDER BY timestamp ASC",
            select_sql()
        ))?;
        let mut out = Vec::new();
        for row in stmt.query_map(params![bot_id, from, to], row_to_snapshot)? {
            out.push(row?);
        }
        Ok(out)
    }
}

fn insert_snapshot_conn(conn: &rusqlite::Connection, s: &Snapshot) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO snapshots (id, owner_id, bot_id, balance, unrealized_pnl, realized_pnl, total_value, trade_count, win_rate, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            s.id,
            s.owner_id,
            s.bot_id,
            s.balance,
            s.unrealized_pnl,
            s.realized_pnl,
            s.total_value,
            s.trade_count as i64,
            s.win_rate,
            s.timestamp,
        ],
    )?;
    Ok(())
}

fn select_sql() -> &'static str {
    "SELECT id, owner_id, bot_id, balance, unrealized_pnl, realized_pnl, total_value, trade_count, win_rate, timestamp FROM snapshots"
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
    let trade_count: i64 = row.get(7)?;
    Ok(Snapshot {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        bot_id: row.get(2)?,
        balance: row.get(3)?,
        unrealized_pnl: row.get(4)?,
        realized_pnl: row.get(5)?,
        total_value: row.get(6)?,
        trade_count: trade_count as u64,
        win_rate: row.get(8)?,
        timestamp: row.get(9)?,
    })
}
