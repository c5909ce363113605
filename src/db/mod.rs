// =============================================================================
// Persistence Store (C1)
// =============================================================================
//
// A single `rusqlite::Connection` behind `Arc<tokio::sync::Mutex<..>>`, in the
// shape of the teacher's sibling vault (`VaultDb`): one connection, WAL mode,
// `prepare_cached` for hot queries, upserts via `ON CONFLICT DO UPDATE` or
// `INSERT OR REPLACE`. Every table that names an owner enforces the
// multi-tenant filter (spec §4.1: "if owner id is non-null the query must
// filter by it") directly in its accessor methods rather than relying on
// callers to remember.

pub mod models;
pub mod users;
pub mod providers;
pub mod wallets;
pub mod bots;
pub mod positions;
pub mod trades;
pub mod decisions;
pub mod snapshots;
pub mod arena_state;
pub mod history_summary;
pub mod token_usage;
pub mod audit;
pub mod pricing;
pub mod leaderboard;

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Db {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("open persistence store")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                encryption_salt TEXT NOT NULL,
                recovery_code_hash TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                variant TEXT NOT NULL,
                endpoint_url TEXT NOT NULL,
                model_name TEXT NOT NULL,
                encrypted_api_key TEXT NOT NULL,
                config TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_providers_owner ON providers(owner_id);

            CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                provider_id TEXT NOT NULL REFERENCES providers(id),
                mode TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                paused INTEGER NOT NULL DEFAULT 0,
                avatar BLOB,
                allowed_symbols TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bots_owner ON bots(owner_id);

            CREATE TABLE IF NOT EXISTS wallets (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                bot_id TEXT NOT NULL REFERENCES bots(id),
                exchange TEXT NOT NULL,
                encrypted_key TEXT NOT NULL,
                encrypted_secret TEXT NOT NULL,
                address TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_wallets_bot ON wallets(bot_id);

            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                bot_id TEXT NOT NULL REFERENCES bots(id),
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                size REAL NOT NULL,
                leverage REAL NOT NULL,
                liquidation_price REAL NOT NULL,
                stop_loss REAL,
                take_profit REAL,
                unrealized_pnl REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                close_reason TEXT,
                opened_at TEXT NOT NULL,
                closed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
            CREATE INDEX IF NOT EXISTS idx_positions_bot ON positions(bot_id);

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                bot_id TEXT NOT NULL REFERENCES bots(id),
                position_id TEXT REFERENCES positions(id),
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                action TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL,
                size REAL NOT NULL,
                leverage REAL NOT NULL,
                realized_pnl REAL NOT NULL DEFAULT 0,
                fee REAL NOT NULL DEFAULT 0,
                executed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_bot_executed ON trades(bot_id, executed_at);

            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                bot_id TEXT NOT NULL REFERENCES bots(id),
                prompt TEXT NOT NULL,
                parsed_decisions TEXT NOT NULL,
                notes TEXT NOT NULL,
                success INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_bot_ts ON decisions(bot_id, timestamp);

            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                bot_id TEXT NOT NULL REFERENCES bots(id),
                balance REAL NOT NULL,
                unrealized_pnl REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                total_value REAL NOT NULL,
                trade_count INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_bot_ts ON snapshots(bot_id, timestamp);

            CREATE TABLE IF NOT EXISTS history_summaries (
                bot_id TEXT PRIMARY KEY REFERENCES bots(id),
                owner_id TEXT NOT NULL REFERENCES users(id),
                text TEXT NOT NULL,
                summarized_count INTEGER NOT NULL,
                from_timestamp TEXT NOT NULL,
                to_timestamp TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                token_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS token_usage (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                bot_id TEXT NOT NULL REFERENCES bots(id),
                provider_id TEXT NOT NULL,
                request_kind TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_minor_units INTEGER NOT NULL,
                model TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                reported_to_biller INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_token_usage_reported_ts ON token_usage(reported_to_biller, timestamp);

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                actor_user_id TEXT NOT NULL,
                details TEXT NOT NULL,
                ip TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_log(timestamp);

            CREATE TABLE IF NOT EXISTS arena_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                blob TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pricing (
                provider_variant TEXT PRIMARY KEY,
                input_price_per_million REAL NOT NULL,
                output_price_per_million REAL NOT NULL,
                markup_pct REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS leaderboard_entries (
                period TEXT NOT NULL,
                rank INTEGER NOT NULL,
                bot_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                total_pnl REAL NOT NULL,
                trade_count INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                sharpe REAL NOT NULL,
                max_drawdown REAL NOT NULL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (period, bot_id)
            );
            ",
        )
        .context("initialize schema")?;
        Ok(())
    }
}

impl Db {
    /// Run `f` inside a single SQLite transaction, committing on `Ok` and
    /// rolling back (by drop) on `Err`. Used by the trading engine to write
    /// position + trade + decision + snapshot atomically (spec §4.1: "all
    /// mutations ... within one bot turn occur in a single transaction").
    pub async fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("begin transaction")?;
        let result = f(&tx).context("transaction body")?;
        tx.commit().context("commit transaction")?;
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> (Db, tempfile::NamedTempFile) {
    let file = tempfile::NamedTempFile::new().expect("create temp db file");
    let db = Db::open(file.path().to_str().unwrap()).expect("open test db");
    (db, file)
}
