use anyhow::{Context, Result};
use rusqlite::params;

use super::models::Wallet;
use super::Db;

impl Db {
    pub async fn create_wallet(&self, w: &Wallet) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO wallets (id, owner_id, bot_id, exchange, encrypted_key, encrypted_secret, address, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                w.id,
                w.owner_id,
                w.bot_id,
                w.exchange,
                w.encrypted_key,
                w.encrypted_secret,
                w.address,
                w.active,
                w.created_at,
            ],
        )
        .context("insert wallet")?;
        Ok(())
    }

    pub async fn get_wallet(&self, id: &str, owner_id: Option<&str>) -> Result<Option<Wallet>> {
        let conn = self.conn.lock().await;
        let row = if let Some(owner) = owner_id {
            conn.query_row(
                "SELECT id, owner_id, bot_id, exchange, encrypted_key, encrypted_secret, address, active, created_at
                 FROM wallets WHERE id = ?1 AND owner_id = ?2",
                params![id, owner],
                row_to_wallet,
            )
        } else {
            conn.query_row(
                "SELECT id, owner_id, bot_id, exchange, encrypted_key, encrypted_secret, address, active, created_at
                 FROM wallets WHERE id = ?1",
                params![id],
                row_to_wallet,
            )
        };
        match row {
            Ok(w) => Ok(Some(w)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_wallets_for_bot(&self, bot_id: &str, owner_id: Option<&str>) -> Result<Vec<Wallet>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        if let Some(owner) = owner_id {
            let mut stmt = conn.prepare_cached(
                "SELECT id, owner_id, bot_id, exchange, encrypted_key, encrypted_secret, address, active, created_at
                 FROM wallets WHERE bot_id = ?1 AND owner_id = ?2 ORDER BY created_at ASC",
            )?;
            for row in stmt.query_map(params![bot_id, owner], row_to_wallet)? {
                out.push(row?);
            }
        } else {
            let mut stmt = conn.prepare_cached(
                "SELECT id, owner_id, bot_id, exchange, encrypted_key, encrypted_secret, address, active, created_at
                 FROM wallets WHERE bot_id = ?1 ORDER BY created_at ASC",
            )?;
            for row in stmt.query_map(params![bot_id], row_to_wallet)? {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub async fn update_wallet(&self, w: &Wallet) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE wallets SET exchange = ?1, encrypted_key = ?2, encrypted_secret = ?3, address = ?4, active = ?5
             WHERE id = ?6 AND owner_id = ?7",
            params![w.exchange, w.encrypted_key, w.encrypted_secret, w.address, w.active, w.id, w.owner_id],
        )?;
        if changed == 0 {
            anyhow::bail!("wallet not found: {}", w.id);
        }
        Ok(())
    }

    pub async fn delete_wallet(&self, id: &str, owner_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "DELETE FROM wallets WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;
        if changed == 0 {
            anyhow::bail!("wallet not found: {id}");
        }
        Ok(())
    }
}

fn row_to_wallet(row: &rusqlite::Row) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        bot_id: row.get(2)?,
        exchange: row.get(3)?,
        encrypted_key: row.get(4)?,
        encrypted_secret: row.get(5)?,
        address: row.get(6)?,
        active: row.get(7)?,
        created_at: row.get(8)?,
    })
}
