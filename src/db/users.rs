use anyhow::{Context, Result};
use rusqlite::params;

use super::models::User;
use super::Db;
use crate::types::Role;

impl Db {
    pub async fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, active, encryption_salt, recovery_code_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id,
                user.username,
                user.password_hash,
                user.role.to_string(),
                user.active,
                user.encryption_salt,
                user.recovery_code_hash,
                user.created_at,
            ],
        )
        .context("insert user")?;
        Ok(())
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE id = ?1", select_sql()))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_user(row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE username = ?1", select_sql()))?;
        let mut rows = stmt.query(params![username])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_user(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!("{} ORDER BY created_at ASC", select_sql()))?;
        let rows = stmt.query_map([], row_to_user)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Consumes the one-time recovery code — called by `/auth/recover` once
    /// the supplied phrase has been verified against the stored hash, so the
    /// same phrase cannot be replayed (spec §4 auth design).
    pub async fn clear_recovery_code(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET recovery_code_hash = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub async fn update_role(&self, id: &str, role: Role) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.to_string(), id],
        )?;
        if changed == 0 {
            anyhow::bail!("user not found: {id}");
        }
        Ok(())
    }

    pub async fn update_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE users SET active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        if changed == 0 {
            anyhow::bail!("user not found: {id}");
        }
        Ok(())
    }

    pub async fn update_username(&self, id: &str, username: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET username = ?1 WHERE id = ?2",
            params![username, id],
        )?;
        Ok(())
    }

    pub async fn update_password_hash(&self, id: &str, password_hash: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id],
        )?;
        Ok(())
    }

    pub async fn delete_user_cascade(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM wallets WHERE bot_id IN (SELECT id FROM bots WHERE owner_id = ?1)",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM positions WHERE owner_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM trades WHERE owner_id = ?1", params![id])?;
        tx.execute("DELETE FROM decisions WHERE owner_id = ?1", params![id])?;
        tx.execute("DELETE FROM snapshots WHERE owner_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM history_summaries WHERE owner_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM bots WHERE owner_id = ?1", params![id])?;
        tx.execute("DELETE FROM providers WHERE owner_id = ?1", params![id])?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }
}

fn select_sql() -> &'static str {
    "SELECT id, username, password_hash, role, active, encryption_salt, recovery_code_hash, created_at
     FROM users"
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let role_str: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: role_str.parse().unwrap_or(Role::User),
        active: row.get(4)?,
        encryption_salt: row.get(5)?,
        recovery_code_hash: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn sample_user(id: &str, username: &str) -> User {
        User {
            id: id.to_string(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
            active: true,
            encryption_salt: "salt".to_string(),
            recovery_code_hash: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_user() {
        let (db, _f) = test_db();
        db.create_user(&sample_user("u1", "alice")).await.unwrap();
        let found = db.get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert_eq!(found.role, Role::User);
    }

    #[tokio::test]
    async fn update_role_changes_row() {
        let (db, _f) = test_db();
        db.create_user(&sample_user("u1", "alice")).await.unwrap();
        db.update_role("u1", Role::Admin).await.unwrap();
        let found = db.get_user_by_id("u1").await.unwrap().unwrap();
        assert_eq!(found.role, Role::Admin);
    }

    #[tokio::test]
    async fn update_role_missing_user_errors() {
        let (db, _f) = test_db();
        assert!(db.update_role("missing", Role::Admin).await.is_err());
    }
}
