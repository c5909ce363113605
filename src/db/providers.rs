use anyhow::{Context, Result};
use rusqlite::params;

use super::models::Provider;
use super::Db;
use crate::types::ProviderVariant;

impl Db {
    pub async fn create_provider(&self, p: &Provider) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO providers (id, owner_id, name, variant, endpoint_url, model_name, encrypted_api_key, config, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                p.id,
                p.owner_id,
                p.name,
                p.variant.to_string(),
                p.endpoint_url,
                p.model_name,
                p.encrypted_api_key,
                p.config.to_string(),
                p.active,
                p.created_at,
            ],
        )
        .context("insert provider")?;
        Ok(())
    }

    pub async fn get_provider(&self, id: &str, owner_id: Option<&str>) -> Result<Option<Provider>> {
        let conn = self.conn.lock().await;
        let row = if let Some(owner) = owner_id {
            conn.query_row(
                "SELECT id, owner_id, name, variant, endpoint_url, model_name, encrypted_api_key, config, active, created_at
                 FROM providers WHERE id = ?1 AND owner_id = ?2",
                params![id, owner],
                row_to_provider,
            )
        } else {
            conn.query_row(
                "SELECT id, owner_id, name, variant, endpoint_url, model_name, encrypted_api_key, config, active, created_at
                 FROM providers WHERE id = ?1",
                params![id],
                row_to_provider,
            )
        };
        match row {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_providers(&self, owner_id: Option<&str>) -> Result<Vec<Provider>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        if let Some(owner) = owner_id {
            let mut stmt = conn.prepare_cached(
                "SELECT id, owner_id, name, variant, endpoint_url, model_name, encrypted_api_key, config, active, created_at
                 FROM providers WHERE owner_id = ?1 ORDER BY created_at ASC",
            )?;
            for row in stmt.query_map(params![owner], row_to_provider)? {
                out.push(row?);
            }
        } else {
            let mut stmt = conn.prepare_cached(
                "SELECT id, owner_id, name, variant, endpoint_url, model_name, encrypted_api_key, config, active, created_at
                 FROM providers ORDER BY created_at ASC",
            )?;
            for row in stmt.query_map([], row_to_provider)? {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub async fn update_provider(&self, p: &Provider) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE providers SET name = ?1, endpoint_url = ?2, model_name = ?3, encrypted_api_key = ?4, config = ?5, active = ?6
             WHERE id = ?7 AND owner_id = ?8",
            params![
                p.name,
                p.endpoint_url,
                p.model_name,
                p.encrypted_api_key,
                p.config.to_string(),
                p.active,
                p.id,
                p.owner_id,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("provider not found: {}", p.id);
        }
        Ok(())
    }

    /// Deletes a provider, rejecting the operation with an FK-style error if
    /// any bot still references it (spec §7 `Integrity`: "referenced-provider
    /// has dependent bots").
    pub async fn delete_provider(&self, id: &str, owner_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let dependents: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bots WHERE provider_id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        if dependents > 0 {
            anyhow::bail!("provider {id} has {dependents} dependent bot(s)");
        }
        let changed = conn.execute(
            "DELETE FROM providers WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;
        if changed == 0 {
            anyhow::bail!("provider not found: {id}");
        }
        Ok(())
    }
}

fn row_to_provider(row: &rusqlite::Row) -> rusqlite::Result<Provider> {
    let variant_str: String = row.get(3)?;
    let config_str: String = row.get(7)?;
    Ok(Provider {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        variant: variant_str.parse().unwrap_or(ProviderVariant::Custom),
        endpoint_url: row.get(4)?,
        model_name: row.get(5)?,
        encrypted_api_key: row.get(6)?,
        config: serde_json::from_str(&config_str).unwrap_or(serde_json::Value::Null),
        active: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::db::models::User;
    use crate::types::Role;

    async fn seed_user(db: &Db) {
        db.create_user(&User {
            id: "u1".into(),
            username: "alice".into(),
            password_hash: "h".into(),
            role: Role::User,
            active: true,
            encryption_salt: "s".into(),
            recovery_code_hash: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        })
        .await
        .unwrap();
    }

    fn sample(id: &str, owner: &str) -> Provider {
        Provider {
            id: id.into(),
            owner_id: owner.into(),
            name: "My OpenAI".into(),
            variant: ProviderVariant::Openai,
            endpoint_url: "https://api.openai.com/v1/chat/completions".into(),
            model_name: "gpt-4o".into(),
            encrypted_api_key: "ciphertext".into(),
            config: serde_json::json!({}),
            active: true,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn multi_tenant_isolation() {
        let (db, _f) = test_db();
        seed_user(&db).await;
        db.create_provider(&sample("p1", "u1")).await.unwrap();
        let as_other = db.get_provider("p1", Some("u2")).await.unwrap();
        assert!(as_other.is_none());
        let as_owner = db.get_provider("p1", Some("u1")).await.unwrap();
        assert!(as_owner.is_some());
    }

    #[tokio::test]
    async fn redacted_hides_key() {
        let p = sample("p1", "u1");
        let r = p.redacted();
        assert_eq!(r.encrypted_api_key, "***redacted***");
        assert_eq!(r.name, p.name);
    }
}
