// Live-exchange wallet credential CRUD (spec §6 wallets surface, §4.6.2 live
// execution). Key/secret are encrypted through the Crypto Vault the same way
// providers.rs handles LLM credentials, keyed on the owning user's salt.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::models::Wallet;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/wallets",
            axum::routing::get(list_wallets).post(create_wallet),
        )
        .route(
            "/wallets/:id",
            axum::routing::get(get_wallet)
                .put(update_wallet)
                .delete(delete_wallet),
        )
}

fn redacted(mut w: Wallet) -> Wallet {
    w.encrypted_key = "***redacted***".to_string();
    w.encrypted_secret = "***redacted***".to_string();
    w
}

async fn require_owned_wallet(state: &AppState, actor: &AuthUser, id: &str) -> AppResult<Wallet> {
    let wallet = state
        .db
        .get_wallet(id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("wallet not found: {id}")))?;
    if !actor.can_access(&wallet.owner_id) {
        return Err(AppError::Forbidden);
    }
    Ok(wallet)
}

#[derive(Debug, Deserialize)]
struct WalletsQuery {
    #[serde(rename = "bot_id")]
    bot_id: Option<String>,
}

async fn list_wallets(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(q): Query<WalletsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let bot_id = q
        .bot_id
        .ok_or_else(|| AppError::validation("bot_id", "is required"))?;

    // Ownership is enforced via the bot, not the wallet list itself — a
    // caller without access to the bot gets an empty/forbidden response
    // rather than leaking whether wallets exist for it.
    let bot = state
        .db
        .get_bot(&bot_id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bot not found: {bot_id}")))?;
    if !actor.can_access(&bot.owner_id) {
        return Err(AppError::Forbidden);
    }

    let wallets = state.db.list_wallets_for_bot(&bot_id, actor.owner_filter()).await?;
    let presented: Vec<Wallet> = wallets.into_iter().map(redacted).collect();
    Ok(Json(json!({ "data": presented, "filters": { "botId": bot_id } })))
}

#[derive(Debug, Deserialize)]
struct CreateWalletRequest {
    #[serde(rename = "botId")]
    bot_id: String,
    exchange: String,
    key: String,
    secret: String,
    #[serde(default)]
    address: Option<String>,
}

async fn create_wallet(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Json(req): Json<CreateWalletRequest>,
) -> AppResult<Json<Wallet>> {
    if req.exchange.trim().is_empty() {
        return Err(AppError::validation("exchange", "must not be empty"));
    }
    if req.key.trim().is_empty() || req.secret.trim().is_empty() {
        return Err(AppError::validation("key", "key and secret must not be empty"));
    }

    let bot = state
        .db
        .get_bot(&req.bot_id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bot not found: {}", req.bot_id)))?;
    if !actor.can_access(&bot.owner_id) {
        return Err(AppError::Forbidden);
    }

    let owner = state
        .db
        .get_user_by_id(&bot.owner_id)
        .await?
        .ok_or(AppError::Auth)?;
    let encrypted_key = state.vault.encrypt(&req.key, &owner.encryption_salt)?;
    let encrypted_secret = state.vault.encrypt(&req.secret, &owner.encryption_salt)?;

    let wallet = Wallet {
        id: Uuid::new_v4().to_string(),
        owner_id: bot.owner_id.clone(),
        bot_id: bot.id.clone(),
        exchange: req.exchange,
        encrypted_key,
        encrypted_secret,
        address: req.address,
        active: true,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.db.create_wallet(&wallet).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "wallet.created",
        "wallet",
        &wallet.id,
        json!({ "botId": wallet.bot_id, "exchange": wallet.exchange }),
    )
    .await?;

    Ok(Json(redacted(wallet)))
}

async fn get_wallet(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Wallet>> {
    let wallet = require_owned_wallet(&state, &actor, &id).await?;
    Ok(Json(redacted(wallet)))
}

#[derive(Debug, Deserialize)]
struct UpdateWalletRequest {
    exchange: Option<String>,
    key: Option<String>,
    secret: Option<String>,
    address: Option<Option<String>>,
    active: Option<bool>,
}

async fn update_wallet(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateWalletRequest>,
) -> AppResult<Json<Wallet>> {
    let mut wallet = require_owned_wallet(&state, &actor, &id).await?;

    if let Some(exchange) = req.exchange {
        wallet.exchange = exchange;
    }
    if let Some(address) = req.address {
        wallet.address = address;
    }
    if let Some(active) = req.active {
        wallet.active = active;
    }
    if req.key.is_some() || req.secret.is_some() {
        let owner = state
            .db
            .get_user_by_id(&wallet.owner_id)
            .await?
            .ok_or(AppError::Auth)?;
        if let Some(key) = req.key {
            wallet.encrypted_key = state.vault.encrypt(&key, &owner.encryption_salt)?;
        }
        if let Some(secret) = req.secret {
            wallet.encrypted_secret = state.vault.encrypt(&secret, &owner.encryption_salt)?;
        }
    }

    state.db.update_wallet(&wallet).await?;

    crate::api::audit(&state, &actor.user_id, "wallet.updated", "wallet", &wallet.id, json!({})).await?;

    Ok(Json(redacted(wallet)))
}

async fn delete_wallet(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let wallet = require_owned_wallet(&state, &actor, &id).await?;
    state.db.delete_wallet(&wallet.id, &wallet.owner_id).await?;

    crate::api::audit(&state, &actor.user_id, "wallet.deleted", "wallet", &wallet.id, json!({})).await?;

    Ok(Json(json!({ "ok": true })))
}
