// LLM provider credential CRUD plus a connectivity test (spec §6 providers
// surface). Every encrypted_api_key round-trips through the Crypto Vault
// (C2), keyed on the owning user's `encryption_salt` — the API layer itself
// never sees plaintext beyond the single request that sets it.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::pagination::{paginate, PageParams};
use crate::auth::AuthUser;
use crate::db::models::Provider;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::{ProviderVariant, RequestKind};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/providers",
            axum::routing::get(list_providers).post(create_provider),
        )
        .route(
            "/providers/:id",
            axum::routing::get(get_provider)
                .put(update_provider)
                .delete(delete_provider),
        )
        .route("/providers/:id/test", post(test_provider))
}

async fn require_owned_provider(state: &AppState, actor: &AuthUser, id: &str) -> AppResult<Provider> {
    let provider = state
        .db
        .get_provider(id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider not found: {id}")))?;
    if !actor.can_access(&provider.owner_id) {
        return Err(AppError::Forbidden);
    }
    Ok(provider)
}

fn present(provider: Provider, actor: &AuthUser) -> Provider {
    if actor.is_admin() {
        provider
    } else {
        provider.redacted()
    }
}

async fn list_providers(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(page): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    let providers = state.db.list_providers(actor.owner_filter()).await?;
    let presented: Vec<Provider> = providers.into_iter().map(|p| present(p, &actor)).collect();
    let result = paginate(&presented, &page, json!({}));
    Ok(Json(serde_json::to_value(result).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize)]
struct CreateProviderRequest {
    name: String,
    variant: ProviderVariant,
    #[serde(rename = "endpointUrl")]
    endpoint_url: String,
    #[serde(rename = "modelName")]
    model_name: String,
    #[serde(rename = "apiKey")]
    api_key: String,
    #[serde(default)]
    config: serde_json::Value,
}

async fn create_provider(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Json(req): Json<CreateProviderRequest>,
) -> AppResult<Json<Provider>> {
    if req.name.trim().is_empty() {
        return Err(AppError::validation("name", "must not be empty"));
    }
    if req.api_key.trim().is_empty() {
        return Err(AppError::validation("apiKey", "must not be empty"));
    }

    let owner = state
        .db
        .get_user_by_id(&actor.user_id)
        .await?
        .ok_or(AppError::Auth)?;
    let encrypted_api_key = state.vault.encrypt(&req.api_key, &owner.encryption_salt)?;

    let provider = Provider {
        id: Uuid::new_v4().to_string(),
        owner_id: actor.user_id.clone(),
        name: req.name,
        variant: req.variant,
        endpoint_url: req.endpoint_url,
        model_name: req.model_name,
        encrypted_api_key,
        config: req.config,
        active: true,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.db.create_provider(&provider).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "provider.created",
        "provider",
        &provider.id,
        json!({ "name": provider.name, "variant": provider.variant.to_string() }),
    )
    .await?;

    Ok(Json(present(provider, &actor)))
}

async fn get_provider(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Provider>> {
    let provider = require_owned_provider(&state, &actor, &id).await?;
    Ok(Json(present(provider, &actor)))
}

#[derive(Debug, Deserialize)]
struct UpdateProviderRequest {
    name: Option<String>,
    #[serde(rename = "endpointUrl")]
    endpoint_url: Option<String>,
    #[serde(rename = "modelName")]
    model_name: Option<String>,
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    config: Option<serde_json::Value>,
    active: Option<bool>,
}

async fn update_provider(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateProviderRequest>,
) -> AppResult<Json<Provider>> {
    let mut provider = require_owned_provider(&state, &actor, &id).await?;

    if let Some(name) = req.name {
        provider.name = name;
    }
    if let Some(endpoint_url) = req.endpoint_url {
        provider.endpoint_url = endpoint_url;
    }
    if let Some(model_name) = req.model_name {
        provider.model_name = model_name;
    }
    if let Some(config) = req.config {
        provider.config = config;
    }
    if let Some(active) = req.active {
        provider.active = active;
    }
    if let Some(api_key) = req.api_key {
        let owner = state
            .db
            .get_user_by_id(&provider.owner_id)
            .await?
            .ok_or(AppError::Auth)?;
        provider.encrypted_api_key = state.vault.encrypt(&api_key, &owner.encryption_salt)?;
    }

    state.db.update_provider(&provider).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "provider.updated",
        "provider",
        &provider.id,
        json!({}),
    )
    .await?;

    Ok(Json(present(provider, &actor)))
}

async fn delete_provider(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let provider = require_owned_provider(&state, &actor, &id).await?;
    state.db.delete_provider(&provider.id, &provider.owner_id).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "provider.deleted",
        "provider",
        &provider.id,
        json!({}),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

/// Sends a minimal prompt through the dispatcher to confirm the stored
/// credential and endpoint actually work, recording the attempt as a
/// `RequestKind::Sandbox` usage event rather than a billable decision.
async fn test_provider(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let provider = require_owned_provider(&state, &actor, &id).await?;
    let owner = state
        .db
        .get_user_by_id(&provider.owner_id)
        .await?
        .ok_or(AppError::Auth)?;
    let api_key = state.vault.decrypt(&provider.encrypted_api_key, &owner.encryption_salt)?;

    let (result, latency_ms) = state
        .dispatcher
        .call(&provider, &api_key, "Respond with the single word: ok.", RequestKind::Sandbox)
        .await;

    // Not routed through the Token Tracker: a provider test has no owning
    // bot, and `token_usage.bot_id` is a required foreign key (spec §4.4
    // tracks per-bot usage only).
    match result {
        Ok(reply) => Ok(Json(json!({ "ok": true, "latencyMs": latency_ms, "reply": reply.text }))),
        Err(err) => Ok(Json(json!({ "ok": false, "latencyMs": latency_ms, "error": err.to_string() }))),
    }
}
