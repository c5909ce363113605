// Runtime settings map (spec §6 settings surface, §9: "unrecognized keys are
// rejected on write"). Every write goes through `Settings::set_key` so the
// validation and the in-memory/on-disk representations can never drift, then
// persists the whole map with the atomic tmp+rename `Settings::save`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/settings", get(get_all).post(set_bulk))
        .route("/settings/metadata", get(metadata))
        .route("/settings/:key", get(get_one).put(set_one))
}

async fn get_all(State(state): State<Arc<AppState>>, _actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    let settings = state.settings.read().clone();
    Ok(Json(serde_json::to_value(settings).unwrap_or(json!({}))))
}

async fn get_one(
    State(state): State<Arc<AppState>>,
    _actor: AuthUser,
    Path(key): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let settings = state.settings.read().clone();
    let as_value = serde_json::to_value(&settings).unwrap_or(json!({}));
    let value = as_value
        .get(&key)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("unrecognized setting key: {key}")))?;
    Ok(Json(json!({ "key": key, "value": value })))
}

#[derive(Debug, Deserialize)]
struct SetKeyRequest {
    value: serde_json::Value,
}

async fn set_one(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(key): Path<String>,
    Json(req): Json<SetKeyRequest>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;

    {
        let mut settings = state.settings.write();
        settings
            .set_key(&key, req.value.clone())
            .map_err(|message| AppError::validation(&key, message))?;
    }
    persist_settings(&state)?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "settings.updated",
        "setting",
        &key,
        json!({ "value": req.value }),
    )
    .await?;

    Ok(Json(json!({ "ok": true, "key": key })))
}

#[derive(Debug, Deserialize)]
struct BulkSetRequest {
    #[serde(flatten)]
    values: serde_json::Map<String, serde_json::Value>,
}

async fn set_bulk(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Json(req): Json<BulkSetRequest>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;

    {
        let mut settings = state.settings.write();
        for (key, value) in &req.values {
            settings
                .set_key(key, value.clone())
                .map_err(|message| AppError::validation(key, message))?;
        }
    }
    persist_settings(&state)?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "settings.bulk_updated",
        "setting",
        "bulk",
        json!({ "keys": req.values.keys().collect::<Vec<_>>() }),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

async fn metadata(_state: State<Arc<AppState>>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    Ok(Json(json!({ "keys": crate::config::Settings::known_keys() })))
}

fn persist_settings(state: &AppState) -> AppResult<()> {
    let settings = state.settings.read().clone();
    settings
        .save(&state.settings_path)
        .map_err(|err| AppError::PersistenceFailed(err.to_string()))
}
