// Bot CRUD plus the per-bot runtime operations (pause, reset, clear-learning,
// force-turn, manual snapshot) and the read-only trade/position/decision/
// history feeds (spec §6 bots surface).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::pagination::{paginate, PageParams};
use crate::api::views::BotView;
use crate::auth::AuthUser;
use crate::db::models::Bot;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::{BotMode, PositionStatus};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bots", get(list_bots).post(create_bot))
        .route("/bots/:id", get(get_bot).put(update_bot).delete(delete_bot))
        .route("/bots/:id/pause", post(pause_bot))
        .route("/bots/:id/reset", post(reset_bot))
        .route("/bots/:id/clear-learning", post(clear_learning))
        .route("/bots/:id/force-turn", post(force_turn))
        .route("/bots/:id/snapshot", post(manual_snapshot))
        .route("/bots/:id/trades", get(list_trades))
        .route("/bots/:id/positions", get(list_positions))
        .route("/bots/:id/decisions", get(list_decisions))
        .route("/bots/:id/history-summary", get(history_summary))
}

async fn require_owned_bot(
    state: &AppState,
    actor: &AuthUser,
    bot_id: &str,
) -> AppResult<Bot> {
    let bot = state
        .db
        .get_bot(bot_id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bot not found: {bot_id}")))?;
    if !actor.can_access(&bot.owner_id) {
        return Err(AppError::Forbidden);
    }
    Ok(bot)
}

async fn list_bots(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(page): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    let bots = state.db.list_bots(actor.owner_filter()).await?;
    let views: Vec<BotView> = bots.iter().map(|b| BotView::compose(b, &state.engine)).collect();
    let result = paginate(&views, &page, json!({}));
    Ok(Json(serde_json::to_value(result).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize)]
struct CreateBotRequest {
    name: String,
    #[serde(rename = "systemPrompt")]
    system_prompt: String,
    #[serde(rename = "providerId")]
    provider_id: String,
    mode: BotMode,
    #[serde(default, rename = "allowedSymbols")]
    allowed_symbols: Option<Vec<String>>,
}

async fn create_bot(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Json(req): Json<CreateBotRequest>,
) -> AppResult<Json<BotView>> {
    if req.name.trim().is_empty() {
        return Err(AppError::validation("name", "must not be empty"));
    }

    let provider = state
        .db
        .get_provider(&req.provider_id, Some(&actor.user_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider not found: {}", req.provider_id)))?;
    if !provider.active {
        return Err(AppError::validation("providerId", "provider is not active"));
    }

    let existing = state.db.list_bots(Some(&actor.user_id)).await?;
    let max_bots = state.settings.read().max_bots as usize;
    if existing.len() >= max_bots {
        return Err(AppError::validation(
            "bots",
            format!("max_bots limit of {max_bots} reached"),
        ));
    }

    let bot = Bot {
        id: Uuid::new_v4().to_string(),
        owner_id: actor.user_id.clone(),
        name: req.name,
        system_prompt: req.system_prompt,
        provider_id: req.provider_id,
        mode: req.mode,
        active: true,
        paused: false,
        avatar: None,
        allowed_symbols: req.allowed_symbols,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.db.create_bot(&bot).await?;
    state.scheduler.hot_reload(&bot.id).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "bot.created",
        "bot",
        &bot.id,
        json!({ "name": bot.name }),
    )
    .await?;

    Ok(Json(BotView::compose(&bot, &state.engine)))
}

async fn get_bot(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<BotView>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    Ok(Json(BotView::compose(&bot, &state.engine)))
}

#[derive(Debug, Deserialize)]
struct UpdateBotRequest {
    name: Option<String>,
    #[serde(rename = "systemPrompt")]
    system_prompt: Option<String>,
    #[serde(rename = "providerId")]
    provider_id: Option<String>,
    mode: Option<BotMode>,
    active: Option<bool>,
    #[serde(default, rename = "allowedSymbols")]
    allowed_symbols: Option<Option<Vec<String>>>,
}

async fn update_bot(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateBotRequest>,
) -> AppResult<Json<BotView>> {
    let mut bot = require_owned_bot(&state, &actor, &id).await?;

    if let Some(provider_id) = req.provider_id {
        state
            .db
            .get_provider(&provider_id, None)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("provider not found: {provider_id}")))?;
        bot.provider_id = provider_id;
    }
    if let Some(name) = req.name {
        bot.name = name;
    }
    if let Some(system_prompt) = req.system_prompt {
        bot.system_prompt = system_prompt;
    }
    if let Some(mode) = req.mode {
        bot.mode = mode;
    }
    if let Some(active) = req.active {
        bot.active = active;
    }
    if let Some(allowed) = req.allowed_symbols {
        bot.allowed_symbols = allowed;
    }

    state.db.update_bot(&bot).await?;
    state.scheduler.hot_reload(&bot.id).await?;

    crate::api::audit(&state, &actor.user_id, "bot.updated", "bot", &bot.id, json!({})).await?;

    Ok(Json(BotView::compose(&bot, &state.engine)))
}

async fn delete_bot(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    state.db.soft_delete_bot(&bot.id, &bot.owner_id).await?;
    state.scheduler.hot_reload(&bot.id).await?;

    crate::api::audit(&state, &actor.user_id, "bot.deleted", "bot", &bot.id, json!({})).await?;

    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct PauseRequest {
    paused: bool,
}

async fn pause_bot(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<PauseRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    state.db.set_paused(&bot.id, &bot.owner_id, req.paused).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        if req.paused { "bot.paused" } else { "bot.resumed" },
        "bot",
        &bot.id,
        json!({}),
    )
    .await?;

    Ok(Json(json!({ "ok": true, "paused": req.paused })))
}

async fn reset_bot(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    state.scheduler.reset_bot(&bot.id, &bot.owner_id).await?;

    crate::api::audit(&state, &actor.user_id, "bot.reset", "bot", &bot.id, json!({})).await?;

    Ok(Json(json!({ "ok": true })))
}

async fn clear_learning(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    state.scheduler.clear_learning(&bot.id, &bot.owner_id).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "bot.learning_cleared",
        "bot",
        &bot.id,
        json!({}),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

async fn force_turn(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    let triggered = state.scheduler.force_turn(&bot.id).await;
    Ok(Json(json!({ "ok": true, "triggered": triggered })))
}

async fn manual_snapshot(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    let ledger = state.engine.ledger_snapshot(&bot.id).unwrap_or_default();
    let snapshot = state
        .decision_loop
        .write_manual_snapshot(&bot, &ledger, chrono::Utc::now())
        .await?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or(json!({}))))
}

#[derive(Debug, Serialize)]
struct TradesFilters {
    #[serde(rename = "botId")]
    bot_id: String,
}

async fn list_trades(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    let trades = state
        .db
        .list_trades_for_bot(&bot.id, page.limit(), page.offset())
        .await?;
    let total = state.db.count_trades_for_bot(&bot.id).await? as usize;
    let result = serde_json::json!({
        "data": trades,
        "pagination": {
            "total": total,
            "limit": page.limit(),
            "offset": page.offset(),
            "hasMore": page.offset() as usize + trades.len() < total,
        },
        "filters": { "botId": bot.id },
    });
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct PositionsQuery {
    status: Option<String>,
}

async fn list_positions(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Query(filter): Query<PositionsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    let status = match filter.status.as_deref() {
        Some("open") => Some(PositionStatus::Open),
        Some("closed") => Some(PositionStatus::Closed),
        _ => None,
    };
    let positions = state
        .db
        .list_positions_for_bot(&bot.id, None, status)
        .await?;
    Ok(Json(json!({ "data": positions, "filters": { "botId": bot.id, "status": filter.status } })))
}

async fn list_decisions(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    let decisions = state.db.list_decisions_for_bot(&bot.id, page.limit()).await?;
    Ok(Json(json!({ "data": decisions, "filters": { "botId": bot.id } })))
}

async fn history_summary(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = require_owned_bot(&state, &actor, &id).await?;
    let summary = state.db.get_history_summary(&bot.id).await?;
    Ok(Json(json!({ "data": summary })))
}
