// Read-only leaderboard surface plus an admin-triggered recompute (spec §6
// leaderboard surface). The ranked rows themselves live in
// `leaderboard_entries`, written by the Leaderboard Service (C10) on its
// hourly cadence; this module only ever reads them back, except for the
// admin `update` endpoint which forces an out-of-cadence recompute.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::leaderboard::ALL_PERIODS;
use crate::state::AppState;
use crate::types::LeaderboardPeriod;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/leaderboard/stats", get(stats))
        .route("/leaderboard/user/:userId", get(for_user))
        .route("/leaderboard/bot/:botId/history", get(bot_history))
        .route("/leaderboard/update", post(trigger_update))
        .route("/leaderboard/:period", get(by_period))
}

fn parse_period(raw: &str) -> AppResult<LeaderboardPeriod> {
    raw.parse().map_err(|_| AppError::validation("period", "unknown leaderboard period"))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

/// Public — no authentication required (spec §6: "`GET /leaderboard/:period`
/// (public)").
async fn by_period(
    State(state): State<Arc<AppState>>,
    Path(period): Path<String>,
    Query(q): Query<LimitQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let period = parse_period(&period)?;
    let entries = state
        .db
        .leaderboard_for_period(&period.to_string(), q.limit.unwrap_or(100))
        .await?;
    Ok(Json(json!({ "data": entries, "filters": { "period": period.to_string() } })))
}

async fn stats(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let mut data = serde_json::Map::new();
    for period in ALL_PERIODS {
        let entries = state.db.leaderboard_for_period(&period.to_string(), 1).await?;
        data.insert(
            period.to_string(),
            json!({ "rankedBots": entries.len(), "leader": entries.first() }),
        );
    }
    Ok(Json(serde_json::Value::Object(data)))
}

async fn for_user(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if !actor.can_access(&user_id) {
        return Err(AppError::Forbidden);
    }

    let mut data = serde_json::Map::new();
    for period in ALL_PERIODS {
        let entries = state
            .db
            .leaderboard_entries_for_owner(&period.to_string(), &user_id)
            .await?;
        data.insert(period.to_string(), json!(entries));
    }
    Ok(Json(serde_json::Value::Object(data)))
}

async fn bot_history(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(bot_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = state
        .db
        .get_bot(&bot_id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bot not found: {bot_id}")))?;
    if !actor.can_access(&bot.owner_id) {
        return Err(AppError::Forbidden);
    }

    let mut data = serde_json::Map::new();
    for period in ALL_PERIODS {
        let entry = state.db.leaderboard_entry_for_bot(&period.to_string(), &bot_id).await?;
        data.insert(period.to_string(), json!(entry));
    }
    Ok(Json(serde_json::Value::Object(data)))
}

async fn trigger_update(State(state): State<Arc<AppState>>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    state.leaderboard.recompute_all(chrono::Utc::now()).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "leaderboard.recomputed",
        "leaderboard",
        "all",
        json!({}),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}
