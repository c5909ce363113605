// Administrative surface: user management, orphaned-bot cleanup, audit log,
// and process-wide stats (spec §6 admin surface). Every handler starts with
// `actor.require_admin()?` — there is no separate admin-only router layer,
// matching the teacher's per-handler `AuthBearer` check rather than a
// blanket middleware.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::api::pagination::{paginate, PageParams};
use crate::api::views::{BotView, UserView};
use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::Role;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id/role", put(update_role))
        .route("/admin/users/:id/status", put(update_status))
        .route("/admin/users/:id", delete(delete_user))
        .route("/admin/stats", get(stats))
        .route("/admin/audit-log", get(audit_log))
        .route("/admin/bots", get(list_all_bots))
        .route("/admin/orphaned-bots", get(orphaned_bots).delete(delete_orphaned_bots))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(page): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    let users = state.db.list_users().await?;
    let views: Vec<UserView> = users.iter().map(UserView::from).collect();
    let result = paginate(&views, &page, json!({}));
    Ok(Json(serde_json::to_value(result).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize)]
struct UpdateRoleRequest {
    role: Role,
}

async fn update_role(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    state.db.update_role(&id, req.role).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "admin.user_role_updated",
        "user",
        &id,
        json!({ "role": req.role.to_string() }),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    active: bool,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    state.db.update_active(&id, req.active).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "admin.user_status_updated",
        "user",
        &id,
        json!({ "active": req.active }),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    if id == actor.user_id {
        return Err(AppError::validation("id", "admin cannot delete their own account"));
    }

    // No explicit runtime teardown needed: each bot's scheduler task re-reads
    // its own row every iteration and exits as soon as `get_bot` comes back
    // empty, which the cascade delete below guarantees.
    state.db.delete_user_cascade(&id).await?;

    crate::api::audit(&state, &actor.user_id, "admin.user_deleted", "user", &id, json!({})).await?;

    Ok(Json(json!({ "ok": true })))
}

async fn stats(State(state): State<Arc<AppState>>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    let users = state.db.list_users().await?;
    let bots = state.db.list_bots(None).await?;
    let active_bots = bots.iter().filter(|b| b.active).count();
    let orphaned = state.db.list_orphaned_bots().await?;

    Ok(Json(json!({
        "userCount": users.len(),
        "botCount": bots.len(),
        "activeBotCount": active_bots,
        "orphanedBotCount": orphaned.len(),
    })))
}

async fn audit_log(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(page): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    let entries = state.db.list_audit(page.limit(), page.offset()).await?;
    Ok(Json(json!({ "data": entries, "filters": {} })))
}

async fn list_all_bots(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(page): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    let bots = state.db.list_bots(None).await?;
    let views: Vec<BotView> = bots.iter().map(|b| BotView::compose(b, &state.engine)).collect();
    let result = paginate(&views, &page, json!({}));
    Ok(Json(serde_json::to_value(result).unwrap_or(json!({}))))
}

async fn orphaned_bots(State(state): State<Arc<AppState>>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    let bots = state.db.list_orphaned_bots().await?;
    let views: Vec<BotView> = bots.iter().map(|b| BotView::compose(b, &state.engine)).collect();
    Ok(Json(json!({ "data": views })))
}

async fn delete_orphaned_bots(State(state): State<Arc<AppState>>, actor: AuthUser) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    let bots = state.db.list_orphaned_bots().await?;
    let mut deleted = Vec::with_capacity(bots.len());
    for bot in &bots {
        // `owner_id` still names the deleted user's old row; `soft_delete_bot`
        // only uses it to scope the UPDATE, so this deactivates the bot (and,
        // via the active=0 check in the scheduler's own loop, ends its
        // runtime task on its next iteration) without needing the user to
        // still exist.
        state.db.soft_delete_bot(&bot.id, &bot.owner_id).await.ok();
        deleted.push(bot.id.clone());
    }

    crate::api::audit(
        &state,
        &actor.user_id,
        "admin.orphaned_bots_deleted",
        "bot",
        "bulk",
        json!({ "botIds": deleted }),
    )
    .await?;

    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}
