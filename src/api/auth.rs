// Account lifecycle: register, login, logout, token refresh, recovery-phrase
// reset, and self-service profile/password management (spec §6 auth surface).
//
// Grounded on the teacher's `api/auth.rs` admin-token extractor, generalized
// from a single static bearer token to per-user JWTs issued by `JwtHandler`
// and passwords hashed via `auth::password`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::views::UserView;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::AuthUser;
use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/recover", post(recover))
        .route("/auth/reset-password", post(admin_reset_password))
        .route("/auth/me", get(me).put(update_me))
        .route("/auth/password", put(change_password))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    user: UserView,
    token: String,
    #[serde(rename = "expiresIn")]
    expires_in: usize,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    user: UserView,
    token: String,
    #[serde(rename = "expiresIn")]
    expires_in: usize,
    #[serde(rename = "recoveryPhrase")]
    recovery_phrase: String,
}

const RECOVERY_WORDS: &[&str] = &[
    "anchor", "basalt", "cobalt", "driftwood", "ember", "falcon", "granite", "harbor",
    "indigo", "juniper", "kestrel", "lantern", "meridian", "nimbus", "obsidian", "pewter",
    "quartz", "ridgeline", "sable", "tundra", "umber", "vellum", "willow", "xenon",
    "yarrow", "zephyr", "copper", "maple", "orchid", "thistle", "slate", "cinder",
];

fn generate_recovery_phrase() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| RECOVERY_WORDS[rng.gen_range(0..RECOVERY_WORDS.len())])
        .collect::<Vec<_>>()
        .join("-")
}

fn hash_recovery_phrase(phrase: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phrase.as_bytes());
    hex::encode(hasher.finalize())
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    if req.username.trim().is_empty() {
        return Err(AppError::validation("username", "must not be empty"));
    }
    if req.password.len() < 8 {
        return Err(AppError::validation(
            "password",
            "must be at least 8 characters",
        ));
    }
    if state.db.get_user_by_username(&req.username).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "username already taken: {}",
            req.username
        )));
    }

    let password_hash = hash_password(&req.password).map_err(AppError::from)?;
    let recovery_phrase = generate_recovery_phrase();

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username.clone(),
        password_hash,
        role: crate::types::Role::User,
        active: true,
        encryption_salt: Uuid::new_v4().to_string(),
        recovery_code_hash: Some(hash_recovery_phrase(&recovery_phrase)),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.db.create_user(&user).await?;

    let (token, expires_in) = state.jwt.generate_token(&user).map_err(AppError::from)?;

    crate::api::audit(
        &state,
        &user.id,
        "user.registered",
        "user",
        &user.id,
        json!({ "username": user.username }),
    )
    .await?;

    Ok(Json(RegisterResponse {
        user: UserView::from(&user),
        token,
        expires_in,
        recovery_phrase,
    }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let user = state
        .db
        .get_user_by_username(&req.username)
        .await?
        .ok_or(AppError::Auth)?;

    if !user.active {
        return Err(AppError::Forbidden);
    }

    let ok = verify_password(&req.password, &user.password_hash).map_err(AppError::from)?;
    if !ok {
        return Err(AppError::Auth);
    }

    let (token, expires_in) = state.jwt.generate_token(&user).map_err(AppError::from)?;

    crate::api::audit(
        &state,
        &user.id,
        "user.login",
        "user",
        &user.id,
        json!({ "username": user.username }),
    )
    .await?;

    Ok(Json(AuthResponse {
        user: UserView::from(&user),
        token,
        expires_in,
    }))
}

/// Stateless logout — there is no server-side session to invalidate with a
/// single bearer-JWT scheme, so this only records the event for the audit
/// trail; the client is responsible for discarding its token.
async fn logout(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    crate::api::audit(&state, &actor.user_id, "user.logout", "user", &actor.user_id, json!({})).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
) -> AppResult<Json<AuthResponse>> {
    let user = state
        .db
        .get_user_by_id(&actor.user_id)
        .await?
        .ok_or(AppError::Auth)?;
    if !user.active {
        return Err(AppError::Forbidden);
    }
    let (token, expires_in) = state.jwt.generate_token(&user).map_err(AppError::from)?;
    Ok(Json(AuthResponse {
        user: UserView::from(&user),
        token,
        expires_in,
    }))
}

#[derive(Debug, Deserialize)]
struct RecoverRequest {
    username: String,
    #[serde(rename = "recoveryPhrase")]
    recovery_phrase: String,
    #[serde(rename = "newPassword")]
    new_password: String,
}

async fn recover(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecoverRequest>,
) -> AppResult<Json<AuthResponse>> {
    if req.new_password.len() < 8 {
        return Err(AppError::validation(
            "newPassword",
            "must be at least 8 characters",
        ));
    }

    let user = state
        .db
        .get_user_by_username(&req.username)
        .await?
        .ok_or(AppError::Auth)?;

    let expected = user.recovery_code_hash.as_deref().ok_or(AppError::Auth)?;
    if hash_recovery_phrase(&req.recovery_phrase) != expected {
        return Err(AppError::Auth);
    }

    let new_hash = hash_password(&req.new_password).map_err(AppError::from)?;
    state.db.update_password_hash(&user.id, &new_hash).await?;
    state.db.clear_recovery_code(&user.id).await?;

    let refreshed = state
        .db
        .get_user_by_id(&user.id)
        .await?
        .ok_or_else(|| AppError::Internal("user vanished mid-recovery".into()))?;
    let (token, expires_in) = state.jwt.generate_token(&refreshed).map_err(AppError::from)?;

    crate::api::audit(
        &state,
        &refreshed.id,
        "user.recovered",
        "user",
        &refreshed.id,
        json!({}),
    )
    .await?;

    Ok(Json(AuthResponse {
        user: UserView::from(&refreshed),
        token,
        expires_in,
    }))
}

#[derive(Debug, Deserialize)]
struct AdminResetPasswordRequest {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "newPassword")]
    new_password: String,
}

/// Admin-initiated reset of another user's password, distinct from the
/// self-service `/auth/password` flow below (no current-password check; the
/// caller's admin role is the authorization).
async fn admin_reset_password(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Json(req): Json<AdminResetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    actor.require_admin()?;
    if req.new_password.len() < 8 {
        return Err(AppError::validation(
            "newPassword",
            "must be at least 8 characters",
        ));
    }
    let target = state
        .db
        .get_user_by_id(&req.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user not found: {}", req.user_id)))?;

    let new_hash = hash_password(&req.new_password).map_err(AppError::from)?;
    state.db.update_password_hash(&target.id, &new_hash).await?;

    crate::api::audit(
        &state,
        &actor.user_id,
        "user.password_reset_by_admin",
        "user",
        &target.id,
        json!({}),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

async fn me(State(state): State<Arc<AppState>>, actor: AuthUser) -> AppResult<Json<UserView>> {
    let user = state
        .db
        .get_user_by_id(&actor.user_id)
        .await?
        .ok_or(AppError::Auth)?;
    Ok(Json(UserView::from(&user)))
}

#[derive(Debug, Deserialize)]
struct UpdateMeRequest {
    username: Option<String>,
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Json(req): Json<UpdateMeRequest>,
) -> AppResult<Json<UserView>> {
    let mut user = state
        .db
        .get_user_by_id(&actor.user_id)
        .await?
        .ok_or(AppError::Auth)?;

    if let Some(new_username) = req.username {
        let trimmed = new_username.trim().to_string();
        if trimmed.is_empty() {
            return Err(AppError::validation("username", "must not be empty"));
        }
        if trimmed != user.username {
            if state.db.get_user_by_username(&trimmed).await?.is_some() {
                return Err(AppError::Conflict(format!(
                    "username already taken: {trimmed}"
                )));
            }
            state.db.update_username(&user.id, &trimmed).await?;
            user.username = trimmed;
        }
    }

    Ok(Json(UserView::from(&user)))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    #[serde(rename = "currentPassword")]
    current_password: String,
    #[serde(rename = "newPassword")]
    new_password: String,
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let user = state
        .db
        .get_user_by_id(&actor.user_id)
        .await?
        .ok_or(AppError::Auth)?;

    let ok = verify_password(&req.current_password, &user.password_hash).map_err(AppError::from)?;
    if !ok {
        return Err(AppError::validation("currentPassword", "incorrect password"));
    }
    if req.new_password.len() < 8 {
        return Err(AppError::validation(
            "newPassword",
            "must be at least 8 characters",
        ));
    }

    let new_hash = hash_password(&req.new_password).map_err(AppError::from)?;
    state.db.update_password_hash(&user.id, &new_hash).await?;

    crate::api::audit(
        &state,
        &user.id,
        "user.password_changed",
        "user",
        &user.id,
        json!({}),
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}
