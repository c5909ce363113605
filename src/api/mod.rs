// =============================================================================
// HTTP API (C1 surface)
// =============================================================================
//
// Route modules mirror the teacher's `api/rest.rs` handler idiom — thin axum
// handlers that defer all real work to the component layer and convert
// `AppResult` straight into a response via `AppError`'s `IntoResponse` impl —
// generalized from one fixed REST surface over a single trading engine to
// this crate's full multi-tenant surface.

pub mod admin;
pub mod analytics;
pub mod auth;
pub mod bots;
pub mod leaderboard;
pub mod pagination;
pub mod providers;
pub mod settings;
pub mod views;
pub mod wallets;
pub mod ws;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::db::models::AuditEntry;
use crate::error::AppResult;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = build_cors(&state.cors_origins);

    Router::new()
        .merge(auth::router())
        .merge(bots::router())
        .merge(providers::router())
        .merge(wallets::router())
        .merge(settings::router())
        .merge(analytics::router())
        .merge(leaderboard::router())
        .merge(admin::router())
        .route("/ws", get(ws::handler))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Permissive by default (dev), scoped to the configured origins once
/// `CORS_ORIGINS` is set (spec §6 process config).
fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    cors.allow_origin(parsed)
}

/// Writes one `AuditEntry` — called by every handler that mutates a Bot,
/// Provider, Wallet, Setting, or acts as an admin (spec §7's audit policy).
/// `details` must already have secret material stripped by the caller.
pub(crate) async fn audit(
    state: &AppState,
    actor_user_id: &str,
    event_type: &str,
    entity_kind: &str,
    entity_id: &str,
    details: Value,
) -> AppResult<()> {
    let entry = AuditEntry {
        id: Uuid::new_v4().to_string(),
        event_type: event_type.to_string(),
        entity_kind: entity_kind.to_string(),
        entity_id: entity_id.to_string(),
        actor_user_id: actor_user_id.to_string(),
        details,
        ip: None,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    state.db.insert_audit(&entry).await?;
    Ok(())
}
