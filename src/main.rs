// =============================================================================
// Bot Arena Server — Main Entry Point
// =============================================================================
//
// Boot order: load config + settings, build `AppState`, start the bot
// scheduler, reload the broadcaster from persisted state, launch the market
// feed and leaderboard cadence loops, then serve the API until Ctrl+C.
// =============================================================================

mod api;
mod auth;
mod broadcast;
mod config;
mod db;
mod decision_loop;
mod error;
mod exchange;
mod indicators;
mod leaderboard;
mod llm;
mod market_feed;
mod scheduler;
mod state;
mod summarizer;
mod token_tracker;
mod trading;
mod types;
mod vault;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ProcessConfig, Settings};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Bot Arena Server — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let process_config = ProcessConfig::from_env();
    let settings = Settings::load(&process_config.settings_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load settings, using defaults");
        Settings::default()
    });

    let bind_addr = process_config.bind_addr.clone();
    let state = AppState::bootstrap(process_config, settings)?;

    // Reload the last broadcast projection — and the cooldowns embedded in
    // it — before spawning any bot task, so a restart doesn't let a bot
    // bypass a cooldown that hadn't expired yet (spec §9 Open Question:
    // cooldown durability). Bring every active bot's runtime task up before
    // accepting traffic, so a request for bot state right after boot never
    // races an empty ledger.
    let restored_cooldowns = state.broadcaster.reload_from_store().await;
    state.scheduler.set_restored_cooldowns(restored_cooldowns);
    state.scheduler.start().await?;

    spawn_market_feed(state.clone());
    spawn_leaderboard_cadence(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::router(state.clone());
    let serve = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(%err, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping gracefully");
        }
        _ = serve => {
            error!("API server task ended unexpectedly");
        }
    }

    state.scheduler.shutdown().await;

    if let Err(e) = state.settings.read().save(&state.settings_path) {
        error!(error = %e, "failed to save settings on shutdown");
    }

    info!("bot arena server shut down complete.");
    Ok(())
}

/// Refreshes the shared `MarketSnapshot` on `refresh_interval_ms` cadence
/// (spec §4.8.2) so every bot's turn sees up-to-date marks without each bot
/// polling the exchange itself.
fn spawn_market_feed(state: Arc<AppState>) {
    tokio::spawn(async move {
        let feed = market_feed::MarketFeed::new();
        loop {
            let symbols = state.settings.read().trading_symbols.clone();
            let previous = state.market.read().clone();
            let next = feed.refresh(&symbols, &previous).await;
            *state.market.write() = next;

            let interval_ms = state.settings.read().refresh_interval_ms;
            tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;
        }
    });
}

/// Recomputes every leaderboard period hourly (spec §4.10), forceable
/// out-of-cadence via the admin `/leaderboard/update` endpoint.
fn spawn_leaderboard_cadence(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(err) = state.leaderboard.recompute_all(chrono::Utc::now()).await {
                error!(%err, "scheduled leaderboard recomputation failed");
            }
        }
    });
}
