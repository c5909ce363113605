// Performance/risk analytics over a bot's closed trades and equity-curve
// snapshots (spec §6 analytics surface). Shares the naive-Sharpe and
// max-drawdown formulas the Leaderboard Service (C10) uses for its own
// period windows, applied on demand instead of on an hourly cadence.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::db::models::Bot;
use crate::error::{AppError, AppResult};
use crate::leaderboard::{max_drawdown, naive_sharpe};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analytics/performance", get(performance_all))
        .route("/analytics/performance/:botId", get(performance_one))
        .route("/analytics/comparison", get(comparison))
        .route("/analytics/risk-metrics", get(risk_metrics))
        .route("/analytics/aggregate/best-worst", get(aggregate_best_worst))
        .route("/analytics/aggregate/by-symbol", get(aggregate_by_symbol))
        .route("/analytics/aggregate/summary", get(aggregate_summary))
}

#[derive(Debug, Serialize)]
struct BotPerformance {
    #[serde(rename = "botId")]
    bot_id: String,
    name: String,
    #[serde(rename = "totalPnl")]
    total_pnl: f64,
    #[serde(rename = "tradeCount")]
    trade_count: u64,
    #[serde(rename = "winRate")]
    win_rate: f64,
    sharpe: f64,
    #[serde(rename = "maxDrawdown")]
    max_drawdown: f64,
}

fn window_bounds(time_range: &str, now: DateTime<Utc>) -> (String, String) {
    let from = match time_range {
        "24h" => now - Duration::hours(24),
        "7d" => now - Duration::days(7),
        "30d" => now - Duration::days(30),
        _ => DateTime::<Utc>::from_timestamp(0, 0).unwrap_or(now),
    };
    (from.to_rfc3339(), now.to_rfc3339())
}

async fn bot_performance(state: &AppState, bot: &Bot, from: &str, to: &str) -> AppResult<BotPerformance> {
    let trades = state.db.closed_trades_in_period(&bot.id, from, to).await?;
    let trade_count = trades.len() as u64;
    let total_pnl: f64 = trades.iter().map(|t| t.realized_pnl).sum();
    let win_rate = if trade_count == 0 {
        0.0
    } else {
        trades.iter().filter(|t| t.realized_pnl > 0.0).count() as f64 / trade_count as f64
    };

    let snapshots = state.db.snapshots_in_range(&bot.id, from, to).await?;
    let equity: Vec<f64> = snapshots.iter().map(|s| s.total_value).collect();

    Ok(BotPerformance {
        bot_id: bot.id.clone(),
        name: bot.name.clone(),
        total_pnl,
        trade_count,
        win_rate,
        sharpe: naive_sharpe(&equity),
        max_drawdown: max_drawdown(&equity),
    })
}

#[derive(Debug, Deserialize)]
struct TimeRangeQuery {
    #[serde(rename = "timeRange", default = "default_time_range")]
    time_range: String,
}

fn default_time_range() -> String {
    "all".to_string()
}

async fn performance_all(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(q): Query<TimeRangeQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (from, to) = window_bounds(&q.time_range, Utc::now());
    let bots = state.db.list_bots(actor.owner_filter()).await?;

    let mut out = Vec::with_capacity(bots.len());
    for bot in &bots {
        out.push(bot_performance(&state, bot, &from, &to).await?);
    }

    Ok(Json(json!({ "data": out, "filters": { "timeRange": q.time_range } })))
}

async fn performance_one(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Path(bot_id): Path<String>,
    Query(q): Query<TimeRangeQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = state
        .db
        .get_bot(&bot_id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bot not found: {bot_id}")))?;
    if !actor.can_access(&bot.owner_id) {
        return Err(AppError::Forbidden);
    }

    let (from, to) = window_bounds(&q.time_range, Utc::now());
    let perf = bot_performance(&state, &bot, &from, &to).await?;
    Ok(Json(serde_json::to_value(perf).unwrap_or(json!({}))))
}

#[derive(Debug, Deserialize)]
struct BotIdsQuery {
    bot_ids: String,
}

async fn comparison(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(q): Query<BotIdsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let ids: Vec<&str> = q.bot_ids.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    let (from, to) = window_bounds("all", Utc::now());

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let bot = match state.db.get_bot(id, None).await? {
            Some(b) if actor.can_access(&b.owner_id) => b,
            _ => continue,
        };
        out.push(bot_performance(&state, &bot, &from, &to).await?);
    }

    Ok(Json(json!({ "data": out, "filters": { "botIds": q.bot_ids } })))
}

#[derive(Debug, Deserialize)]
struct BotIdQuery {
    bot_id: String,
}

async fn risk_metrics(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
    Query(q): Query<BotIdQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let bot = state
        .db
        .get_bot(&q.bot_id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("bot not found: {}", q.bot_id)))?;
    if !actor.can_access(&bot.owner_id) {
        return Err(AppError::Forbidden);
    }

    let (from, to) = window_bounds("all", Utc::now());
    let trades = state.db.closed_trades_in_period(&bot.id, &from, &to).await?;
    let snapshots = state.db.snapshots_in_range(&bot.id, &from, &to).await?;
    let equity: Vec<f64> = snapshots.iter().map(|s| s.total_value).collect();

    let losses: Vec<f64> = trades.iter().map(|t| t.realized_pnl).filter(|p| *p < 0.0).collect();
    let largest_loss = losses.iter().cloned().fold(0.0_f64, f64::min);
    let liquidations = trades
        .iter()
        .filter(|t| t.realized_pnl < 0.0)
        .count();

    Ok(Json(json!({
        "botId": bot.id,
        "sharpe": naive_sharpe(&equity),
        "maxDrawdown": max_drawdown(&equity),
        "largestLoss": largest_loss,
        "tradeCount": trades.len(),
        "lossCount": liquidations,
    })))
}

async fn aggregate_best_worst(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let (from, to) = window_bounds("all", Utc::now());
    let bots = state.db.list_bots(actor.owner_filter()).await?;

    let mut performances = Vec::with_capacity(bots.len());
    for bot in &bots {
        performances.push(bot_performance(&state, bot, &from, &to).await?);
    }

    let best = performances
        .iter()
        .max_by(|a, b| a.total_pnl.partial_cmp(&b.total_pnl).unwrap_or(std::cmp::Ordering::Equal));
    let worst = performances
        .iter()
        .min_by(|a, b| a.total_pnl.partial_cmp(&b.total_pnl).unwrap_or(std::cmp::Ordering::Equal));

    Ok(Json(json!({ "best": best, "worst": worst })))
}

async fn aggregate_by_symbol(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let (from, to) = window_bounds("all", Utc::now());
    let bots = state.db.list_bots(actor.owner_filter()).await?;

    let mut by_symbol: std::collections::HashMap<String, (f64, u64)> = std::collections::HashMap::new();
    for bot in &bots {
        let trades = state.db.closed_trades_in_period(&bot.id, &from, &to).await?;
        for trade in trades {
            let entry = by_symbol.entry(trade.symbol.clone()).or_insert((0.0, 0));
            entry.0 += trade.realized_pnl;
            entry.1 += 1;
        }
    }

    let data: Vec<serde_json::Value> = by_symbol
        .into_iter()
        .map(|(symbol, (pnl, count))| json!({ "symbol": symbol, "totalPnl": pnl, "tradeCount": count }))
        .collect();

    Ok(Json(json!({ "data": data })))
}

async fn aggregate_summary(
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let (from, to) = window_bounds("all", Utc::now());
    let bots = state.db.list_bots(actor.owner_filter()).await?;

    let mut total_pnl = 0.0;
    let mut total_trades = 0u64;
    let mut total_wins = 0u64;
    for bot in &bots {
        let trades = state.db.closed_trades_in_period(&bot.id, &from, &to).await?;
        total_trades += trades.len() as u64;
        total_wins += trades.iter().filter(|t| t.realized_pnl > 0.0).count() as u64;
        total_pnl += trades.iter().map(|t| t.realized_pnl).sum::<f64>();
    }
    let win_rate = if total_trades == 0 { 0.0 } else { total_wins as f64 / total_trades as f64 };

    Ok(Json(json!({
        "botCount": bots.len(),
        "totalPnl": total_pnl,
        "totalTrades": total_trades,
        "winRate": win_rate,
    })))
}
