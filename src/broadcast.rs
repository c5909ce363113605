// =============================================================================
// Broadcast Channel (C9)
// =============================================================================
//
// Fans a sanitized ArenaState projection out to every connected `/ws` client.
// Grounded on the `cooprefr-bettersys` websocket-broadcaster pattern: a
// `tokio::sync::broadcast` channel plus a side-cell holding the latest value
// so a newly-connected client can be caught up immediately instead of
// waiting for the next tick. A lagging client is dropped by
// `tokio::sync::broadcast` itself (its next `recv()` returns `Lagged` and the
// `/ws` handler closes the socket) rather than the publisher ever blocking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::db::models::Bot;
use crate::db::Db;
use crate::decision_loop::MarketSnapshot;
use crate::trading::engine::TradingEngine;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Serialize)]
struct ArenaPositionView {
    symbol: String,
    side: String,
    size: f64,
    leverage: f64,
    entry_price: f64,
    unrealized_pnl: f64,
}

#[derive(Debug, Serialize)]
struct ArenaBotView {
    id: String,
    name: String,
    mode: String,
    active: bool,
    paused: bool,
    balance: f64,
    unrealized_pnl: f64,
    total_value: f64,
    open_positions: Vec<ArenaPositionView>,
    cooldowns: HashMap<String, i64>,
}

#[derive(Debug, Serialize)]
struct ArenaStateBlob {
    bots: Vec<ArenaBotView>,
    market: HashMap<String, f64>,
    updated_at: String,
}

/// Builds the sanitized projection from live runtime state — never from
/// anything containing a credential or decrypted provider key.
pub fn compose(bots: &[Bot], engine: &TradingEngine, market: &MarketSnapshot, now: DateTime<Utc>) -> Value {
    let bot_views = bots
        .iter()
        .map(|bot| {
            let ledger = engine.ledger_snapshot(&bot.id).unwrap_or_default();
            let unrealized_pnl: f64 = ledger.open_positions.iter().map(|p| p.unrealized_pnl).sum();
            ArenaBotView {
                id: bot.id.clone(),
                name: bot.name.clone(),
                mode: bot.mode.to_string(),
                active: bot.active,
                paused: bot.paused,
                balance: ledger.balance,
                unrealized_pnl,
                total_value: ledger.balance + unrealized_pnl,
                open_positions: ledger
                    .open_positions
                    .iter()
                    .map(|p| ArenaPositionView {
                        symbol: p.symbol.clone(),
                        side: p.side.to_string(),
                        size: p.size,
                        leverage: p.leverage,
                        entry_price: p.entry_price,
                        unrealized_pnl: p.unrealized_pnl,
                    })
                    .collect(),
                cooldowns: ledger
                    .cooldowns
                    .iter()
                    .map(|(symbol, expiry)| (symbol.clone(), (*expiry - now).num_milliseconds().max(0)))
                    .collect(),
            }
        })
        .collect();

    let blob = ArenaStateBlob {
        bots: bot_views,
        market: market.prices.clone(),
        updated_at: now.to_rfc3339(),
    };
    serde_json::to_value(blob).unwrap_or(Value::Null)
}

pub struct Broadcaster {
    tx: broadcast::Sender<Value>,
    current: parking_lot::RwLock<Value>,
    db: Db,
}

impl Broadcaster {
    pub fn new(db: Db) -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            current: parking_lot::RwLock::new(Value::Null),
            db,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    /// The last published blob — what a freshly-connected client is caught
    /// up with before it starts receiving live ticks.
    pub fn current(&self) -> Value {
        self.current.read().clone()
    }

    /// Persists `blob` into the single `arena_state` row and pushes it to
    /// every connected client. A send with zero receivers is not an error.
    pub async fn publish(&self, blob: Value, now: DateTime<Utc>) {
        *self.current.write() = blob.clone();
        if let Err(err) = self.db.replace_arena_state(&blob, &now.to_rfc3339()).await {
            warn!(%err, "failed to persist arena_state projection");
        }
        let _ = self.tx.send(blob);
    }

    /// Reloads the last persisted blob at startup so a freshly-connected `/ws`
    /// client is caught up immediately, and returns each bot's cooldown
    /// expiries read back out of it so the scheduler can restore them into
    /// the trading engine's ledgers before spawning any bot task (spec §9
    /// Open Question: cooldown durability). Must run before
    /// `Scheduler::start()`.
    pub async fn reload_from_store(&self) -> HashMap<String, HashMap<String, DateTime<Utc>>> {
        match self.db.read_arena_state().await {
            Ok(Some(blob)) => {
                let cooldowns = extract_cooldowns(&blob);
                *self.current.write() = blob;
                cooldowns
            }
            Ok(None) => HashMap::new(),
            Err(err) => {
                warn!(%err, "failed to reload arena_state projection");
                HashMap::new()
            }
        }
    }
}

/// Reads each bot's `cooldowns` map back out of a published arena_state
/// blob, converting the `remaining_ms`-at-publish-time values `compose`
/// writes into absolute expiries anchored on the blob's own `updated_at`
/// (so restoring works correctly regardless of how long the process was
/// down).
fn extract_cooldowns(blob: &Value) -> HashMap<String, HashMap<String, DateTime<Utc>>> {
    let mut out = HashMap::new();

    let Some(updated_at) = blob
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
    else {
        return out;
    };
    let Some(bots) = blob.get("bots").and_then(Value::as_array) else {
        return out;
    };

    for bot in bots {
        let Some(bot_id) = bot.get("id").and_then(Value::as_str) else { continue };
        let Some(cooldowns) = bot.get("cooldowns").and_then(Value::as_object) else { continue };

        let per_symbol: HashMap<String, DateTime<Utc>> = cooldowns
            .iter()
            .filter_map(|(symbol, remaining_ms)| {
                let remaining_ms = remaining_ms.as_i64()?;
                Some((symbol.clone(), updated_at + chrono::Duration::milliseconds(remaining_ms)))
            })
            .collect();

        if !per_symbol.is_empty() {
            out.insert(bot_id.to_string(), per_symbol);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_cooldowns_reads_absolute_expiry_from_remaining_ms() {
        let updated_at: DateTime<Utc> = "2026-07-26T00:00:00Z".parse().unwrap();
        let blob = serde_json::json!({
            "bots": [
                { "id": "bot1", "cooldowns": { "BTCUSDT": 5_000 } },
                { "id": "bot2", "cooldowns": {} },
            ],
            "market": {},
            "updated_at": updated_at.to_rfc3339(),
        });

        let restored = extract_cooldowns(&blob);
        assert!(!restored.contains_key("bot2"));
        let expiry = restored["bot1"]["BTCUSDT"];
        assert_eq!(expiry, updated_at + chrono::Duration::milliseconds(5_000));
    }

    #[test]
    fn extract_cooldowns_empty_on_missing_updated_at() {
        let blob = serde_json::json!({ "bots": [] });
        assert!(extract_cooldowns(&blob).is_empty());
    }
}
