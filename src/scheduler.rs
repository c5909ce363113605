// =============================================================================
// Bot Manager / Scheduler (C8)
// =============================================================================
//
// One long-lived cooperative task per active bot (spec §4.8, §5). Grounded on
// the teacher's `main.rs` per-symbol `tokio::spawn` loops — generalized from
// one task per market-data symbol to one task per bot — and `app_state.rs`'s
// per-field lock idiom, generalized to one exclusive `tokio::sync::Mutex` per
// bot runtime instead of one process-wide `RwLock`.
//
// Each bot's task re-reads its own Bot/Provider rows from the store at the
// top of every iteration, so pause/hot-reload/rename simply take effect on
// the next iteration without any cache-invalidation machinery. Force-turn
// uses `tokio::sync::Notify`, whose single-permit semantics are exactly the
// level-triggered collapse spec §5 requires: any number of force-turn calls
// between two wake-ups still produce one extra turn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broadcast::{self, Broadcaster};
use crate::db::models::AuditEntry;
use crate::db::Db;
use crate::decision_loop::{DecisionLoop, MarketSnapshot};
use crate::error::{AppError, AppResult};
use crate::trading::engine::TradingEngine;
use crate::types::BotMode;
use crate::vault::Vault;
use crate::config::Settings;

/// Consecutive `PersistenceFailed` turns after which a bot is auto-paused
/// (spec §7: "the bot is paused after N consecutive persistence failures,
/// N=3").
const MAX_CONSECUTIVE_PERSISTENCE_FAILURES: u32 = 3;

struct BotRuntime {
    wake: Arc<Notify>,
    turn_lock: Arc<AsyncMutex<()>>,
    task: JoinHandle<()>,
    consecutive_failures: Arc<AtomicU32>,
}

pub struct Scheduler {
    db: Db,
    vault: Arc<Vault>,
    engine: Arc<TradingEngine>,
    decision_loop: Arc<DecisionLoop>,
    settings: Arc<SyncRwLock<Settings>>,
    market: Arc<SyncRwLock<MarketSnapshot>>,
    broadcaster: Arc<Broadcaster>,
    runtimes: AsyncMutex<HashMap<String, BotRuntime>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Cooldowns read back out of the last broadcast arena_state projection,
    /// consumed (and cleared per-bot) by `hydrate_and_spawn` on first spawn
    /// after boot (spec §9 Open Question: cooldown durability).
    restored_cooldowns: SyncRwLock<HashMap<String, HashMap<String, DateTime<Utc>>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Db,
        vault: Arc<Vault>,
        engine: Arc<TradingEngine>,
        decision_loop: Arc<DecisionLoop>,
        settings: Arc<SyncRwLock<Settings>>,
        market: Arc<SyncRwLock<MarketSnapshot>>,
        broadcaster: Arc<Broadcaster>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            db,
            vault,
            engine,
            decision_loop,
            settings,
            market,
            broadcaster,
            runtimes: AsyncMutex::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            restored_cooldowns: SyncRwLock::new(HashMap::new()),
        })
    }

    /// Primes the cooldowns `start()` will restore into each bot's ledger on
    /// first spawn, read from the last broadcast arena_state projection
    /// (spec §9 Open Question: cooldown durability). Must be called before
    /// `start()` — boot order is `broadcaster.reload_from_store()` then
    /// `scheduler.start()`.
    pub fn set_restored_cooldowns(&self, cooldowns: HashMap<String, HashMap<String, DateTime<Utc>>>) {
        *self.restored_cooldowns.write() = cooldowns;
    }

    /// Loads every active bot and spawns its runtime task (spec §4.8.1:
    /// "load all bots where active=true"). Called once at process start.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        let bots = self.db.list_active_bots().await?;
        for bot in bots {
            self.hydrate_and_spawn(&bot.id, bot.owner_id.as_str(), bot.mode).await?;
        }
        info!("scheduler started");
        Ok(())
    }

    async fn hydrate_and_spawn(self: &Arc<Self>, bot_id: &str, owner_id: &str, mode: BotMode) -> AppResult<()> {
        let open_positions = self.db.list_open_positions_for_bot(bot_id).await?;
        let balance = match self.db.latest_snapshot(bot_id).await? {
            Some(snapshot) => snapshot.balance,
            None => {
                let settings = self.settings.read().clone();
                match mode {
                    BotMode::Paper => settings.paper_bot_initial_balance,
                    BotMode::Real => settings.live_bot_initial_balance,
                }
            }
        };
        let _ = owner_id;
        let cooldowns = self.restored_cooldowns.write().remove(bot_id).unwrap_or_default();
        self.engine.hydrate_ledger(bot_id, balance, open_positions, cooldowns);
        self.spawn(bot_id.to_string()).await;
        Ok(())
    }

    async fn spawn(self: &Arc<Self>, bot_id: String) {
        let wake = Arc::new(Notify::new());
        let turn_lock = Arc::new(AsyncMutex::new(()));
        let consecutive_failures = Arc::new(AtomicU32::new(0));

        let scheduler = self.clone();
        let wake_clone = wake.clone();
        let turn_lock_clone = turn_lock.clone();
        let failures_clone = consecutive_failures.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let bot_id_task = bot_id.clone();

        let task = tokio::spawn(async move {
            scheduler
                .run_bot_loop(bot_id_task, wake_clone, turn_lock_clone, failures_clone, &mut shutdown_rx)
                .await;
        });

        self.runtimes.lock().await.insert(
            bot_id,
            BotRuntime {
                wake,
                turn_lock,
                task,
                consecutive_failures,
            },
        );
    }

    async fn run_bot_loop(
        self: Arc<Self>,
        bot_id: String,
        wake: Arc<Notify>,
        turn_lock: Arc<AsyncMutex<()>>,
        consecutive_failures: Arc<AtomicU32>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let Ok(Some(bot)) = self.db.get_bot(&bot_id, None).await else {
                info!(bot_id, "bot no longer exists; ending runtime task");
                break;
            };
            if !bot.active {
                info!(bot_id, "bot deactivated; ending runtime task");
                break;
            }

            let interval_ms = self.settings.read().turn_interval_ms;
            // spec §4.8.1: wait `max(turn_interval, remaining_cooldown)` — a
            // bot whose only symbol is still cooling down gains nothing from
            // waking up on the plain interval, since every open/close it
            // could attempt would just be rejected.
            let cooldown_remaining_ms = self
                .engine
                .ledger_snapshot(&bot_id)
                .map(|ledger| {
                    let now = Utc::now();
                    ledger
                        .cooldowns
                        .values()
                        .map(|expiry| (*expiry - now).num_milliseconds().max(0) as u64)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            let wait_ms = interval_ms.max(cooldown_remaining_ms);
            let wait = tokio::time::sleep(std::time::Duration::from_millis(wait_ms));
            tokio::select! {
                _ = wait => {}
                _ = wake.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            if *shutdown_rx.borrow() {
                break;
            }

            let Ok(Some(bot)) = self.db.get_bot(&bot_id, None).await else {
                break;
            };
            if !bot.active {
                break;
            }
            if bot.paused {
                continue;
            }

            let _guard = turn_lock.lock().await;
            self.run_one_turn(&bot, &consecutive_failures).await;
        }

        self.runtimes.lock().await.remove(&bot_id);
    }

    async fn run_one_turn(&self, bot: &crate::db::models::Bot, consecutive_failures: &AtomicU32) {
        let provider = match self.db.get_provider(&bot.provider_id, None).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(bot_id = %bot.id, "bot's provider not found; skipping turn");
                return;
            }
            Err(err) => {
                warn!(bot_id = %bot.id, %err, "failed to load provider; skipping turn");
                return;
            }
        };

        let owner = match self.db.get_user_by_id(&bot.owner_id).await {
            Ok(Some(u)) => u,
            _ => {
                warn!(bot_id = %bot.id, "bot's owner not found; skipping turn");
                return;
            }
        };

        let api_key = match self.vault.decrypt(&provider.encrypted_api_key, &owner.encryption_salt) {
            Ok(key) => key,
            Err(err) => {
                warn!(bot_id = %bot.id, %err, "failed to decrypt provider api key; skipping turn");
                return;
            }
        };

        let market = self.market.read().clone();
        let settings = self.settings.read().clone();
        let now = Utc::now();

        match self.decision_loop.run_turn(bot, &provider, &api_key, &market, &settings, now).await {
            Ok(_) => {
                consecutive_failures.store(0, Ordering::SeqCst);
            }
            // `run_turn` only returns `Err` for a store failure — provider
            // and exchange failures are handled locally and surfaced as a
            // failed Decision row instead (spec §7). Db errors reach here as
            // either `PersistenceFailed` or, via the `anyhow` conversion most
            // of the store's accessors go through, `Internal`; both count
            // toward the consecutive-failure counter.
            Err(err @ (AppError::PersistenceFailed(_) | AppError::Internal(_))) => {
                let failures = consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                error!(bot_id = %bot.id, failures, %err, "persistence failure during bot turn");
                if failures >= MAX_CONSECUTIVE_PERSISTENCE_FAILURES {
                    self.auto_pause_on_persistence_failure(bot).await;
                }
            }
            Err(err) => {
                warn!(bot_id = %bot.id, %err, "bot turn failed");
            }
        }

        let bots = self.db.list_bots(None).await.unwrap_or_default();
        let blob = broadcast::compose(&bots, &self.engine, &market, now);
        self.broadcaster.publish(blob, now).await;
    }

    async fn auto_pause_on_persistence_failure(&self, bot: &crate::db::models::Bot) {
        if let Err(err) = self.db.set_paused(&bot.id, &bot.owner_id, true).await {
            error!(bot_id = %bot.id, %err, "failed to auto-pause bot after repeated persistence failures");
            return;
        }
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            event_type: "bot.auto_paused".to_string(),
            entity_kind: "bot".to_string(),
            entity_id: bot.id.clone(),
            actor_user_id: "system".to_string(),
            details: serde_json::json!({ "reason": "persistence_failures_exceeded", "threshold": MAX_CONSECUTIVE_PERSISTENCE_FAILURES }),
            ip: None,
            timestamp: Utc::now().to_rfc3339(),
        };
        let _ = self.db.insert_audit(&entry).await;
    }

    /// Wakes a bot's task immediately rather than waiting for the next
    /// interval (spec §6 `POST /bots/:id/force-turn`). Returns `false` if the
    /// bot has no running runtime (e.g. it is inactive).
    pub async fn force_turn(&self, bot_id: &str) -> bool {
        match self.runtimes.lock().await.get(bot_id) {
            Some(runtime) => {
                runtime.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Resets a paper bot's trading history (spec §4.8.1 "Reset"), serialized
    /// against any in-flight turn via the bot's own exclusive lock.
    pub async fn reset_bot(&self, bot_id: &str, owner_id: &str) -> AppResult<()> {
        let bot = self
            .db
            .get_bot(bot_id, Some(owner_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bot {bot_id}")))?;
        if bot.mode != BotMode::Paper {
            return Err(AppError::Conflict("only paper-mode bots can be reset".into()));
        }

        let lock = self.turn_lock_for(bot_id).await;
        let _guard = lock.lock().await;

        let settings = self.settings.read().clone();
        let now = Utc::now().to_rfc3339();
        self.db
            .reset_bot_data(bot_id, owner_id, settings.paper_bot_initial_balance, &now)
            .await?;
        self.engine
            .hydrate_ledger(bot_id, settings.paper_bot_initial_balance, Vec::new(), HashMap::new());
        Ok(())
    }

    /// Clears only the HistorySummary, distinct from a full reset (spec §4.8.1
    /// / S6).
    pub async fn clear_learning(&self, bot_id: &str, owner_id: &str) -> AppResult<()> {
        self.db
            .get_bot(bot_id, Some(owner_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bot {bot_id}")))?;
        let lock = self.turn_lock_for(bot_id).await;
        let _guard = lock.lock().await;
        self.db.clear_history_summary(bot_id).await?;
        Ok(())
    }

    async fn turn_lock_for(&self, bot_id: &str) -> Arc<AsyncMutex<()>> {
        if let Some(runtime) = self.runtimes.lock().await.get(bot_id) {
            return runtime.turn_lock.clone();
        }
        Arc::new(AsyncMutex::new(()))
    }

    /// Starts (or restarts) a bot's runtime task after a create/activate/PUT
    /// — since every iteration re-reads Bot+Provider from the store, this is
    /// the entire "hot reload" mechanism (spec §4.8.1: "hot-reloaded by
    /// scheduler").
    pub async fn hot_reload(self: &Arc<Self>, bot_id: &str) -> AppResult<()> {
        let bot = self
            .db
            .get_bot(bot_id, None)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bot {bot_id}")))?;

        if !bot.active {
            // Same signal-and-join shape as `shutdown()`: wake the task so it
            // re-checks `bot.active` at its next loop boundary instead of
            // sleeping out the rest of the interval, then await its exit
            // instead of `abort()`-ing it mid-turn (spec §5: "completes any
            // database write already issued ... and then exits").
            let runtime = self.runtimes.lock().await.remove(bot_id);
            if let Some(runtime) = runtime {
                runtime.wake.notify_one();
                let _ = runtime.task.await;
            }
            return Ok(());
        }

        let already_running = self.runtimes.lock().await.contains_key(bot_id);
        if !already_running {
            self.hydrate_and_spawn(bot_id, &bot.owner_id, bot.mode).await?;
        }
        Ok(())
    }

    /// Signals every bot task to finish its current turn and exit; starts no
    /// new turns. Writes a final ArenaState snapshot (spec §4.8.3).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut runtimes = self.runtimes.lock().await;
            runtimes.drain().map(|(_, r)| r.task).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        let now = Utc::now();
        let bots = self.db.list_bots(None).await.unwrap_or_default();
        let market = self.market.read().clone();
        let blob = broadcast::compose(&bots, &self.engine, &market, now);
        self.broadcaster.publish(blob, now).await;
        info!("scheduler shutdown complete; final arena_state snapshot written");
    }
}
