// =============================================================================
// Central Application State
// =============================================================================
//
// The single source of truth wiring every subsystem together, replacing the
// teacher's `app_state.rs`. Kept its per-field `Arc`/lock idiom — each
// subsystem owns its own interior mutability, `AppState` just holds `Arc`s to
// them — but the fields themselves are this crate's C1–C10 components rather
// than the teacher's market-data/risk/position-manager stack.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::auth::JwtHandler;
use crate::broadcast::Broadcaster;
use crate::config::{ProcessConfig, Settings};
use crate::db::Db;
use crate::decision_loop::{DecisionLoop, MarketSnapshot};
use crate::leaderboard::Leaderboard;
use crate::llm::LlmDispatcher;
use crate::scheduler::Scheduler;
use crate::summarizer::{Summarizer, SummarizerConfig};
use crate::token_tracker::TokenTracker;
use crate::trading::engine::TradingEngine;
use crate::vault::Vault;

/// Central application state shared across all async tasks and request
/// handlers via `Arc<AppState>`.
pub struct AppState {
    pub db: Db,
    pub vault: Arc<Vault>,
    pub jwt: Arc<JwtHandler>,
    pub settings: Arc<RwLock<Settings>>,
    pub settings_path: String,
    pub dispatcher: LlmDispatcher,
    pub engine: Arc<TradingEngine>,
    pub summarizer: Arc<Summarizer>,
    pub token_tracker: Arc<TokenTracker>,
    pub decision_loop: Arc<DecisionLoop>,
    pub scheduler: Arc<Scheduler>,
    pub broadcaster: Arc<Broadcaster>,
    pub leaderboard: Arc<Leaderboard>,
    pub market: Arc<RwLock<MarketSnapshot>>,
    pub cors_origins: Vec<String>,
}

impl AppState {
    /// Builds every subsystem and wires them together. Does not start the
    /// scheduler's bot tasks or any background cadence loop — `main.rs` does
    /// that once the state is fully constructed.
    pub fn bootstrap(process_config: ProcessConfig, settings: Settings) -> anyhow::Result<Arc<Self>> {
        let db = Db::open(&process_config.db_path)?;
        let vault = Arc::new(Vault::new(&process_config.vault_master_key));
        let jwt = Arc::new(JwtHandler::new(process_config.jwt_secret.clone(), 24));
        let settings = Arc::new(RwLock::new(settings));
        let market = Arc::new(RwLock::new(MarketSnapshot::default()));

        let dispatcher = LlmDispatcher::new();
        let engine = Arc::new(TradingEngine::new(db.clone(), None));

        let summarizer_config = {
            let s = settings.read();
            SummarizerConfig {
                token_budget: s.summary_token_budget,
                min_new_decisions: s.summary_min_new_decisions,
            }
        };
        let summarizer = Arc::new(Summarizer::new(db.clone(), dispatcher.clone(), summarizer_config));
        let token_tracker = Arc::new(TokenTracker::new(db.clone()));

        let decision_loop = Arc::new(DecisionLoop::new(
            db.clone(),
            dispatcher.clone(),
            engine.clone(),
            summarizer.clone(),
            token_tracker.clone(),
        ));

        let broadcaster = Arc::new(Broadcaster::new(db.clone()));
        let leaderboard = Arc::new(Leaderboard::new(db.clone()));

        let scheduler = Scheduler::new(
            db.clone(),
            vault.clone(),
            engine.clone(),
            decision_loop.clone(),
            settings.clone(),
            market.clone(),
            broadcaster.clone(),
        );

        Ok(Arc::new(Self {
            db,
            vault,
            jwt,
            settings,
            settings_path: process_config.settings_path,
            dispatcher,
            engine,
            summarizer,
            token_tracker,
            decision_loop,
            scheduler,
            broadcaster,
            leaderboard,
            market,
            cors_origins: process_config.cors_origins,
        }))
    }
}

impl axum::extract::FromRef<Arc<AppState>> for Arc<JwtHandler> {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.jwt.clone()
    }
}
