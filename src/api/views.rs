// Response projections that must never leak a password hash, encryption
// salt, or decrypted credential back over the API.

use serde::Serialize;

use crate::db::models::{Bot, User};
use crate::trading::engine::TradingEngine;
use crate::types::{BotMode, Role};

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub active: bool,
    pub created_at: String,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            username: u.username.clone(),
            role: u.role,
            active: u.active,
            created_at: u.created_at.clone(),
        }
    }
}

/// A Bot row enriched with its live paper-ledger state — the shape every
/// bot list/get response actually returns, since balance and open positions
/// live in the Trading Engine rather than the `bots` table (spec §3: "Bot
/// carries configuration; balance and positions are derived").
#[derive(Debug, Clone, Serialize)]
pub struct BotView {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub system_prompt: String,
    pub provider_id: String,
    pub mode: BotMode,
    pub active: bool,
    pub paused: bool,
    pub allowed_symbols: Option<Vec<String>>,
    pub created_at: String,
    pub balance: f64,
    pub unrealized_pnl: f64,
    pub total_value: f64,
    pub open_position_count: usize,
}

impl BotView {
    pub fn compose(bot: &Bot, engine: &TradingEngine) -> Self {
        let ledger = engine.ledger_snapshot(&bot.id).unwrap_or_default();
        let unrealized_pnl: f64 = ledger.open_positions.iter().map(|p| p.unrealized_pnl).sum();
        Self {
            id: bot.id.clone(),
            owner_id: bot.owner_id.clone(),
            name: bot.name.clone(),
            system_prompt: bot.system_prompt.clone(),
            provider_id: bot.provider_id.clone(),
            mode: bot.mode,
            active: bot.active,
            paused: bot.paused,
            allowed_symbols: bot.allowed_symbols.clone(),
            created_at: bot.created_at.clone(),
            balance: ledger.balance,
            unrealized_pnl,
            total_value: ledger.balance + unrealized_pnl,
            open_position_count: ledger.open_positions.len(),
        }
    }
}
