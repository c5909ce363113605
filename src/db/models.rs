// =============================================================================
// Persistence row types — one struct per entity from spec §3
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{BotMode, CloseReason, PositionSide, PositionStatus, ProviderVariant, RequestKind, Role, TradeAction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub encryption_salt: String,
    /// SHA-256 hex digest of the one-time recovery phrase issued at
    /// registration. `None` once the phrase has been consumed by
    /// `/auth/recover` (single-use, spec §4 auth design).
    pub recovery_code_hash: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub variant: ProviderVariant,
    pub endpoint_url: String,
    pub model_name: String,
    /// Base64-encoded ciphertext; never serialized back out except to the
    /// vault itself. Call sites that expose providers over the API must use
    /// [`Provider::redacted`] instead of serializing this field.
    pub encrypted_api_key: String,
    pub config: serde_json::Value,
    pub active: bool,
    pub created_at: String,
}

impl Provider {
    /// Returns a clone with the credential replaced by a redaction marker —
    /// the shape non-admin list responses must serialize (spec §6: "non-admin
    /// list responses redact the api-key field").
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.encrypted_api_key = "***redacted***".to_string();
        copy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub owner_id: String,
    pub bot_id: String,
    pub exchange: String,
    pub encrypted_key: String,
    pub encrypted_secret: String,
    pub address: Option<String>,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub system_prompt: String,
    pub provider_id: String,
    pub mode: BotMode,
    pub active: bool,
    pub paused: bool,
    pub avatar: Option<Vec<u8>>,
    pub allowed_symbols: Option<Vec<String>>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub owner_id: String,
    pub bot_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub liquidation_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub unrealized_pnl: f64,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub opened_at: String,
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub owner_id: String,
    pub bot_id: String,
    pub position_id: Option<String>,
    pub symbol: String,
    pub side: PositionSide,
    pub action: TradeAction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub size: f64,
    pub leverage: f64,
    pub realized_pnl: f64,
    pub fee: f64,
    pub executed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub owner_id: String,
    pub bot_id: String,
    pub prompt: String,
    pub parsed_decisions: serde_json::Value,
    pub notes: Vec<String>,
    pub success: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub owner_id: String,
    pub bot_id: String,
    pub balance: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_value: f64,
    pub trade_count: u64,
    pub win_rate: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub bot_id: String,
    pub owner_id: String,
    pub text: String,
    pub summarized_count: u64,
    pub from_timestamp: String,
    pub to_timestamp: String,
    pub generated_at: String,
    pub token_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub id: String,
    pub owner_id: String,
    pub bot_id: String,
    pub provider_id: String,
    pub request_kind: RequestKind,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_minor_units: i64,
    pub model: String,
    pub latency_ms: u64,
    pub reported_to_biller: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub event_type: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub actor_user_id: String,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub timestamp: String,
}
