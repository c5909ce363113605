// =============================================================================
// Runtime Settings — the process-level settings map from spec §6, hot
// reloadable and persisted with an atomic write
// =============================================================================
//
// Every tunable parameter the scheduler/engine needs lives here so the engine
// can be reconfigured without a restart. Persistence uses the teacher's
// atomic tmp + rename pattern to prevent corruption on crash. Every field
// carries a `#[serde(default = "...")]` so that adding new settings never
// breaks loading an older settings file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_paper_bot_initial_balance() -> f64 {
    10_000.0
}

fn default_live_bot_initial_balance() -> f64 {
    0.0
}

fn default_turn_interval_ms() -> u64 {
    60_000
}

fn default_refresh_interval_ms() -> u64 {
    5_000
}

fn default_minimum_trade_size_usd() -> f64 {
    10.0
}

fn default_symbol_cooldown_ms() -> u64 {
    5 * 60_000
}

fn default_minimum_position_duration_ms() -> u64 {
    30_000
}

fn default_trading_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
    ]
}

fn default_max_bots() -> u32 {
    100
}

fn default_max_positions_per_bot() -> u32 {
    3
}

fn default_data_retention_days() -> u32 {
    90
}

fn default_session_timeout_hours() -> u32 {
    24
}

fn default_summary_token_budget() -> u32 {
    25_000
}

fn default_summary_min_new_decisions() -> u32 {
    10
}

fn default_entry_fee_rate() -> f64 {
    0.0003
}

fn default_exit_fee_rate() -> f64 {
    0.0003
}

fn default_maintenance_margin_rate() -> f64 {
    0.005
}

/// The enumerated settings map of spec §6. Unrecognized keys sent to
/// `PUT /settings/:key` are rejected by the API layer (spec §9 design note);
/// this struct is the full, closed set of keys the system understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_paper_bot_initial_balance")]
    pub paper_bot_initial_balance: f64,

    #[serde(default = "default_live_bot_initial_balance")]
    pub live_bot_initial_balance: f64,

    #[serde(default = "default_turn_interval_ms")]
    pub turn_interval_ms: u64,

    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    #[serde(default = "default_minimum_trade_size_usd")]
    pub minimum_trade_size_usd: f64,

    #[serde(default = "default_symbol_cooldown_ms")]
    pub symbol_cooldown_ms: u64,

    #[serde(default = "default_minimum_position_duration_ms")]
    pub minimum_position_duration_ms: u64,

    #[serde(default = "default_trading_symbols")]
    pub trading_symbols: Vec<String>,

    #[serde(default = "default_max_bots")]
    pub max_bots: u32,

    #[serde(default = "default_max_positions_per_bot")]
    pub max_positions_per_bot: u32,

    #[serde(default = "default_data_retention_days")]
    pub data_retention_days: u32,

    #[serde(default = "default_session_timeout_hours")]
    pub session_timeout_hours: u32,

    #[serde(default = "default_summary_token_budget")]
    pub summary_token_budget: u32,

    #[serde(default = "default_summary_min_new_decisions")]
    pub summary_min_new_decisions: u32,

    #[serde(default = "default_entry_fee_rate")]
    pub entry_fee_rate: f64,

    #[serde(default = "default_exit_fee_rate")]
    pub exit_fee_rate: f64,

    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paper_bot_initial_balance: default_paper_bot_initial_balance(),
            live_bot_initial_balance: default_live_bot_initial_balance(),
            turn_interval_ms: default_turn_interval_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
            minimum_trade_size_usd: default_minimum_trade_size_usd(),
            symbol_cooldown_ms: default_symbol_cooldown_ms(),
            minimum_position_duration_ms: default_minimum_position_duration_ms(),
            trading_symbols: default_trading_symbols(),
            max_bots: default_max_bots(),
            max_positions_per_bot: default_max_positions_per_bot(),
            data_retention_days: default_data_retention_days(),
            session_timeout_hours: default_session_timeout_hours(),
            summary_token_budget: default_summary_token_budget(),
            summary_min_new_decisions: default_summary_min_new_decisions(),
            entry_fee_rate: default_entry_fee_rate(),
            exit_fee_rate: default_exit_fee_rate(),
            maintenance_margin_rate: default_maintenance_margin_rate(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file at `path`, falling back to defaults if
    /// the file is absent (the caller logs the fallback).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;
        info!(path = %path.display(), "runtime settings loaded");
        Ok(settings)
    }

    /// Persist settings to `path` using an atomic write (write to `.tmp`,
    /// then rename) — prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "runtime settings saved (atomic)");
        Ok(())
    }

    /// Recognized setting keys, used to reject unknown keys on `PUT
    /// /settings/:key` (spec §9: "unrecognized keys are rejected on write").
    pub fn known_keys() -> &'static [&'static str] {
        &[
            "paper_bot_initial_balance",
            "live_bot_initial_balance",
            "turn_interval_ms",
            "refresh_interval_ms",
            "minimum_trade_size_usd",
            "symbol_cooldown_ms",
            "minimum_position_duration_ms",
            "trading_symbols",
            "max_bots",
            "max_positions_per_bot",
            "data_retention_days",
            "session_timeout_hours",
            "summary_token_budget",
            "summary_min_new_decisions",
            "entry_fee_rate",
            "exit_fee_rate",
            "maintenance_margin_rate",
        ]
    }

    /// Apply a single key/value update, returning an error for unknown keys
    /// or mistyped values.
    pub fn set_key(&mut self, key: &str, value: serde_json::Value) -> Result<(), String> {
        let mut as_map = serde_json::to_value(&self).map_err(|e| e.to_string())?;
        {
            let obj = as_map.as_object_mut().expect("Settings serializes to an object");
            if !obj.contains_key(key) {
                return Err(format!("unrecognized setting key: {key}"));
            }
            obj.insert(key.to_string(), value);
        }
        *self = serde_json::from_value(as_map).map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Process-level bootstrap configuration, read from the environment at
/// start-up (teacher's `main.rs` env-lookup-with-fallback pattern).
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub settings_path: String,
    pub jwt_secret: String,
    pub vault_master_key: String,
    pub cors_origins: Vec<String>,
}

impl ProcessConfig {
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let db_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "arena.db".to_string());
        let settings_path =
            std::env::var("SETTINGS_PATH").unwrap_or_else(|_| "settings.json".to_string());
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using an insecure development default");
            "dev-insecure-jwt-secret".to_string()
        });
        let vault_master_key = std::env::var("VAULT_MASTER_KEY").unwrap_or_else(|_| {
            tracing::warn!("VAULT_MASTER_KEY not set, using an insecure development default");
            "dev-insecure-vault-master-key-32b".to_string()
        });
        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Self {
            bind_addr,
            db_path,
            settings_path,
            jwt_secret,
            vault_master_key,
            cors_origins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_expected_values() {
        let s = Settings::default();
        assert_eq!(s.paper_bot_initial_balance, 10_000.0);
        assert_eq!(s.trading_symbols.len(), 5);
        assert_eq!(s.summary_token_budget, 25_000);
        assert_eq!(s.summary_min_new_decisions, 10);
        assert!((s.entry_fee_rate - 0.0003).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.max_bots, 100);
        assert_eq!(s.symbol_cooldown_ms, 300_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "turn_interval_ms": 30000 }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.turn_interval_ms, 30_000);
        assert_eq!(s.refresh_interval_ms, 5_000);
    }

    #[test]
    fn set_key_rejects_unknown_key() {
        let mut s = Settings::default();
        let err = s.set_key("not_a_real_key", serde_json::json!(1)).unwrap_err();
        assert!(err.contains("unrecognized"));
    }

    #[test]
    fn set_key_updates_recognized_key() {
        let mut s = Settings::default();
        s.set_key("turn_interval_ms", serde_json::json!(15000)).unwrap();
        assert_eq!(s.turn_interval_ms, 15000);
    }

    #[test]
    fn roundtrip_serialisation() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let s2: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s.trading_symbols, s2.trading_symbols);
        assert_eq!(s.max_bots, s2.max_bots);
    }
}
