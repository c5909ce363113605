// =============================================================================
// Shared types used across the bot-arena engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A user's role in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Moderator,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
            Self::Moderator => write!(f, "moderator"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "moderator" => Ok(Self::Moderator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The LLM provider variant, governing request shaping in the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderVariant {
    Openai,
    Anthropic,
    Gemini,
    Grok,
    Local,
    Custom,
}

impl std::fmt::Display for ProviderVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
            Self::Local => "local",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProviderVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::Openai),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "grok" => Ok(Self::Grok),
            "local" => Ok(Self::Local),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown provider variant: {other}")),
        }
    }
}

/// Whether a bot trades against the in-process paper ledger or a live exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    Paper,
    Real,
}

impl Default for BotMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Real => write!(f, "real"),
        }
    }
}

impl std::str::FromStr for BotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paper" => Ok(Self::Paper),
            "real" => Ok(Self::Real),
            other => Err(format!("unknown bot mode: {other}")),
        }
    }
}

/// Long or short exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1.0 for LONG, -1.0 for SHORT — the sign convention used throughout
    /// the trading engine's pnl formulas.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Lifecycle status of a Position row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a position was closed — distinguishes an ordinary close from a forced
/// one without needing a separate status value (spec §4.6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    StopLoss,
    TakeProfit,
    Liquidated,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::Liquidated => "liquidated",
        };
        write!(f, "{s}")
    }
}

/// Whether a Trade row records the opening or closing leg of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Open,
    Close,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// One action the LLM may emit per decision cycle (spec §4.7.1 tool/action
/// schema). `Analyze` is not a trading action; it is resolved locally by the
/// decision loop's tool iteration before any trade is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum ProposedAction {
    Long {
        symbol: String,
        size: f64,
        leverage: f64,
        #[serde(default, rename = "stopLoss")]
        stop_loss: Option<f64>,
        #[serde(default, rename = "takeProfit")]
        take_profit: Option<f64>,
    },
    Short {
        symbol: String,
        size: f64,
        leverage: f64,
        #[serde(default, rename = "stopLoss")]
        stop_loss: Option<f64>,
        #[serde(default, rename = "takeProfit")]
        take_profit: Option<f64>,
    },
    Close {
        #[serde(rename = "positionId")]
        position_id: String,
    },
    Hold,
    Analyze {
        tool: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
}

impl ProposedAction {
    pub fn is_analyze(&self) -> bool {
        matches!(self, Self::Analyze { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Long { .. } => "LONG",
            Self::Short { .. } => "SHORT",
            Self::Close { .. } => "CLOSE",
            Self::Hold => "HOLD",
            Self::Analyze { .. } => "ANALYZE",
        }
    }
}

/// What a TokenUsage row was spent on (spec §3 TokenUsage.request kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Decision,
    Summary,
    Sandbox,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decision => write!(f, "decision"),
            Self::Summary => write!(f, "summary"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

/// Leaderboard aggregation window (spec §4.10 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardPeriod {
    Daily,
    Weekly,
    Monthly,
    AllTime,
}

impl std::fmt::Display for LeaderboardPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::AllTime => write!(f, "all-time"),
        }
    }
}

impl std::str::FromStr for LeaderboardPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "all-time" | "all_time" | "alltime" => Ok(Self::AllTime),
            other => Err(format!("unknown leaderboard period: {other}")),
        }
    }
}

/// Balance snapshot for a single asset from an exchange adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}
