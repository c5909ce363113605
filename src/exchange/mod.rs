// =============================================================================
// Exchange adapter contract
// =============================================================================
//
// The Trading Engine (C6) depends only on this trait, not on any specific
// venue (spec §6: "the core depends only on this contract"). `binance.rs`
// is the one concrete implementation, generalized from the teacher's
// `binance::client::BinanceClient`.

pub mod binance;

use async_trait::async_trait;

use crate::types::PositionSide;

#[derive(Debug, Clone)]
pub struct OpenFill {
    pub fill_price: f64,
    pub fee: f64,
    pub position_ref: String,
}

#[derive(Debug, Clone)]
pub struct CloseFill {
    pub exit_price: f64,
    pub fee: f64,
    pub pnl: f64,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn open_position(
        &self,
        side: PositionSide,
        symbol: &str,
        size: f64,
        leverage: f64,
        reference_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> anyhow::Result<OpenFill>;

    async fn close_position(&self, position_ref: &str) -> anyhow::Result<CloseFill>;

    async fn mark_prices(&self, symbols: &[String]) -> anyhow::Result<std::collections::HashMap<String, f64>>;
}
