// =============================================================================
// Public market data refresh
// =============================================================================
//
// Polls Binance USDT-M futures' public endpoints on `refresh_interval_ms`
// cadence to keep `MarketSnapshot` current for every bot's mark-to-market
// and prompt assembly (spec §4.8.2). Grounded on `binance::client`'s
// `reqwest::Client` builder (shared client, fixed timeout) generalized from
// signed account calls to unsigned public ticker/kline calls — no API key
// is needed or sent.

use std::time::Duration;

use reqwest::Client;
use tracing::warn;

use crate::decision_loop::MarketSnapshot;

const BASE_URL: &str = "https://fapi.binance.com";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const KLINE_LOOKBACK: u32 = 100;

pub struct MarketFeed {
    client: Client,
}

impl Default for MarketFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketFeed {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }

    /// Fetches mark price, 24h change, and recent closes for every symbol.
    /// A failure on one symbol leaves that symbol's prior values untouched
    /// rather than failing the whole refresh.
    pub async fn refresh(&self, symbols: &[String], previous: &MarketSnapshot) -> MarketSnapshot {
        let mut snapshot = previous.clone();

        for symbol in symbols {
            match self.fetch_ticker(symbol).await {
                Ok((price, change_pct)) => {
                    snapshot.prices.insert(symbol.clone(), price);
                    snapshot.change_24h_pct.insert(symbol.clone(), change_pct);
                }
                Err(err) => warn!(symbol, %err, "failed to refresh ticker"),
            }

            match self.fetch_closes(symbol).await {
                Ok(closes) => {
                    snapshot.closes_by_symbol.insert(symbol.clone(), closes);
                }
                Err(err) => warn!(symbol, %err, "failed to refresh klines"),
            }
        }

        snapshot
    }

    async fn fetch_ticker(&self, symbol: &str) -> anyhow::Result<(f64, f64)> {
        let url = format!("{BASE_URL}/fapi/v1/ticker/24hr?symbol={symbol}");
        let body: serde_json::Value = self.client.get(&url).send().await?.json().await?;
        let price = body["lastPrice"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| anyhow::anyhow!("missing lastPrice"))?;
        let change_pct = body["priceChangePercent"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok((price, change_pct))
    }

    async fn fetch_closes(&self, symbol: &str) -> anyhow::Result<Vec<f64>> {
        let url = format!("{BASE_URL}/fapi/v1/klines?symbol={symbol}&interval=5m&limit={KLINE_LOOKBACK}");
        let body: Vec<Vec<serde_json::Value>> = self.client.get(&url).send().await?.json().await?;
        let closes = body
            .iter()
            .filter_map(|candle| candle.get(4).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()))
            .collect();
        Ok(closes)
    }
}
