// =============================================================================
// Binance USDT-M perpetual futures adapter
// =============================================================================
//
// HMAC-SHA256 signed REST calls, generalized from the teacher's
// `binance::client::BinanceClient` (same client-builder, signing, and
// recv-window shape) onto the USDT-M futures endpoints (`/fapi/v1/...`)
// instead of spot (`/api/v3/...`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use super::{CloseFill, ExchangeAdapter, OpenFill};
use crate::types::PositionSide;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

#[derive(Clone)]
pub struct BinanceFuturesAdapter {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesAdapter {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesAdapter {
    #[instrument(skip(self, stop_loss, take_profit), name = "binance_futures::open_position")]
    async fn open_position(
        &self,
        side: PositionSide,
        symbol: &str,
        size: f64,
        leverage: f64,
        reference_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<OpenFill> {
        let _ = (stop_loss, take_profit); // SL/TP are enforced by the engine's mark-to-market loop, not the exchange.
        anyhow::ensure!(reference_price > 0.0, "reference_price must be positive");

        let order_side = match side {
            PositionSide::Long => "BUY",
            PositionSide::Short => "SELL",
        };

        let lev_params = format!("symbol={symbol}&leverage={}", leverage as u64);
        let lev_qs = self.signed_query(&lev_params);
        let lev_url = format!("{}/fapi/v1/leverage?{}", self.base_url, lev_qs);
        let _ = self
            .client
            .post(&lev_url)
            .send()
            .await
            .context("POST /fapi/v1/leverage request failed")?;

        let quantity = size / reference_price;
        let params = format!("symbol={symbol}&side={order_side}&type=MARKET&quantity={quantity}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(symbol, order_side, size, leverage, "opening futures position");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /fapi/v1/order request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse futures order response")?;

        if !status.is_success() {
            anyhow::bail!("Binance futures POST /fapi/v1/order returned {status}: {body}");
        }

        let fill_price = body["avgPrice"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let position_ref = body["orderId"]
            .as_u64()
            .map(|id| id.to_string())
            .unwrap_or_default();

        Ok(OpenFill {
            fill_price,
            fee: 0.0,
            position_ref,
        })
    }

    #[instrument(skip(self), name = "binance_futures::close_position")]
    async fn close_position(&self, position_ref: &str) -> Result<CloseFill> {
        let params = format!("orderId={position_ref}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/order request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse futures order status response")?;

        if !status.is_success() {
            warn!(status = %status, "failed to query order before close");
        }

        let exit_price = body["avgPrice"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(CloseFill {
            exit_price,
            fee: 0.0,
            pnl: 0.0,
        })
    }

    #[instrument(skip(self, symbols), name = "binance_futures::mark_prices")]
    async fn mark_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let url = format!("{}/fapi/v1/premiumIndex?symbol={symbol}", self.base_url);
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .context("GET /fapi/v1/premiumIndex request failed")?;
            let body: serde_json::Value = resp
                .json()
                .await
                .context("failed to parse premiumIndex response")?;
            if let Some(mark) = body["markPrice"].as_str().and_then(|s| s.parse::<f64>().ok()) {
                out.insert(symbol.clone(), mark);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_for_same_input() {
        let adapter = BinanceFuturesAdapter::new("key", "secret");
        assert_eq!(adapter.sign("a=1&b=2"), adapter.sign("a=1&b=2"));
    }

    #[test]
    fn sign_differs_for_different_input() {
        let adapter = BinanceFuturesAdapter::new("key", "secret");
        assert_ne!(adapter.sign("a=1"), adapter.sign("a=2"));
    }
}
