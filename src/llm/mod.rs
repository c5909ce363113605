// =============================================================================
// LLM Dispatcher (C3)
// =============================================================================
//
// Provider-variant-aware HTTP client. Grounded on the `binance::client`
// pattern (a shared `reqwest::Client` built once with a timeout, one method
// per remote call) but dispatching over `ProviderVariant` request/response
// shapes instead of one fixed venue.

pub mod provider;

use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::db::models::Provider;
use crate::types::{ProviderVariant, RequestKind};

pub use provider::{DispatchError, LlmReply, TokenUsageEstimate};

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Clone)]
pub struct LlmDispatcher {
    client: Client,
}

impl Default for LlmDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmDispatcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }

    /// Calls the provider described by `provider` with `api_key` already
    /// decrypted by the caller (the Crypto Vault, just-in-time — spec §5:
    /// "never stored decrypted"). Always returns a latency measurement, even
    /// on error, so the caller can still record partial usage.
    #[instrument(skip(self, api_key, prompt), fields(variant = %provider.variant, kind = %kind))]
    pub async fn call(
        &self,
        provider: &Provider,
        api_key: &str,
        prompt: &str,
        kind: RequestKind,
    ) -> (Result<LlmReply, DispatchError>, u64) {
        let started = Instant::now();
        let result = match provider.variant {
            ProviderVariant::Openai | ProviderVariant::Grok => {
                provider::call_chat_completions_style(&self.client, provider, api_key, prompt).await
            }
            ProviderVariant::Anthropic => {
                provider::call_anthropic_messages(&self.client, provider, api_key, prompt).await
            }
            ProviderVariant::Gemini => {
                provider::call_gemini_generate_content(&self.client, provider, api_key, prompt).await
            }
            ProviderVariant::Local => provider::call_local(&self.client, provider, prompt).await,
            ProviderVariant::Custom => {
                provider::call_custom(&self.client, provider, api_key, prompt).await
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match result {
            Ok(reply) => {
                debug!(latency_ms, "llm call succeeded");
                Ok(reply)
            }
            Err(err) => {
                warn!(latency_ms, error = %err, "llm call failed");
                Err(err)
            }
        };

        (result, latency_ms)
    }
}
