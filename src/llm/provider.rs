// Per-variant request shaping. Each `call_*` function owns the HTTP
// request/response shape for one provider family (spec §4.3's table) and
// converges on the same `LlmReply` result.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::db::models::Provider;

#[derive(Debug, Clone)]
pub struct TokenUsageEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// True when the provider response carried no usage field and the
    /// figures above were derived from `ceil(char_count / 4)`.
    pub estimated: bool,
}

#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub usage: TokenUsageEstimate,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("provider authentication rejected")]
    Auth,
    #[error("provider rate-limited the request")]
    RateLimit,
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("provider call failed: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Best-effort usage record for a failed call: billing is never silently
    /// skipped even on a 4xx/5xx (spec §4.3).
    pub fn fallback_usage(&self, prompt: &str) -> TokenUsageEstimate {
        TokenUsageEstimate {
            input_tokens: estimate_tokens(prompt),
            output_tokens: 0,
            estimated: true,
        }
    }
}

pub fn estimate_tokens(text: &str) -> u64 {
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

fn classify_status(status: StatusCode) -> Option<DispatchError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(DispatchError::Auth)
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(DispatchError::RateLimit)
    } else if status.is_client_error() || status.is_server_error() {
        Some(DispatchError::Internal(format!("http {status}")))
    } else {
        None
    }
}

fn map_reqwest_err(err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout
    } else {
        DispatchError::Internal(err.to_string())
    }
}

/// openai / grok: POST chat/completions-style, Bearer auth,
/// `usage.prompt_tokens` / `completion_tokens`.
pub async fn call_chat_completions_style(
    client: &Client,
    provider: &Provider,
    api_key: &str,
    prompt: &str,
) -> Result<LlmReply, DispatchError> {
    let body = json!({
        "model": provider.model_name,
        "messages": [{"role": "user", "content": prompt}],
    });

    let resp = client
        .post(&provider.endpoint_url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(map_reqwest_err)?;

    let status = resp.status();
    if let Some(err) = classify_status(status) {
        return Err(err);
    }
    let parsed: Value = resp
        .json()
        .await
        .map_err(|e| DispatchError::MalformedResponse(e.to_string()))?;

    let text = parsed["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| DispatchError::MalformedResponse("missing choices[0].message.content".into()))?
        .to_string();

    let usage = match (
        parsed["usage"]["prompt_tokens"].as_u64(),
        parsed["usage"]["completion_tokens"].as_u64(),
    ) {
        (Some(input), Some(output)) => TokenUsageEstimate {
            input_tokens: input,
            output_tokens: output,
            estimated: false,
        },
        _ => TokenUsageEstimate {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text),
            estimated: true,
        },
    };

    Ok(LlmReply { text, usage })
}

/// anthropic: POST messages-style, `x-api-key` header + `anthropic-version`,
/// `usage.input_tokens` / `output_tokens`.
pub async fn call_anthropic_messages(
    client: &Client,
    provider: &Provider,
    api_key: &str,
    prompt: &str,
) -> Result<LlmReply, DispatchError> {
    let body = json!({
        "model": provider.model_name,
        "max_tokens": 4096,
        "messages": [{"role": "user", "content": prompt}],
    });

    let resp = client
        .post(&provider.endpoint_url)
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .json(&body)
        .send()
        .await
        .map_err(map_reqwest_err)?;

    let status = resp.status();
    if let Some(err) = classify_status(status) {
        return Err(err);
    }
    let parsed: Value = resp
        .json()
        .await
        .map_err(|e| DispatchError::MalformedResponse(e.to_string()))?;

    let text = parsed["content"][0]["text"]
        .as_str()
        .ok_or_else(|| DispatchError::MalformedResponse("missing content[0].text".into()))?
        .to_string();

    let usage = match (
        parsed["usage"]["input_tokens"].as_u64(),
        parsed["usage"]["output_tokens"].as_u64(),
    ) {
        (Some(input), Some(output)) => TokenUsageEstimate {
            input_tokens: input,
            output_tokens: output,
            estimated: false,
        },
        _ => TokenUsageEstimate {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text),
            estimated: true,
        },
    };

    Ok(LlmReply { text, usage })
}

/// gemini: POST generateContent with the key as a query-string parameter;
/// usage is often absent, so estimation is the common path.
pub async fn call_gemini_generate_content(
    client: &Client,
    provider: &Provider,
    api_key: &str,
    prompt: &str,
) -> Result<LlmReply, DispatchError> {
    let body = json!({
        "contents": [{"parts": [{"text": prompt}]}],
    });

    let url = format!(
        "{}{}key={}",
        provider.endpoint_url,
        if provider.endpoint_url.contains('?') { "&" } else { "?" },
        api_key
    );

    let resp = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(map_reqwest_err)?;

    let status = resp.status();
    if let Some(err) = classify_status(status) {
        return Err(err);
    }
    let parsed: Value = resp
        .json()
        .await
        .map_err(|e| DispatchError::MalformedResponse(e.to_string()))?;

    let text = parsed["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| {
            DispatchError::MalformedResponse("missing candidates[0].content.parts[0].text".into())
        })?
        .to_string();

    let usage = match (
        parsed["usageMetadata"]["promptTokenCount"].as_u64(),
        parsed["usageMetadata"]["candidatesTokenCount"].as_u64(),
    ) {
        (Some(input), Some(output)) => TokenUsageEstimate {
            input_tokens: input,
            output_tokens: output,
            estimated: false,
        },
        _ => TokenUsageEstimate {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text),
            estimated: true,
        },
    };

    Ok(LlmReply { text, usage })
}

/// local: POST to a locally hosted URL, no auth; usage estimated.
pub async fn call_local(
    client: &Client,
    provider: &Provider,
    prompt: &str,
) -> Result<LlmReply, DispatchError> {
    let body = json!({
        "model": provider.model_name,
        "messages": [{"role": "user", "content": prompt}],
    });

    let resp = client
        .post(&provider.endpoint_url)
        .json(&body)
        .send()
        .await
        .map_err(map_reqwest_err)?;

    let status = resp.status();
    if let Some(err) = classify_status(status) {
        return Err(err);
    }
    let parsed: Value = resp
        .json()
        .await
        .map_err(|e| DispatchError::MalformedResponse(e.to_string()))?;

    let text = parsed["choices"][0]["message"]["content"]
        .as_str()
        .or_else(|| parsed["response"].as_str())
        .ok_or_else(|| DispatchError::MalformedResponse("unrecognized local response shape".into()))?
        .to_string();

    Ok(LlmReply {
        text: text.clone(),
        usage: TokenUsageEstimate {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text),
            estimated: true,
        },
    })
}

/// custom: a configurable map over one of the above shapes. `provider.config`
/// names which of the four wire shapes to use under `"wire_shape"` (one of
/// `"chat_completions"`, `"anthropic"`, `"gemini"`, `"local"`), defaulting to
/// `"chat_completions"` when unset.
pub async fn call_custom(
    client: &Client,
    provider: &Provider,
    api_key: &str,
    prompt: &str,
) -> Result<LlmReply, DispatchError> {
    match provider.config.get("wire_shape").and_then(Value::as_str) {
        Some("anthropic") => call_anthropic_messages(client, provider, api_key, prompt).await,
        Some("gemini") => call_gemini_generate_content(client, provider, api_key, prompt).await,
        Some("local") => call_local(client, provider, prompt).await,
        _ => call_chat_completions_style(client, provider, api_key, prompt).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn classify_status_auth() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED), Some(DispatchError::Auth)));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN), Some(DispatchError::Auth)));
    }

    #[test]
    fn classify_status_rate_limit() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(DispatchError::RateLimit)
        ));
    }

    #[test]
    fn classify_status_ok_is_none() {
        assert!(classify_status(StatusCode::OK).is_none());
    }

    #[test]
    fn fallback_usage_marks_estimated_and_zero_output() {
        let err = DispatchError::Auth;
        let usage = err.fallback_usage("hello world");
        assert!(usage.estimated);
        assert_eq!(usage.output_tokens, 0);
        assert!(usage.input_tokens > 0);
    }
}
