//! Shared utilities used across provider client implementations.
//!
//! Providers exposing an OpenAI-compatible HTTP surface can be wired up with
//! very little code: a tuned shared [`reqwest`] client plus
//! [`send_chat_completion`], which posts a system+user message pair to the
//! `/chat/completions` endpoint and extracts the assistant text.

use crate::neuromesh::llm_client::LLMError;
use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// The single client instance keeps TLS sessions and DNS lookups warm,
    /// which significantly reduces latency when many concurrent turns are in
    /// flight against the same provider.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Call an OpenAI-compatible Chat Completions endpoint with a system and a
/// user message, returning the assistant content string.
///
/// Posts to `{base_url}/chat/completions` with an
/// `Authorization: Bearer {api_key}` header.  Compatible with OpenAI and any
/// provider exposing the same wire format.
pub async fn send_chat_completion(
    base_url: &str,
    api_key: &str,
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    http_client: &reqwest::Client,
) -> Result<String, LLMError> {
    let body = serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": user_prompt }
        ]
    });

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let resp = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| LLMError::Http(e.to_string()))?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| LLMError::Http(e.to_string()))?;

    if !status.is_success() {
        log::error!(
            "neuromesh::clients::common::send_chat_completion(...): HTTP {} from {}: {}",
            status,
            url,
            text
        );
        return Err(LLMError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    let parsed: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| LLMError::Http(e.to_string()))?;

    let content = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());

    match content {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(LLMError::EmptyResponse),
    }
}
