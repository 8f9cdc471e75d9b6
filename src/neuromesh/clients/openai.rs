//! OpenAI-compatible client backend.
//!
//! Implements [`LLMClient`] against any provider that speaks the OpenAI
//! Chat Completions wire format.  The default base URL targets OpenAI
//! itself; use [`OpenAIClient::new_with_base_url`] for compatible hosts.
//!
//! # Example
//!
//! ```rust,no_run
//! use neuromesh::clients::openai::OpenAIClient;
//! use neuromesh::llm_client::LLMClient;
//!
//! # async {
//! let client = OpenAIClient::from_env("gpt-4o-mini").unwrap();
//! let answer = client.call("You are terse.", "2+2?").await.unwrap();
//! # };
//! ```

use crate::neuromesh::clients::common::{get_shared_http_client, send_chat_completion};
use crate::neuromesh::llm_client::{LLMClient, LLMError};
use async_trait::async_trait;

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the provider secret.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Client for OpenAI and OpenAI-compatible chat endpoints.
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a client for the hosted OpenAI API.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, OPENAI_BASE_URL)
    }

    /// Create a client against a custom OpenAI-compatible base URL.
    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_owned(),
            model: model.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Create a client reading the secret from `OPENAI_API_KEY`.
    pub fn from_env(model: &str) -> Result<Self, LLMError> {
        match std::env::var(API_KEY_ENV) {
            Ok(ref key) if !key.is_empty() => Ok(Self::new(key, model)),
            _ => Err(LLMError::MissingApiKey(API_KEY_ENV.to_string())),
        }
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LLMError> {
        send_chat_completion(
            &self.base_url,
            &self.api_key,
            &self.model,
            system_prompt,
            user_prompt,
            get_shared_http_client(),
        )
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
