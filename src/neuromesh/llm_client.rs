//! Provider-agnostic LLM client contract.
//!
//! NeuroMesh talks to its language model through a single narrow seam: a
//! system prompt plus a user prompt in, assistant text out.  Everything the
//! control plane does — analysis, decisions, agent instruction loops, result
//! synthesis — is expressed through [`LLMClient::call`], which keeps the
//! concrete vendor protocol out of the orchestration core and lets tests
//! substitute scripted clients.
//!
//! # Example
//!
//! ```rust,no_run
//! use neuromesh::llm_client::LLMClient;
//! use neuromesh::clients::openai::OpenAIClient;
//!
//! # async {
//! let client = OpenAIClient::new(&std::env::var("OPENAI_API_KEY").unwrap(), "gpt-4o-mini");
//! let text = client
//!     .call("You are a helpful assistant.", "Who are you?")
//!     .await
//!     .unwrap();
//! println!("{}", text);
//! # };
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::fmt;

/// Errors surfaced by [`LLMClient`] implementations.
#[derive(Debug)]
pub enum LLMError {
    /// The API key environment variable was absent or empty.
    MissingApiKey(String),
    /// Transport-level failure before an HTTP status was obtained.
    Http(String),
    /// The provider answered with a non-success HTTP status.
    Api {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Raw response body, useful when debugging prompt or auth issues.
        body: String,
    },
    /// The provider returned a well-formed response with no assistant text.
    EmptyResponse,
}

impl fmt::Display for LLMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LLMError::MissingApiKey(var) => write!(f, "missing API key: {} is not set", var),
            LLMError::Http(msg) => write!(f, "LLM transport error: {}", msg),
            LLMError::Api { status, body } => write!(f, "LLM API error: HTTP {} — {}", status, body),
            LLMError::EmptyResponse => write!(f, "LLM returned an empty response"),
        }
    }
}

impl Error for LLMError {}

/// Trait defining the narrow contract between NeuroMesh and a hosted model.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so a single client
/// can be shared across concurrent user turns.  The contract is deliberately
/// stateless: no conversation bookkeeping happens behind this trait — the
/// engines assemble full prompts per call.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Send one system+user prompt pair and return the assistant text.
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LLMError>;

    /// Identifier of the upstream model (e.g. `"gpt-4o-mini"`), for logging.
    fn model_name(&self) -> &str;
}
