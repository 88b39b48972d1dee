//! LLM backend abstraction for the translation pipeline.
//!
//! The pipeline talks to a trait, not a provider: [`LlmBackend`] is the
//! whole contract, and the shipped implementation is an OpenAI-compatible
//! chat-completions HTTP backend (the translation provider exposes that
//! shape). Tests substitute scripted backends.

mod chat_backend;
pub(crate) mod http_client;
mod types;

pub use chat_backend::ChatCompletionsBackend;
pub use talkdub_utils::error::LlmError;
pub use types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

use talkdub_config::Config;

/// Construct the production backend from configuration.
///
/// The API key is read from the environment variable named in the config,
/// once, here; it never appears in logs or the config snapshot.
///
/// # Errors
///
/// Returns `LlmError::Misconfiguration` when the key variable is unset or
/// the HTTP client cannot be constructed.
pub fn from_config(config: &Config) -> Result<ChatCompletionsBackend, LlmError> {
    let api_key = std::env::var(&config.llm.api_key_env).map_err(|_| {
        LlmError::Misconfiguration(format!(
            "LLM API key not found in environment variable '{}'",
            config.llm.api_key_env
        ))
    })?;

    ChatCompletionsBackend::new(
        config.llm.base_url.clone(),
        api_key,
        config.llm.model.clone(),
        config.llm.max_tokens,
        config.llm.temperature,
    )
}
