//! Core types for the LLM backend abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use talkdub_utils::error::LlmError;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Input to one backend invocation.
#[derive(Debug, Clone)]
pub struct LlmInvocation {
    /// Job id, for log correlation.
    pub job_id: String,
    /// Ordered conversation.
    pub messages: Vec<Message>,
    /// Wall-clock budget for this call.
    pub timeout: Duration,
    /// Ask the provider to emit a bare JSON object.
    pub json_response: bool,
}

impl LlmInvocation {
    #[must_use]
    pub fn new(job_id: impl Into<String>, messages: Vec<Message>, timeout: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            messages,
            timeout,
            json_response: false,
        }
    }

    #[must_use]
    pub fn expecting_json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

/// Result of one backend invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResult {
    /// Raw response text.
    pub content: String,
    /// Model that actually served the request.
    pub model_used: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

impl LlmResult {
    #[must_use]
    pub fn new(content: impl Into<String>, model_used: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model_used: model_used.into(),
            tokens_input: None,
            tokens_output: None,
        }
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.tokens_input.unwrap_or(0) + self.tokens_output.unwrap_or(0)
    }
}

/// Trait every LLM backend implements.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Invoke the model.
    ///
    /// # Errors
    ///
    /// Returns `LlmError` for transport failures, provider errors (auth,
    /// quota, outage), timeouts, and malformed responses.
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError>;
}
