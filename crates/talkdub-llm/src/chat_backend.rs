//! OpenAI-compatible chat-completions backend.
//!
//! The translation provider exposes the standard `/chat/completions` shape;
//! this backend posts the conversation, optionally requesting a JSON-object
//! response, and extracts the first choice's content plus token usage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use talkdub_utils::error::LlmError;

use crate::http_client::HttpClient;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

/// HTTP chat-completions backend.
#[derive(Clone)]
pub struct ChatCompletionsBackend {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for ChatCompletionsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ChatCompletionsBackend {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Arc::new(HttpClient::new()?),
            base_url,
            api_key,
            model,
            max_tokens,
            temperature,
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmBackend for ChatCompletionsBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        debug!(
            job_id = %inv.job_id,
            model = %self.model,
            messages = inv.messages.len(),
            timeout_secs = inv.timeout.as_secs(),
            "invoking chat-completions backend"
        );

        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(&inv.messages),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: inv.json_response.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let request = reqwest::Client::new()
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        let response = self
            .client
            .execute_with_retry(request, inv.timeout, "chat-completions")
            .await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to parse provider response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("response has no choices".into()))?;

        if choice.message.content.is_empty() {
            return Err(LlmError::MalformedResponse(
                "response content is empty".into(),
            ));
        }

        let mut result = LlmResult::new(choice.message.content, parsed.model.unwrap_or_default());
        if let Some(usage) = parsed.usage {
            result.tokens_input = Some(usage.prompt_tokens);
            result.tokens_output = Some(usage.completion_tokens);
        }

        debug!(
            job_id = %inv.job_id,
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            "chat-completions invocation completed"
        );

        Ok(result)
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
