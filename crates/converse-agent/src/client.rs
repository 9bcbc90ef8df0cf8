use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use converse_core::message::{Message, TokenUsage};

/// Tool definition in the provider wire shape:
/// `{type: "function", function: {name, description, parameters}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub function: FunctionSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema: object, properties, required.
    pub parameters: serde_json::Value,
}

/// One completion choice from the provider.
#[derive(Debug, Clone)]
pub struct Choice {
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// Non-streaming provider response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    /// The first choice, or `EmptyResponse` when the provider sent none.
    pub fn into_first_choice(self) -> Result<Choice, LlmError> {
        self.choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)
    }
}

/// A fragment of a streamed tool call, keyed by the provider-supplied
/// `index`. Fields arrive across several chunks; `arguments` fragments
/// concatenate.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub call_type: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One streamed chunk carrying partial delta fields.
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("provider returned no choices")]
    EmptyResponse,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Common interface for LLM providers.
///
/// Implementations must be safe to call concurrently; the whole request is
/// bounded by an outer deadline configured at construction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// One-shot chat completion.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        temperature: Option<f32>,
        conversation_id: &str,
    ) -> Result<LlmResponse, LlmError>;

    /// Stream chunks through a channel. The sequence is finite and ordered;
    /// a dropped receiver cancels the stream cooperatively.
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolSchema>,
        temperature: Option<f32>,
        conversation_id: String,
        tx: mpsc::Sender<ChatChunk>,
    ) -> Result<(), LlmError>;

    /// Cheap liveness probe; never used inside the turn loop.
    async fn health_check(&self) -> bool;
}
