//! The agent loop: settings reconciliation, prompt construction, the bounded
//! tool-call alternation, and the streaming variant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use converse_core::conversation::{CollectionSettings, CompressionSettings, ResponseFormat};
use converse_core::message::{Message, TokenUsage, ToolCall};
use converse_store::{ConversationRepository, StoreError};

use crate::client::{ChatChunk, LlmClient, LlmError};
use crate::compress::{CompressionStats, HistoryCompressor};
use crate::executor::ToolExecutor;
use crate::prompt::PromptBuilder;
use crate::stream::{StreamEvent, ToolCallAssembler};
use crate::tools::ToolRegistry;

/// Synthetic user message that forces a terminal answer once the iteration
/// cap is hit; the accompanying LLM call carries an empty tool set.
const FORCE_FINAL_PROMPT: &str = "Подведи итог: сформулируй окончательный ответ по уже \
     собранной информации, не вызывая инструменты.";

const ITERATION_CAP_NOTICE: &str =
    "Достигнут лимит вызовов инструментов, формирую итоговый ответ";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One client turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub collection_settings: Option<CollectionSettings>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub compression_settings: Option<CompressionSettings>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            response_format: None,
            collection_settings: None,
            temperature: None,
            compression_settings: None,
        }
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// The completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub conversation_id: String,
    /// The first tool call of the turn, surfaced for the client UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_stats: Option<CompressionStats>,
}

/// Orchestrates turns against the LLM, the repository, and the tool system.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    repository: Arc<dyn ConversationRepository>,
    executor: ToolExecutor,
    compressor: HistoryCompressor,
    max_tool_iterations: usize,
}

struct TurnSetup {
    compression_stats: Option<CompressionStats>,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        repository: Arc<dyn ConversationRepository>,
        registry: Arc<ToolRegistry>,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            compressor: HistoryCompressor::new(Arc::clone(&llm)),
            executor: ToolExecutor::new(registry),
            llm,
            repository,
            max_tool_iterations: max_tool_iterations.max(1),
        }
    }

    pub fn repository(&self) -> Arc<dyn ConversationRepository> {
        Arc::clone(&self.repository)
    }

    async fn resolve_conversation_id(&self, request: &ChatRequest) -> Result<String, AgentError> {
        match &request.conversation_id {
            Some(id) if !id.is_empty() => Ok(id.clone()),
            _ => Ok(self.repository.create_conversation(None).await?),
        }
    }

    /// Steps 1-5 of the turn: reconcile settings, build the prompt, init or
    /// refresh the conversation, run the compression check, append the user
    /// message.
    ///
    /// Compression runs before the user turn lands so the kept recent window
    /// holds completed dialogue pairs.
    async fn prepare_turn(
        &self,
        request: &ChatRequest,
        conversation_id: &str,
    ) -> Result<TurnSetup, AgentError> {
        let prev_format = self.repository.get_format(conversation_id).await?;
        let prev_collection = self
            .repository
            .get_collection_settings(conversation_id)
            .await?;

        let format = request.response_format.unwrap_or(prev_format);
        let collection = request
            .collection_settings
            .clone()
            .unwrap_or_else(|| prev_collection.clone());
        let settings_changed = format != prev_format || collection != prev_collection;

        self.repository.set_format(conversation_id, format).await?;
        self.repository
            .set_collection_settings(conversation_id, collection.clone())
            .await?;
        if let Some(compression) = &request.compression_settings {
            self.repository
                .set_compression_settings(conversation_id, compression.clone())
                .await?;
        }

        let system_prompt = PromptBuilder::build(format, Some(&collection));
        if self.repository.message_count(conversation_id).await? == 0 {
            self.repository
                .init_conversation(conversation_id, &system_prompt)
                .await?;
        } else if settings_changed {
            self.repository
                .update_system_prompt(conversation_id, &system_prompt)
                .await?;
        }

        let mut compression_stats = None;
        let compression = self
            .repository
            .get_compression_settings(conversation_id)
            .await?;
        if compression.enabled {
            let history = self.repository.get_history(conversation_id).await?;
            if self.compressor.needs_compression(&history, &compression) {
                let (new_history, result) = self
                    .compressor
                    .compress(&history, conversation_id, &compression)
                    .await;
                if result.compressed && new_history.len() <= history.len() {
                    self.repository
                        .replace_history(conversation_id, new_history)
                        .await?;
                    compression_stats = self.compressor.stats(conversation_id);
                }
            }
        }

        self.repository
            .add_message(conversation_id, Message::user(&request.message))
            .await?;

        Ok(TurnSetup { compression_stats })
    }

    /// Non-streaming turn.
    ///
    /// LLM failures abort the turn; repository mutations already applied are
    /// not rolled back. Tool failures feed back into the loop as error
    /// strings.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AgentError> {
        let conversation_id = self.resolve_conversation_id(&request).await?;
        let setup = self.prepare_turn(&request, &conversation_id).await?;

        let tools = self.executor.registry().schemas();
        let mut usage = TokenUsage::default();
        let mut recorded_tool_call: Option<ToolCall> = None;
        let mut iterations = 0usize;

        let mut history = self.repository.get_history(&conversation_id).await?;
        let mut response = self
            .llm
            .chat(&history, &tools, request.temperature, &conversation_id)
            .await?;
        if let Some(u) = &response.usage {
            usage.add(u);
        }

        let final_message = loop {
            let choice = response.into_first_choice()?;
            let message = choice.message;
            let calls = message.tool_calls.clone().unwrap_or_default();

            if calls.is_empty() {
                break message;
            }

            if iterations >= self.max_tool_iterations {
                warn!(
                    conversation_id = %conversation_id,
                    iterations,
                    "tool iteration cap reached, forcing terminal answer"
                );
                self.repository
                    .add_message(&conversation_id, Message::user(FORCE_FINAL_PROMPT))
                    .await?;
                history = self.repository.get_history(&conversation_id).await?;
                let forced = self
                    .llm
                    .chat(&history, &[], request.temperature, &conversation_id)
                    .await?;
                if let Some(u) = &forced.usage {
                    usage.add(u);
                }
                break forced.into_first_choice()?.message;
            }

            let calls = self.executor.fix_tool_calls(calls);
            if recorded_tool_call.is_none() {
                // The client surface shows a single tool call per turn — the
                // first one (a product choice, not a correctness rule).
                recorded_tool_call = calls.first().cloned();
            }

            self.repository
                .add_message(
                    &conversation_id,
                    Message::assistant_with_tool_calls(message.content.clone(), calls.clone()),
                )
                .await?;

            let results = self
                .executor
                .execute_tool_calls(&calls, &conversation_id)
                .await;
            self.repository
                .add_messages(&conversation_id, results)
                .await?;

            history = self.repository.get_history(&conversation_id).await?;
            response = self
                .llm
                .chat(&history, &tools, request.temperature, &conversation_id)
                .await?;
            if let Some(u) = &response.usage {
                usage.add(u);
            }
            iterations += 1;
        };

        let content = final_message.content.unwrap_or_default();
        self.repository
            .add_message(&conversation_id, Message::assistant(&content))
            .await?;

        info!(
            conversation_id = %conversation_id,
            iterations,
            total_tokens = usage.total_tokens,
            "turn complete"
        );

        Ok(ChatResponse {
            message: content,
            conversation_id,
            tool_call: recorded_tool_call,
            token_usage: Some(usage),
            compression_stats: setup.compression_stats,
        })
    }

    /// Streaming turn. Events arrive strictly in production order; `DONE` is
    /// last unless an `ERROR` terminated the turn. Dropping the receiver
    /// cancels cooperatively — the in-flight LLM stream stops at the next
    /// chunk and unexecuted tool calls stay unexecuted.
    pub async fn chat_stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), AgentError> {
        let conversation_id = self.resolve_conversation_id(&request).await?;
        let message_id = Uuid::new_v4().to_string();

        match self
            .run_stream(&request, &conversation_id, &message_id, &tx)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "streaming turn failed");
                let _ = tx
                    .send(StreamEvent::error(
                        &conversation_id,
                        &message_id,
                        e.to_string(),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_stream(
        &self,
        request: &ChatRequest,
        conversation_id: &str,
        message_id: &str,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), AgentError> {
        if tx
            .send(StreamEvent::start(conversation_id, message_id))
            .await
            .is_err()
        {
            return Ok(());
        }

        self.prepare_turn(request, conversation_id).await?;

        let tools = self.executor.registry().schemas();
        let mut iterations = 0usize;
        let mut forced = false;

        loop {
            let history = self.repository.get_history(conversation_id).await?;
            let effective_tools = if forced { Vec::new() } else { tools.clone() };

            let (chunk_tx, mut chunk_rx) = mpsc::channel::<ChatChunk>(64);
            let llm = Arc::clone(&self.llm);
            let conv = conversation_id.to_string();
            let temperature = request.temperature;
            let producer = tokio::spawn(async move {
                llm.chat_stream(history, effective_tools, temperature, conv, chunk_tx)
                    .await
            });

            let mut content_buf = String::new();
            let mut assembler = ToolCallAssembler::new();

            while let Some(chunk) = chunk_rx.recv().await {
                if let Some(text) = &chunk.content {
                    if !text.is_empty() {
                        content_buf.push_str(text);
                        if tx
                            .send(StreamEvent::content(conversation_id, message_id, text.clone()))
                            .await
                            .is_err()
                        {
                            producer.abort();
                            return Ok(());
                        }
                    }
                }
                for delta in &chunk.tool_calls {
                    assembler.apply(delta);
                }
            }

            match producer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(AgentError::Llm(e)),
                Err(e) => return Err(AgentError::Internal(e.to_string())),
            }

            let calls = if forced { Vec::new() } else { assembler.finish() };

            // Terminal: no surviving tool calls — append the text and finish.
            if calls.is_empty() {
                if !content_buf.is_empty() {
                    self.repository
                        .add_message(conversation_id, Message::assistant(&content_buf))
                        .await?;
                }
                let _ = tx
                    .send(StreamEvent::done(conversation_id, message_id))
                    .await;
                info!(conversation_id = %conversation_id, iterations, "streaming turn complete");
                return Ok(());
            }

            // Iteration cap: one final tool-less stream produces the answer.
            if iterations >= self.max_tool_iterations {
                warn!(
                    conversation_id = %conversation_id,
                    iterations,
                    "tool iteration cap reached in stream, forcing terminal answer"
                );
                if tx
                    .send(StreamEvent::processing(
                        conversation_id,
                        message_id,
                        ITERATION_CAP_NOTICE,
                    ))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                self.repository
                    .add_message(conversation_id, Message::user(FORCE_FINAL_PROMPT))
                    .await?;
                forced = true;
                continue;
            }

            let calls = self.executor.fix_tool_calls(calls);
            let content = if content_buf.is_empty() {
                None
            } else {
                Some(content_buf.clone())
            };
            self.repository
                .add_message(
                    conversation_id,
                    Message::assistant_with_tool_calls(content, calls.clone()),
                )
                .await?;

            for call in &calls {
                // The send result gates execution: a cancelled consumer must
                // not trigger the remaining tool calls.
                if tx
                    .send(StreamEvent::tool_call(
                        conversation_id,
                        message_id,
                        call.clone(),
                    ))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                if tx
                    .send(StreamEvent::processing(
                        conversation_id,
                        message_id,
                        format!("Выполняется: {}", call.function.name),
                    ))
                    .await
                    .is_err()
                {
                    return Ok(());
                }

                let result = self.executor.execute_tool_call(call, conversation_id).await;
                let result_text = result.content.clone().unwrap_or_default();
                self.repository
                    .add_message(conversation_id, result)
                    .await?;

                if tx
                    .send(StreamEvent::tool_result(
                        conversation_id,
                        message_id,
                        result_text,
                    ))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }

            iterations += 1;
        }
    }
}
