//! Scripted LLM stub driving the agent-loop scenarios.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use converse_agent::client::{
    ChatChunk, Choice, LlmClient, LlmError, LlmResponse, ToolCallDelta, ToolSchema,
};
use converse_core::message::{Message, TokenUsage, ToolCall};

/// Install the test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn assistant_response(text: &str) -> LlmResponse {
    LlmResponse {
        choices: vec![Choice {
            message: Message::assistant(text),
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

pub fn tool_call_response(id: &str, name: &str, arguments: &str) -> LlmResponse {
    let mut call = ToolCall::new(id, name, arguments);
    // Providers sometimes omit the type; the executor must fill it.
    call.call_type = None;
    LlmResponse {
        choices: vec![Choice {
            message: Message::assistant_with_tool_calls(None, vec![call]),
            finish_reason: Some("tool_calls".to_string()),
        }],
        usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

pub fn content_chunk(text: &str) -> ChatChunk {
    ChatChunk {
        content: Some(text.to_string()),
        ..ChatChunk::default()
    }
}

pub fn tool_delta(
    index: usize,
    id: Option<&str>,
    name: Option<&str>,
    arguments: Option<&str>,
) -> ChatChunk {
    ChatChunk {
        tool_calls: vec![ToolCallDelta {
            index,
            id: id.map(String::from),
            call_type: None,
            name: name.map(String::from),
            arguments: arguments.map(String::from),
        }],
        ..ChatChunk::default()
    }
}

pub fn finish_chunk(reason: &str) -> ChatChunk {
    ChatChunk {
        finish_reason: Some(reason.to_string()),
        ..ChatChunk::default()
    }
}

/// Scripted provider. Responses and stream scripts pop in order; when a
/// script runs dry the stub answers with plain content. In looping mode it
/// emits a fresh tool call on every call that carries a non-empty tool set —
/// the shape the iteration-cap scenarios need.
pub struct StubLlm {
    chat_script: Mutex<VecDeque<LlmResponse>>,
    stream_script: Mutex<VecDeque<Vec<ChatChunk>>>,
    loop_tool: Option<String>,
    pub chat_calls: AtomicUsize,
    call_counter: AtomicUsize,
}

impl StubLlm {
    pub fn scripted(responses: Vec<LlmResponse>) -> Self {
        Self {
            chat_script: Mutex::new(responses.into()),
            stream_script: Mutex::new(VecDeque::new()),
            loop_tool: None,
            chat_calls: AtomicUsize::new(0),
            call_counter: AtomicUsize::new(0),
        }
    }

    pub fn with_streams(streams: Vec<Vec<ChatChunk>>) -> Self {
        Self {
            chat_script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(streams.into()),
            loop_tool: None,
            chat_calls: AtomicUsize::new(0),
            call_counter: AtomicUsize::new(0),
        }
    }

    /// Always request `tool_name` while tools are offered.
    pub fn looping(tool_name: &str) -> Self {
        Self {
            chat_script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(VecDeque::new()),
            loop_tool: Some(tool_name.to_string()),
            chat_calls: AtomicUsize::new(0),
            call_counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }

    async fn chat(
        &self,
        _messages: &[Message],
        tools: &[ToolSchema],
        _temperature: Option<f32>,
        _conversation_id: &str,
    ) -> Result<LlmResponse, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(tool_name) = &self.loop_tool {
            if !tools.is_empty() {
                let n = self.call_counter.fetch_add(1, Ordering::SeqCst);
                return Ok(tool_call_response(&format!("t{n}"), tool_name, "{}"));
            }
            return Ok(assistant_response("Готово"));
        }

        let next = self.chat_script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| assistant_response("Готово")))
    }

    async fn chat_stream(
        &self,
        _messages: Vec<Message>,
        tools: Vec<ToolSchema>,
        _temperature: Option<f32>,
        _conversation_id: String,
        tx: mpsc::Sender<ChatChunk>,
    ) -> Result<(), LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);

        let chunks: Vec<ChatChunk> = if let Some(tool_name) = &self.loop_tool {
            if !tools.is_empty() {
                let n = self.call_counter.fetch_add(1, Ordering::SeqCst);
                vec![
                    tool_delta(0, Some(&format!("t{n}")), Some(tool_name), Some("{}")),
                    finish_chunk("tool_calls"),
                ]
            } else {
                vec![content_chunk("Финальный ответ"), finish_chunk("stop")]
            }
        } else {
            let next = self.stream_script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| vec![content_chunk("Готово"), finish_chunk("stop")])
        };

        for chunk in chunks {
            if tx.send(chunk).await.is_err() {
                return Ok(()); // receiver dropped — cancelled
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
