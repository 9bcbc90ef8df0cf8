use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use converse_core::config::LlmConfig;
use converse_core::message::{FunctionCall, Message, Role, TokenUsage, ToolCall};

use crate::client::{
    ChatChunk, Choice, LlmClient, LlmError, LlmResponse, ToolCallDelta, ToolSchema,
};
use crate::stream::{parse_sse_line, SseParsed};

/// Provider speaking the JSON-over-HTTPS chat-completions shape with SSE
/// streaming.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    chat_path: String,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            chat_path: "/v1/chat/completions".to_string(),
        })
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        temperature: Option<f32>,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }
        if let Some(t) = temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}{}", self.base_url, self.chat_path);
        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat-completions API error");
            return Err(LlmError::Api { status, body: text });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        temperature: Option<f32>,
        conversation_id: &str,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_body(messages, tools, temperature, false);
        debug!(model = %self.model, conversation_id, "sending chat request");

        let resp = self.post(&body).await?;
        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolSchema>,
        temperature: Option<f32>,
        conversation_id: String,
        tx: mpsc::Sender<ChatChunk>,
    ) -> Result<(), LlmError> {
        let body = self.build_body(&messages, &tools, temperature, true);
        debug!(model = %self.model, conversation_id = %conversation_id, "sending streaming chat request");

        let resp = self.post(&body).await?;
        process_sse_stream(resp, tx).await;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        matches!(request.send().await, Ok(resp) if resp.status().is_success())
    }
}

fn parse_response(resp: ApiResponse) -> LlmResponse {
    let choices = resp
        .choices
        .into_iter()
        .map(|c| Choice {
            message: Message {
                role: Role::Assistant,
                content: c.message.content,
                tool_calls: c.message.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|tc| ToolCall {
                            id: tc.id,
                            call_type: tc.call_type,
                            function: FunctionCall {
                                name: tc.function.name,
                                arguments: tc.function.arguments,
                            },
                        })
                        .collect()
                }),
                tool_call_id: None,
            },
            finish_reason: c.finish_reason,
        })
        .collect();

    LlmResponse {
        choices,
        usage: resp.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

/// Parse the SSE response line by line and forward [`ChatChunk`]s.
/// `data: [DONE]` terminates the stream; a dropped receiver stops it early.
async fn process_sse_stream(resp: reqwest::Response, tx: mpsc::Sender<ChatChunk>) {
    use futures_util::StreamExt;

    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "stream transport error");
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    break 'outer;
                }

                match serde_json::from_str::<StreamChunk>(&data) {
                    Ok(parsed) => {
                        if tx.send(to_chat_chunk(parsed)).await.is_err() {
                            return; // receiver dropped — cancelled
                        }
                    }
                    Err(e) => {
                        warn!(line = %data, error = %e, "failed to parse stream chunk");
                    }
                }
            }
        }

        line_buf = remainder;
    }
}

fn to_chat_chunk(chunk: StreamChunk) -> ChatChunk {
    let mut out = ChatChunk {
        usage: chunk.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
        ..ChatChunk::default()
    };

    if let Some(choice) = chunk.choices.into_iter().next() {
        out.content = choice.delta.content;
        out.finish_reason = choice.finish_reason;
        if let Some(deltas) = choice.delta.tool_calls {
            out.tool_calls = deltas
                .into_iter()
                .map(|d| ToolCallDelta {
                    index: d.index,
                    id: d.id,
                    call_type: d.call_type,
                    name: d.function.as_ref().and_then(|f| f.name.clone()),
                    arguments: d.function.and_then(|f| f.arguments),
                })
                .collect();
        }
    }

    out
}

// Wire types for the chat-completions response shapes.

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    /// Tolerated when missing — normalised downstream by the executor.
    #[serde(rename = "type", default)]
    call_type: Option<String>,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

// Streaming chunk wire types.

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    id: Option<String>,
    #[serde(rename = "type", default)]
    call_type: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_tool_calls_parses() {
        let json = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "t1",
                        "function": {"name": "get_current_time", "arguments": "{}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let api: ApiResponse = serde_json::from_str(json).expect("parse");
        let resp = parse_response(api);

        let choice = &resp.choices[0];
        let calls = choice.message.tool_calls.as_ref().expect("calls");
        assert_eq!(calls[0].id, "t1");
        // Missing `type` stays None until the executor fills it.
        assert!(calls[0].call_type.is_none());
        assert_eq!(resp.usage.expect("usage").total_tokens, 15);
    }

    #[test]
    fn stream_chunk_maps_indexed_tool_call_fragments() {
        let json = r#"{
            "choices": [{
                "delta": {
                    "tool_calls": [{"index": 0, "id": "t1", "function": {"name": "rag_search"}}]
                },
                "finish_reason": null
            }]
        }"#;
        let parsed: StreamChunk = serde_json::from_str(json).expect("parse");
        let chunk = to_chat_chunk(parsed);
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].index, 0);
        assert_eq!(chunk.tool_calls[0].id.as_deref(), Some("t1"));
        assert_eq!(chunk.tool_calls[0].name.as_deref(), Some("rag_search"));
        assert!(chunk.tool_calls[0].arguments.is_none());
    }
}
