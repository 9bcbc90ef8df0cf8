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

/// Provider for a local server speaking newline-delimited JSON on
/// `/api/chat` (Ollama-compatible).
pub struct LocalClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl LocalClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        temperature: Option<f32>,
        stream: bool,
    ) -> serde_json::Value {
        let wire_messages: Vec<serde_json::Value> = messages.iter().map(to_wire_message).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }
        if let Some(t) = temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                // Surface connection errors distinctly — the local server
                // simply not running is the common failure here.
                if e.is_connect() || e.is_timeout() {
                    LlmError::Unavailable(e.to_string())
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "local API error");
            return Err(LlmError::Api { status, body: text });
        }
        Ok(resp)
    }
}

/// The local wire uses the same roles but carries tool-call arguments as a
/// JSON object rather than a string.
fn to_wire_message(message: &Message) -> serde_json::Value {
    let mut wire = serde_json::json!({
        "role": message.role.to_string(),
        "content": message.content.clone().unwrap_or_default(),
    });
    if let Some(calls) = &message.tool_calls {
        let wire_calls: Vec<serde_json::Value> = calls
            .iter()
            .map(|call| {
                let arguments: serde_json::Value =
                    serde_json::from_str(&call.function.arguments)
                        .unwrap_or(serde_json::Value::Null);
                serde_json::json!({
                    "function": {
                        "name": call.function.name,
                        "arguments": arguments,
                    }
                })
            })
            .collect();
        wire["tool_calls"] = serde_json::json!(wire_calls);
    }
    wire
}

/// Convert the local tool-call shape into the canonical one. Ids are
/// synthesised when the server reports none.
fn to_tool_calls(calls: Vec<WireToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| ToolCall {
            id: call.id.unwrap_or_else(|| format!("call_{i}")),
            call_type: None,
            function: FunctionCall {
                name: call.function.name,
                arguments: call.function.arguments.to_string(),
            },
        })
        .collect()
}

#[async_trait]
impl LlmClient for LocalClient {
    fn name(&self) -> &str {
        "local"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        temperature: Option<f32>,
        conversation_id: &str,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_body(messages, tools, temperature, false);
        debug!(model = %self.model, conversation_id, "sending local chat request");

        let resp = self.post(&body).await?;
        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let tool_calls = to_tool_calls(api_resp.message.tool_calls.unwrap_or_default());
        let finish_reason = if tool_calls.is_empty() {
            api_resp.done_reason.or_else(|| Some("stop".to_string()))
        } else {
            Some("tool_calls".to_string())
        };

        Ok(LlmResponse {
            choices: vec![Choice {
                message: Message {
                    role: Role::Assistant,
                    content: Some(api_resp.message.content),
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                    tool_call_id: None,
                },
                finish_reason,
            }],
            usage: Some(TokenUsage {
                prompt_tokens: api_resp.prompt_eval_count.unwrap_or(0),
                completion_tokens: api_resp.eval_count.unwrap_or(0),
                total_tokens: api_resp.prompt_eval_count.unwrap_or(0)
                    + api_resp.eval_count.unwrap_or(0),
            }),
        })
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
        debug!(model = %self.model, conversation_id = %conversation_id, "sending local streaming request");

        let resp = self.post(&body).await?;
        process_ndjson_stream(resp, tx).await;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }
}

/// Parse the newline-delimited JSON stream. Each line is a complete JSON
/// object; the final line carries `done: true` plus token counts.
async fn process_ndjson_stream(resp: reqwest::Response, tx: mpsc::Sender<ChatChunk>) {
    use futures_util::StreamExt;

    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();
    // Running index for tool calls across the whole stream — the local wire
    // has no `index` field, each call arrives complete in one line.
    let mut next_call_index = 0usize;
    let mut saw_tool_calls = false;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "local stream transport error");
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

            let parsed: StreamLine = match serde_json::from_str(line) {
                Ok(p) => p,
                Err(e) => {
                    warn!(line, error = %e, "failed to parse local stream line");
                    continue;
                }
            };

            let mut out = ChatChunk::default();

            if let Some(message) = parsed.message {
                if !message.content.is_empty() {
                    out.content = Some(message.content);
                }
                if let Some(calls) = message.tool_calls {
                    saw_tool_calls = true;
                    for call in to_tool_calls(calls) {
                        out.tool_calls.push(ToolCallDelta {
                            index: next_call_index,
                            id: Some(call.id),
                            call_type: call.call_type,
                            name: Some(call.function.name),
                            arguments: Some(call.function.arguments),
                        });
                        next_call_index += 1;
                    }
                }
            }

            if parsed.done {
                out.finish_reason = if saw_tool_calls {
                    Some("tool_calls".to_string())
                } else {
                    parsed.done_reason.or_else(|| Some("stop".to_string()))
                };
                out.usage = Some(TokenUsage {
                    prompt_tokens: parsed.prompt_eval_count.unwrap_or(0),
                    completion_tokens: parsed.eval_count.unwrap_or(0),
                    total_tokens: parsed.prompt_eval_count.unwrap_or(0)
                        + parsed.eval_count.unwrap_or(0),
                });
            }

            if tx.send(out).await.is_err() {
                return; // receiver dropped — cancelled
            }
        }

        line_buf = remainder;
    }
}

// Local API wire types.

#[derive(Deserialize)]
struct ApiResponse {
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    /// Arrives as a JSON object; re-serialised to the canonical string form.
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamLine {
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_calls_without_ids_get_synthesised_ones() {
        let calls = vec![
            WireToolCall {
                id: None,
                function: WireFunction {
                    name: "rag_search".to_string(),
                    arguments: serde_json::json!({"query": "kotlin"}),
                },
            },
            WireToolCall {
                id: Some("explicit".to_string()),
                function: WireFunction {
                    name: "get_current_time".to_string(),
                    arguments: serde_json::json!({}),
                },
            },
        ];
        let converted = to_tool_calls(calls);
        assert_eq!(converted[0].id, "call_0");
        assert_eq!(converted[1].id, "explicit");
        // Arguments become the canonical JSON string.
        assert_eq!(converted[0].function.arguments, r#"{"query":"kotlin"}"#);
    }

    #[test]
    fn assistant_tool_calls_serialise_with_object_arguments() {
        let message = Message::assistant_with_tool_calls(
            None,
            vec![ToolCall::new("t1", "rag_search", r#"{"query":"тест"}"#)],
        );
        let wire = to_wire_message(&message);
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"]["query"],
            "тест"
        );
    }
}
