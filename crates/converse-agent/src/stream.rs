use std::collections::BTreeMap;

use serde::Serialize;

use converse_core::message::ToolCall;

use crate::client::ToolCallDelta;

/// Event kinds emitted by the streaming agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEventKind {
    Start,
    Content,
    Processing,
    ToolCall,
    ToolResult,
    Done,
    Error,
}

/// One client-visible stream event. Serialises to the SSE payload shape:
/// `{type, conversationId, messageId, content?, toolCall?, toolResult?, error?}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event: StreamEventKind,
    pub conversation_id: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamEvent {
    fn base(event: StreamEventKind, conversation_id: &str, message_id: &str) -> Self {
        Self {
            event,
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            content: None,
            tool_call: None,
            tool_result: None,
            error: None,
        }
    }

    pub fn start(conversation_id: &str, message_id: &str) -> Self {
        Self::base(StreamEventKind::Start, conversation_id, message_id)
    }

    pub fn content(conversation_id: &str, message_id: &str, delta: impl Into<String>) -> Self {
        Self {
            content: Some(delta.into()),
            ..Self::base(StreamEventKind::Content, conversation_id, message_id)
        }
    }

    pub fn processing(conversation_id: &str, message_id: &str, notice: impl Into<String>) -> Self {
        Self {
            content: Some(notice.into()),
            ..Self::base(StreamEventKind::Processing, conversation_id, message_id)
        }
    }

    pub fn tool_call(conversation_id: &str, message_id: &str, call: ToolCall) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::base(StreamEventKind::ToolCall, conversation_id, message_id)
        }
    }

    pub fn tool_result(conversation_id: &str, message_id: &str, result: impl Into<String>) -> Self {
        Self {
            tool_result: Some(result.into()),
            ..Self::base(StreamEventKind::ToolResult, conversation_id, message_id)
        }
    }

    pub fn done(conversation_id: &str, message_id: &str) -> Self {
        Self::base(StreamEventKind::Done, conversation_id, message_id)
    }

    pub fn error(conversation_id: &str, message_id: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::base(StreamEventKind::Error, conversation_id, message_id)
        }
    }
}

/// Parse a single SSE line: `event: <type>` or `data: <json>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Incremental assembly of streamed tool calls, keyed by the
/// provider-supplied integer index.
///
/// `id`, `type`, and `function.name` are set when a fragment carries them;
/// `function.arguments` fragments concatenate. A call survives assembly only
/// when both `id` and `name` arrived.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    call_type: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: &ToolCallDelta) {
        let slot = self.slots.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            slot.id = Some(id.clone());
        }
        if let Some(call_type) = &delta.call_type {
            slot.call_type = Some(call_type.clone());
        }
        if let Some(name) = &delta.name {
            slot.name = Some(name.clone());
        }
        if let Some(fragment) = &delta.arguments {
            slot.arguments.push_str(fragment);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finish assembly, keeping index order and dropping incomplete slots.
    pub fn finish(self) -> Vec<ToolCall> {
        self.slots
            .into_values()
            .filter_map(|slot| {
                let id = slot.id?;
                let name = slot.name?;
                Some(ToolCall {
                    id,
                    call_type: slot.call_type,
                    function: converse_core::message::FunctionCall {
                        name,
                        arguments: slot.arguments,
                    },
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            call_type: None,
            name: name.map(String::from),
            arguments: arguments.map(String::from),
        }
    }

    #[test]
    fn fragments_assemble_across_chunks() {
        let mut assembler = ToolCallAssembler::new();
        assembler.apply(&delta(0, Some("t1"), None, None));
        assembler.apply(&delta(0, None, Some("rag_search"), None));
        assembler.apply(&delta(0, None, None, Some(r#"{"q":"#)));
        assembler.apply(&delta(0, None, None, Some(r#""kotlin"}"#)));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].function.name, "rag_search");
        assert_eq!(calls[0].function.arguments, r#"{"q":"kotlin"}"#);
    }

    #[test]
    fn incomplete_slots_are_dropped() {
        let mut assembler = ToolCallAssembler::new();
        assembler.apply(&delta(0, Some("t1"), Some("ok_tool"), Some("{}")));
        assembler.apply(&delta(1, None, Some("no_id"), Some("{}")));
        assembler.apply(&delta(2, Some("t3"), None, Some("{}")));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "ok_tool");
    }

    #[test]
    fn calls_keep_index_order() {
        let mut assembler = ToolCallAssembler::new();
        assembler.apply(&delta(1, Some("b"), Some("second"), None));
        assembler.apply(&delta(0, Some("a"), Some("first"), None));

        let calls = assembler.finish();
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[1].function.name, "second");
    }

    #[test]
    fn event_serialises_to_the_sse_payload_shape() {
        let event = StreamEvent::content("c1", "m1", "Привет");
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "CONTENT");
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["content"], "Привет");
        assert!(json.get("toolCall").is_none());
    }
}
