use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::message::{Message, Role, ToolCall};

/// Placeholder title for conversations created without one.
pub const DEFAULT_TITLE: &str = "Новый диалог";

/// Current epoch time in milliseconds — the resolution the aggregate stores.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Required shape of the assistant's reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Plain,
    Markdown,
    Json,
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plain" => Ok(ResponseFormat::Plain),
            "markdown" => Ok(ResponseFormat::Markdown),
            "json" => Ok(ResponseFormat::Json),
            other => Err(format!("unknown response format: {other}")),
        }
    }
}

impl std::fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResponseFormat::Plain => "plain",
            ResponseFormat::Markdown => "markdown",
            ResponseFormat::Json => "json",
        };
        write!(f, "{s}")
    }
}

/// Preset guiding the assistant toward structured information gathering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    #[default]
    TechnicalSpec,
    DesignBrief,
    ProjectSummary,
    SolveDirect,
    SolveStepByStep,
    SolveExpertPanel,
    Custom,
}

impl std::str::FromStr for CollectionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "technical_spec" => Ok(CollectionMode::TechnicalSpec),
            "design_brief" => Ok(CollectionMode::DesignBrief),
            "project_summary" => Ok(CollectionMode::ProjectSummary),
            "solve_direct" => Ok(CollectionMode::SolveDirect),
            "solve_step_by_step" => Ok(CollectionMode::SolveStepByStep),
            "solve_expert_panel" => Ok(CollectionMode::SolveExpertPanel),
            "custom" => Ok(CollectionMode::Custom),
            other => Err(format!("unknown collection mode: {other}")),
        }
    }
}

impl std::fmt::Display for CollectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CollectionMode::TechnicalSpec => "technical_spec",
            CollectionMode::DesignBrief => "design_brief",
            CollectionMode::ProjectSummary => "project_summary",
            CollectionMode::SolveDirect => "solve_direct",
            CollectionMode::SolveStepByStep => "solve_step_by_step",
            CollectionMode::SolveExpertPanel => "solve_expert_panel",
            CollectionMode::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// Per-conversation collection-mode settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSettings {
    #[serde(default)]
    pub mode: CollectionMode,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub result_title: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

/// Per-conversation history compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_message_threshold")]
    pub message_threshold: usize,
    #[serde(default = "default_keep_recent")]
    pub keep_recent_messages: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
}

fn default_message_threshold() -> usize {
    10
}
fn default_keep_recent() -> usize {
    4
}
fn default_summary_max_tokens() -> u32 {
    500
}
fn default_summary_temperature() -> f32 {
    0.3
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            message_threshold: default_message_threshold(),
            keep_recent_messages: default_keep_recent(),
            summary_max_tokens: default_summary_max_tokens(),
            summary_temperature: default_summary_temperature(),
        }
    }
}

/// The conversation aggregate owned by the repository.
///
/// Invariant: when `history` is non-empty, `history[0].role == system`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub collection_settings: CollectionSettings,
    #[serde(default)]
    pub compression_settings: CompressionSettings,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: Option<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            history: Vec::new(),
            response_format: ResponseFormat::default(),
            collection_settings: CollectionSettings::default(),
            compression_settings: CompressionSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    pub fn info(&self) -> ConversationInfo {
        ConversationInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.history.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing surface for the conversation sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One hit from a cross-conversation message search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub conversation_id: String,
    pub conversation_title: String,
    pub message_index: usize,
    pub role: Role,
    /// ±30 characters of context around the first match.
    pub highlight: String,
    pub updated_at: i64,
}

/// Round-trippable conversation export.
///
/// Tool calls serialize as an embedded JSON string so the export schema does
/// not duplicate the wire schema of `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub id: String,
    pub title: String,
    pub messages: Vec<ExportedMessage>,
    pub exported_at: i64,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ExportedMessage {
    pub fn from_message(message: &Message, timestamp: i64) -> Result<Self> {
        let tool_calls = match &message.tool_calls {
            Some(calls) => Some(serde_json::to_string(calls)?),
            None => None,
        };
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            role: message.role,
            content: message.content.clone(),
            timestamp,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        })
    }

    pub fn to_message(&self) -> Result<Message> {
        let tool_calls = match &self.tool_calls {
            Some(json) => Some(serde_json::from_str::<Vec<ToolCall>>(json)?),
            None => None,
        };
        Ok(Message {
            role: self.role,
            content: self.content.clone(),
            tool_calls,
            tool_call_id: self.tool_call_id.clone(),
        })
    }
}

impl ConversationExport {
    pub fn from_conversation(conversation: &Conversation) -> Result<Self> {
        let messages = conversation
            .history
            .iter()
            .map(|m| ExportedMessage::from_message(m, conversation.updated_at))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            messages,
            exported_at: now_ms(),
            format: "json".to_string(),
        })
    }

    /// Rebuild a history from the export, validating embedded tool calls.
    pub fn to_history(&self) -> Result<Vec<Message>> {
        self.messages.iter().map(|m| m.to_message()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.format != "json" {
            return Err(CoreError::Config(format!(
                "unsupported export format: {}",
                self.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_roundtrip_preserves_structure() {
        let mut conv = Conversation::new("c1", Some("test".to_string()));
        conv.history = vec![
            Message::system("prompt"),
            Message::user("Привет"),
            Message::assistant_with_tool_calls(None, vec![ToolCall::new("t1", "get_current_time", "{}")]),
            Message::tool("2025-01-01T00:00:00Z", "t1"),
            Message::assistant("Готово"),
        ];

        let export = ConversationExport::from_conversation(&conv).expect("export");
        let history = export.to_history().expect("rebuild");

        assert_eq!(history.len(), conv.history.len());
        for (original, restored) in conv.history.iter().zip(&history) {
            assert_eq!(original.role, restored.role);
            assert_eq!(original.content, restored.content);
            assert_eq!(original.tool_calls, restored.tool_calls);
            assert_eq!(original.tool_call_id, restored.tool_call_id);
        }
    }

    #[test]
    fn exported_tool_calls_are_an_embedded_json_string() {
        let msg = Message::assistant_with_tool_calls(
            Some("thinking".to_string()),
            vec![ToolCall::new("t1", "rag_search", r#"{"query":"kotlin"}"#)],
        );
        let exported = ExportedMessage::from_message(&msg, 0).expect("export");
        let embedded = exported.tool_calls.expect("tool calls present");
        // The embedded value must itself parse as a tool-call array.
        let parsed: Vec<ToolCall> = serde_json::from_str(&embedded).expect("nested parse");
        assert_eq!(parsed[0].function.name, "rag_search");
    }

    #[test]
    fn compression_settings_defaults() {
        let settings = CompressionSettings::default();
        assert!(!settings.enabled);
        assert_eq!(settings.message_threshold, 10);
        assert_eq!(settings.keep_recent_messages, 4);
        assert_eq!(settings.summary_max_tokens, 500);
    }

    #[test]
    fn collection_mode_parse_roundtrip() {
        for mode in [
            CollectionMode::TechnicalSpec,
            CollectionMode::DesignBrief,
            CollectionMode::ProjectSummary,
            CollectionMode::SolveDirect,
            CollectionMode::SolveStepByStep,
            CollectionMode::SolveExpertPanel,
            CollectionMode::Custom,
        ] {
            let parsed: CollectionMode = mode.to_string().parse().expect("parse");
            assert_eq!(parsed, mode);
        }
    }
}
