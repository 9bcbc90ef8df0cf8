//! History compression: condenses old dialogue into a single assistant-role
//! summary message to bound prompt growth.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use converse_core::conversation::CompressionSettings;
use converse_core::message::{Message, Role};

use crate::client::LlmClient;

const SUMMARY_SYSTEM_PROMPT: &str = "Сожми диалог в краткое резюме списком пунктов. \
     Сохрани: установленные факты, принятые решения, открытые вопросы. \
     Опусти приветствия и служебные реплики. Пиши от третьего лица.";

/// Outcome of one compression attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    pub compressed: bool,
    pub original_count: usize,
    pub compressed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub estimated_tokens_saved: u64,
}

impl CompressionResult {
    fn noop(len: usize) -> Self {
        Self {
            compressed: false,
            original_count: len,
            compressed_count: len,
            summary: None,
            estimated_tokens_saved: 0,
        }
    }
}

/// Accumulated per-conversation compression statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressionStats {
    pub total_compressions: u32,
    pub estimated_tokens_saved: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<String>,
}

/// Condenses old dialogue via the LLM, with a deterministic fallback when
/// the summary call fails.
pub struct HistoryCompressor {
    llm: Arc<dyn LlmClient>,
    stats: DashMap<String, CompressionStats>,
}

impl HistoryCompressor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            stats: DashMap::new(),
        }
    }

    /// True when compression is on and the dialogue has grown past the
    /// threshold (user and assistant messages only).
    pub fn needs_compression(&self, history: &[Message], settings: &CompressionSettings) -> bool {
        if !settings.enabled {
            return false;
        }
        let dialogue_count = history.iter().filter(|m| m.is_dialogue()).count();
        dialogue_count >= settings.message_threshold
    }

    pub fn stats(&self, conversation_id: &str) -> Option<CompressionStats> {
        self.stats.get(conversation_id).map(|s| s.clone())
    }

    /// Compress `history`, returning the new history and the result record.
    /// The returned history keeps the system head (when present), then the
    /// summary message, then the untouched recent suffix.
    pub async fn compress(
        &self,
        history: &[Message],
        conversation_id: &str,
        settings: &CompressionSettings,
    ) -> (Vec<Message>, CompressionResult) {
        let (system, dialogue) = match history.first() {
            Some(first) if first.role == Role::System => (Some(first.clone()), &history[1..]),
            _ => (None, history),
        };

        if dialogue.len() < settings.message_threshold {
            return (history.to_vec(), CompressionResult::noop(history.len()));
        }

        let keep = settings.keep_recent_messages.min(dialogue.len());
        let split = dialogue.len() - keep;
        let (to_compress, recent) = dialogue.split_at(split);
        if to_compress.is_empty() {
            return (history.to_vec(), CompressionResult::noop(history.len()));
        }

        let summary = match self.summarize(to_compress, settings).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(conversation_id, error = %e, "summary call failed, using fallback");
                fallback_summary(to_compress)
            }
        };

        let original_chars: usize = to_compress
            .iter()
            .filter_map(|m| m.content.as_ref())
            .map(|c| c.chars().count())
            .sum();
        let saved_chars = original_chars.saturating_sub(summary.chars().count());
        let estimated_tokens_saved = (saved_chars / 4) as u64;

        let mut new_history = Vec::with_capacity(recent.len() + 2);
        if let Some(system) = system {
            new_history.push(system);
        }
        new_history.push(Message::assistant(summary.clone()));
        new_history.extend_from_slice(recent);

        let mut stats = self.stats.entry(conversation_id.to_string()).or_default();
        stats.total_compressions += 1;
        stats.estimated_tokens_saved += estimated_tokens_saved;
        stats.last_summary = Some(summary.clone());

        info!(
            conversation_id,
            original = history.len(),
            compressed = new_history.len(),
            estimated_tokens_saved,
            "history compressed"
        );

        let result = CompressionResult {
            compressed: true,
            original_count: history.len(),
            compressed_count: new_history.len(),
            summary: Some(summary),
            estimated_tokens_saved,
        };
        (new_history, result)
    }

    async fn summarize(
        &self,
        to_compress: &[Message],
        settings: &CompressionSettings,
    ) -> Result<String, crate::client::LlmError> {
        let transcript: String = to_compress
            .iter()
            .map(|m| {
                format!(
                    "{}: {}",
                    m.role,
                    m.content.as_deref().unwrap_or("(вызов инструмента)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(transcript),
        ];
        let response = self
            .llm
            .chat(
                &messages,
                &[],
                Some(settings.summary_temperature),
                "history-compression",
            )
            .await?;
        let choice = response.into_first_choice()?;
        let summary = choice.message.content.unwrap_or_default();
        if summary.trim().is_empty() {
            return Err(crate::client::LlmError::EmptyResponse);
        }
        Ok(summary)
    }
}

/// Deterministic synthesis used when the summary call fails: message count
/// plus the first 100 characters of up to three user messages.
fn fallback_summary(to_compress: &[Message]) -> String {
    let mut out = format!("Сводка предыдущего диалога ({} сообщений).", to_compress.len());
    let topics: Vec<String> = to_compress
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| m.content.as_ref())
        .take(3)
        .map(|c| c.chars().take(100).collect())
        .collect();
    if !topics.is_empty() {
        out.push_str("\nОбсуждалось:");
        for topic in topics {
            out.push_str(&format!("\n- {topic}"));
        }
    }
    out
}
