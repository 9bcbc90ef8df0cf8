//! Conversation persistence: the repository contract and its durability
//! tiers (in-memory, Redis with TTL, SQLite).

pub mod memory;
pub mod redis;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use redis::RedisRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use thiserror::Error;

use converse_core::conversation::{
    CollectionSettings, CompressionSettings, ConversationExport, ConversationInfo, ResponseFormat,
    SearchResult,
};
use converse_core::message::Message;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conversation not found: {id}")]
    NotFound { id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("KV store error: {0}")]
    Kv(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid export: {0}")]
    InvalidExport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent per-conversation history, settings, and metadata.
///
/// Contract highlights:
/// - `init_conversation` is idempotent — a second call on the same id is a no-op.
/// - `update_system_prompt` rewrites `history[0]` only when it is a system
///   message; otherwise it silently does nothing.
/// - Every mutating operation bumps `updated_at`.
/// - Operations on the same id observe a serial order; distinct ids do not
///   contend (each backend provides its own per-id exclusion).
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn has_conversation(&self, id: &str) -> Result<bool>;
    async fn init_conversation(&self, id: &str, system_message: &str) -> Result<()>;
    async fn get_history(&self, id: &str) -> Result<Vec<Message>>;
    async fn add_message(&self, id: &str, message: Message) -> Result<()>;
    async fn add_messages(&self, id: &str, messages: Vec<Message>) -> Result<()>;
    async fn update_system_prompt(&self, id: &str, system_prompt: &str) -> Result<()>;
    async fn replace_history(&self, id: &str, history: Vec<Message>) -> Result<()>;
    async fn message_count(&self, id: &str) -> Result<usize>;

    async fn get_format(&self, id: &str) -> Result<ResponseFormat>;
    async fn set_format(&self, id: &str, format: ResponseFormat) -> Result<()>;
    async fn get_collection_settings(&self, id: &str) -> Result<CollectionSettings>;
    async fn set_collection_settings(&self, id: &str, settings: CollectionSettings) -> Result<()>;
    async fn get_compression_settings(&self, id: &str) -> Result<CompressionSettings>;
    async fn set_compression_settings(&self, id: &str, settings: CompressionSettings)
        -> Result<()>;

    async fn create_conversation(&self, title: Option<String>) -> Result<String>;
    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()>;
    async fn delete_conversation(&self, id: &str) -> Result<()>;
    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>>;
    async fn get_conversation_info(&self, id: &str) -> Result<Option<ConversationInfo>>;

    /// Case-insensitive substring search across all conversations,
    /// newest-updated first.
    async fn search_messages(&self, query: &str) -> Result<Vec<SearchResult>>;

    async fn export_conversation(&self, id: &str) -> Result<Option<ConversationExport>>;
    /// Imports under a freshly generated id; returns it.
    async fn import_conversation(&self, export: ConversationExport) -> Result<String>;
}

/// Characters of context kept on each side of a search match.
const HIGHLIGHT_CONTEXT: usize = 30;

/// Build the ±30-character highlight around the first case-insensitive match
/// of `query` in `content`. Returns `None` when there is no match.
pub(crate) fn make_highlight(content: &str, query: &str) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    let lowered: Vec<char> = content.to_lowercase().chars().collect();
    let needle: Vec<char> = query.to_lowercase().chars().collect();
    if needle.is_empty() || needle.len() > lowered.len() {
        return None;
    }
    let pos = lowered
        .windows(needle.len())
        .position(|w| w == needle.as_slice())?;

    // Slice the original text when lowercasing preserved the char count
    // (true for Latin and Cyrillic); otherwise fall back to the lowered copy.
    let original: Vec<char> = content.chars().collect();
    let chars = if original.len() == lowered.len() {
        &original
    } else {
        &lowered
    };

    let start = pos.saturating_sub(HIGHLIGHT_CONTEXT);
    let end = (pos + needle.len() + HIGHLIGHT_CONTEXT).min(chars.len());

    let mut highlight = String::new();
    if start > 0 {
        highlight.push('…');
    }
    highlight.extend(chars[start..end].iter());
    if end < chars.len() {
        highlight.push('…');
    }
    Some(highlight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlight_is_case_insensitive_and_windowed() {
        let content = "a".repeat(50) + "Kotlin" + &"b".repeat(50);
        let highlight = make_highlight(&content, "kotlin").expect("match");
        assert!(highlight.starts_with('…'));
        assert!(highlight.ends_with('…'));
        assert!(highlight.contains("Kotlin"));
        // 30 context chars + match + 30 context chars + two ellipses
        assert_eq!(highlight.chars().count(), 30 + 6 + 30 + 2);
    }

    #[test]
    fn highlight_handles_cyrillic() {
        let highlight = make_highlight("Сегодня хорошая погода в Москве", "ПОГОДА").expect("match");
        assert!(highlight.contains("погода"));
        assert!(!highlight.contains('…'));
    }

    #[test]
    fn no_match_returns_none() {
        assert!(make_highlight("nothing here", "kotlin").is_none());
        assert!(make_highlight("text", "").is_none());
    }
}
