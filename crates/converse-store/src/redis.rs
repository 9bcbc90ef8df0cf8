use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use converse_core::conversation::{
    CollectionSettings, CompressionSettings, Conversation, ConversationExport, ConversationInfo,
    ResponseFormat, SearchResult,
};
use converse_core::message::{Message, Role};

use crate::{make_highlight, ConversationRepository, Result, StoreError};

/// Set of known conversation ids. Members whose value key has expired are
/// pruned lazily during listing.
const INDEX_KEY: &str = "conv:index";

fn value_key(id: &str) -> String {
    format!("conv:{id}")
}

/// Redis-backed repository. Each conversation lives under `conv:{id}` as a
/// JSON document; the TTL is refreshed on every mutation, so an idle
/// conversation expires after `ttl_hours`.
pub struct RedisRepository {
    conn: MultiplexedConnection,
    /// Per-conversation guard for read-modify-write cycles.
    locks: DashMap<String, Arc<Mutex<()>>>,
    ttl_secs: u64,
}

impl RedisRepository {
    pub async fn connect(url: &str, ttl_hours: u64) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            locks: DashMap::new(),
            ttl_secs: ttl_hours.max(1) * 3600,
        })
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_string()).or_default().clone()
    }

    async fn read(&self, id: &str) -> Result<Option<Conversation>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(value_key(id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, conversation: &Conversation) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(conversation)?;
        let _: () = conn
            .set_ex(value_key(&conversation.id), json, self.ttl_secs)
            .await?;
        let _: () = conn.sadd(INDEX_KEY, &conversation.id).await?;
        Ok(())
    }

    /// Read-modify-write under the per-id lock. The conversation is created
    /// lazily when it does not exist yet.
    async fn mutate<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Conversation) + Send,
    {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let mut conversation = match self.read(id).await? {
            Some(conversation) => conversation,
            None => Conversation::new(id, None),
        };
        apply(&mut conversation);
        conversation.touch();
        self.write(&conversation).await
    }

    /// All live conversations, pruning index members whose value expired.
    async fn read_all(&self) -> Result<Vec<Conversation>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(INDEX_KEY).await?;

        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read(&id).await? {
                Some(conversation) => conversations.push(conversation),
                None => {
                    warn!(conversation_id = %id, "pruning expired conversation from index");
                    let _: () = conn.srem(INDEX_KEY, &id).await?;
                }
            }
        }
        Ok(conversations)
    }
}

#[async_trait]
impl ConversationRepository for RedisRepository {
    async fn has_conversation(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(value_key(id)).await?;
        Ok(exists)
    }

    async fn init_conversation(&self, id: &str, system_message: &str) -> Result<()> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let mut conversation = match self.read(id).await? {
            Some(conversation) => conversation,
            None => Conversation::new(id, None),
        };
        // Idempotent: an already-initialised conversation is left untouched.
        if !conversation.history.is_empty() {
            return Ok(());
        }
        conversation.history.push(Message::system(system_message));
        conversation.touch();
        self.write(&conversation).await?;
        debug!(conversation_id = %id, "conversation initialised");
        Ok(())
    }

    async fn get_history(&self, id: &str) -> Result<Vec<Message>> {
        Ok(self
            .read(id)
            .await?
            .map(|c| c.history)
            .unwrap_or_default())
    }

    async fn add_message(&self, id: &str, message: Message) -> Result<()> {
        self.mutate(id, |conversation| conversation.history.push(message))
            .await
    }

    async fn add_messages(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        self.mutate(id, |conversation| conversation.history.extend(messages))
            .await
    }

    async fn update_system_prompt(&self, id: &str, system_prompt: &str) -> Result<()> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let Some(mut conversation) = self.read(id).await? else {
            return Ok(());
        };
        match conversation.history.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = Some(system_prompt.to_string());
                conversation.touch();
                self.write(&conversation).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn replace_history(&self, id: &str, history: Vec<Message>) -> Result<()> {
        self.mutate(id, |conversation| conversation.history = history)
            .await
    }

    async fn message_count(&self, id: &str) -> Result<usize> {
        Ok(self
            .read(id)
            .await?
            .map(|c| c.history.len())
            .unwrap_or(0))
    }

    async fn get_format(&self, id: &str) -> Result<ResponseFormat> {
        Ok(self
            .read(id)
            .await?
            .map(|c| c.response_format)
            .unwrap_or_default())
    }

    async fn set_format(&self, id: &str, format: ResponseFormat) -> Result<()> {
        self.mutate(id, |conversation| conversation.response_format = format)
            .await
    }

    async fn get_collection_settings(&self, id: &str) -> Result<CollectionSettings> {
        Ok(self
            .read(id)
            .await?
            .map(|c| c.collection_settings)
            .unwrap_or_default())
    }

    async fn set_collection_settings(&self, id: &str, settings: CollectionSettings) -> Result<()> {
        self.mutate(id, |conversation| {
            conversation.collection_settings = settings
        })
        .await
    }

    async fn get_compression_settings(&self, id: &str) -> Result<CompressionSettings> {
        Ok(self
            .read(id)
            .await?
            .map(|c| c.compression_settings)
            .unwrap_or_default())
    }

    async fn set_compression_settings(
        &self,
        id: &str,
        settings: CompressionSettings,
    ) -> Result<()> {
        self.mutate(id, |conversation| {
            conversation.compression_settings = settings
        })
        .await
    }

    async fn create_conversation(&self, title: Option<String>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conversation = Conversation::new(&id, title);
        self.write(&conversation).await?;
        debug!(conversation_id = %id, "conversation created");
        Ok(id)
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let mut conversation = self
            .read(id)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        conversation.title = title.to_string();
        conversation.touch();
        self.write(&conversation).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(value_key(id)).await?;
        let _: () = conn.srem(INDEX_KEY, id).await?;
        self.locks.remove(id);
        if removed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>> {
        let mut infos: Vec<ConversationInfo> = self
            .read_all()
            .await?
            .iter()
            .map(Conversation::info)
            .collect();
        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(infos)
    }

    async fn get_conversation_info(&self, id: &str) -> Result<Option<ConversationInfo>> {
        Ok(self.read(id).await?.map(|c| c.info()))
    }

    async fn search_messages(&self, query: &str) -> Result<Vec<SearchResult>> {
        let mut results = Vec::new();
        for conversation in self.read_all().await? {
            for (index, message) in conversation.history.iter().enumerate() {
                let Some(content) = &message.content else {
                    continue;
                };
                if let Some(highlight) = make_highlight(content, query) {
                    results.push(SearchResult {
                        conversation_id: conversation.id.clone(),
                        conversation_title: conversation.title.clone(),
                        message_index: index,
                        role: message.role,
                        highlight,
                        updated_at: conversation.updated_at,
                    });
                }
            }
        }
        results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(results)
    }

    async fn export_conversation(&self, id: &str) -> Result<Option<ConversationExport>> {
        match self.read(id).await? {
            Some(conversation) => {
                let export = ConversationExport::from_conversation(&conversation)
                    .map_err(|e| StoreError::InvalidExport(e.to_string()))?;
                Ok(Some(export))
            }
            None => Ok(None),
        }
    }

    async fn import_conversation(&self, export: ConversationExport) -> Result<String> {
        export
            .validate()
            .map_err(|e| StoreError::InvalidExport(e.to_string()))?;
        let history = export
            .to_history()
            .map_err(|e| StoreError::InvalidExport(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let mut conversation = Conversation::new(&id, Some(export.title));
        conversation.history = history;
        self.write(&conversation).await?;
        debug!(conversation_id = %id, "conversation imported");
        Ok(id)
    }
}
