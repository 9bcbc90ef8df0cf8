use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use converse_core::conversation::{
    CollectionSettings, CompressionSettings, Conversation, ConversationExport, ConversationInfo,
    ResponseFormat, SearchResult,
};
use converse_core::message::{Message, Role};

use crate::{make_highlight, ConversationRepository, Result, StoreError};

/// Map-of-conversations repository with no durability.
///
/// Each conversation sits behind its own async mutex, so turns on the same
/// id serialize while distinct ids proceed in parallel.
#[derive(Default)]
pub struct MemoryRepository {
    conversations: DashMap<String, Arc<Mutex<Conversation>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the conversation cell, creating an empty one on first reference.
    fn entry(&self, id: &str) -> Arc<Mutex<Conversation>> {
        self.conversations
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new(id, None))))
            .clone()
    }

    fn existing(&self, id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.conversations.get(id).map(|cell| cell.value().clone())
    }

    /// Snapshot the cells without holding map guards across awaits.
    fn cells(&self) -> Vec<Arc<Mutex<Conversation>>> {
        self.conversations
            .iter()
            .map(|cell| cell.value().clone())
            .collect()
    }
}

#[async_trait]
impl ConversationRepository for MemoryRepository {
    async fn has_conversation(&self, id: &str) -> Result<bool> {
        Ok(self.conversations.contains_key(id))
    }

    async fn init_conversation(&self, id: &str, system_message: &str) -> Result<()> {
        let cell = self.entry(id);
        let mut conversation = cell.lock().await;
        if conversation.history.is_empty() {
            conversation.history.push(Message::system(system_message));
            conversation.touch();
            debug!(conversation_id = %id, "conversation initialised");
        }
        Ok(())
    }

    async fn get_history(&self, id: &str) -> Result<Vec<Message>> {
        match self.existing(id) {
            Some(cell) => Ok(cell.lock().await.history.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn add_message(&self, id: &str, message: Message) -> Result<()> {
        let cell = self.entry(id);
        let mut conversation = cell.lock().await;
        conversation.history.push(message);
        conversation.touch();
        Ok(())
    }

    async fn add_messages(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        let cell = self.entry(id);
        let mut conversation = cell.lock().await;
        conversation.history.extend(messages);
        conversation.touch();
        Ok(())
    }

    async fn update_system_prompt(&self, id: &str, system_prompt: &str) -> Result<()> {
        let Some(cell) = self.existing(id) else {
            return Ok(());
        };
        let mut conversation = cell.lock().await;
        match conversation.history.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = Some(system_prompt.to_string());
                conversation.touch();
            }
            _ => {}
        }
        Ok(())
    }

    async fn replace_history(&self, id: &str, history: Vec<Message>) -> Result<()> {
        let cell = self.entry(id);
        let mut conversation = cell.lock().await;
        conversation.history = history;
        conversation.touch();
        Ok(())
    }

    async fn message_count(&self, id: &str) -> Result<usize> {
        match self.existing(id) {
            Some(cell) => Ok(cell.lock().await.history.len()),
            None => Ok(0),
        }
    }

    async fn get_format(&self, id: &str) -> Result<ResponseFormat> {
        match self.existing(id) {
            Some(cell) => Ok(cell.lock().await.response_format),
            None => Ok(ResponseFormat::default()),
        }
    }

    async fn set_format(&self, id: &str, format: ResponseFormat) -> Result<()> {
        let cell = self.entry(id);
        let mut conversation = cell.lock().await;
        conversation.response_format = format;
        conversation.touch();
        Ok(())
    }

    async fn get_collection_settings(&self, id: &str) -> Result<CollectionSettings> {
        match self.existing(id) {
            Some(cell) => Ok(cell.lock().await.collection_settings.clone()),
            None => Ok(CollectionSettings::default()),
        }
    }

    async fn set_collection_settings(&self, id: &str, settings: CollectionSettings) -> Result<()> {
        let cell = self.entry(id);
        let mut conversation = cell.lock().await;
        conversation.collection_settings = settings;
        conversation.touch();
        Ok(())
    }

    async fn get_compression_settings(&self, id: &str) -> Result<CompressionSettings> {
        match self.existing(id) {
            Some(cell) => Ok(cell.lock().await.compression_settings.clone()),
            None => Ok(CompressionSettings::default()),
        }
    }

    async fn set_compression_settings(
        &self,
        id: &str,
        settings: CompressionSettings,
    ) -> Result<()> {
        let cell = self.entry(id);
        let mut conversation = cell.lock().await;
        conversation.compression_settings = settings;
        conversation.touch();
        Ok(())
    }

    async fn create_conversation(&self, title: Option<String>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conversations.insert(
            id.clone(),
            Arc::new(Mutex::new(Conversation::new(&id, title))),
        );
        debug!(conversation_id = %id, "conversation created");
        Ok(id)
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let cell = self
            .existing(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let mut conversation = cell.lock().await;
        conversation.title = title.to_string();
        conversation.touch();
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.conversations
            .remove(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>> {
        let mut infos = Vec::new();
        for cell in self.cells() {
            infos.push(cell.lock().await.info());
        }
        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(infos)
    }

    async fn get_conversation_info(&self, id: &str) -> Result<Option<ConversationInfo>> {
        match self.existing(id) {
            Some(cell) => Ok(Some(cell.lock().await.info())),
            None => Ok(None),
        }
    }

    async fn search_messages(&self, query: &str) -> Result<Vec<SearchResult>> {
        let mut results = Vec::new();
        for cell in self.cells() {
            let conversation = cell.lock().await;
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
        match self.existing(id) {
            Some(cell) => {
                let conversation = cell.lock().await;
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
        self.conversations
            .insert(id.clone(), Arc::new(Mutex::new(conversation)));
        debug!(conversation_id = %id, "conversation imported");
        Ok(id)
    }
}
