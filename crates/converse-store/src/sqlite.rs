use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use converse_core::conversation::{
    now_ms, CollectionMode, CollectionSettings, CompressionSettings, ConversationExport,
    ConversationInfo, ExportedMessage, ResponseFormat, SearchResult, DEFAULT_TITLE,
};
use converse_core::message::{Message, Role};

use crate::{make_highlight, ConversationRepository, Result, StoreError};

/// SQLite-backed repository.
///
/// Wraps a single connection in a `Mutex`. For high-concurrency deployments
/// consider a connection pool, but a mutex is sufficient for the single-node
/// target and keeps `replace_history` trivially transactional.
pub struct SqliteRepository {
    db: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }
}

/// Initialise the schema. Safe to call on every startup (idempotent).
fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                            TEXT PRIMARY KEY,
            title                         TEXT NOT NULL,
            created_at                    INTEGER NOT NULL,
            updated_at                    INTEGER NOT NULL,
            response_format               TEXT NOT NULL DEFAULT 'plain',
            collection_mode               TEXT NOT NULL DEFAULT 'technical_spec',
            collection_custom_prompt      TEXT,
            collection_result_title       TEXT,
            collection_enabled            INTEGER NOT NULL DEFAULT 0,
            compression_enabled           INTEGER NOT NULL DEFAULT 0,
            compression_threshold         INTEGER NOT NULL DEFAULT 10,
            compression_keep_recent       INTEGER NOT NULL DEFAULT 4,
            compression_summary_tokens    INTEGER NOT NULL DEFAULT 500,
            compression_summary_temp      REAL NOT NULL DEFAULT 0.3
        );
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            ordinal         INTEGER NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT,
            tool_calls_json TEXT,
            tool_call_id    TEXT,
            created_at      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv
            ON messages(conversation_id, ordinal);",
    )
}

/// Insert the conversation row if it does not exist yet.
fn ensure_conversation(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    let now = now_ms();
    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, title, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        rusqlite::params![id, DEFAULT_TITLE, now],
    )?;
    Ok(())
}

fn touch(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now_ms(), id],
    )?;
    Ok(())
}

fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    ordinal: i64,
    message: &Message,
) -> Result<()> {
    let tool_calls_json = match &message.tool_calls {
        Some(calls) => Some(serde_json::to_string(calls)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO messages
         (id, conversation_id, ordinal, role, content, tool_calls_json, tool_call_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            conversation_id,
            ordinal,
            message.role.to_string(),
            message.content,
            tool_calls_json,
            message.tool_call_id,
            now_ms(),
        ],
    )?;
    Ok(())
}

fn next_ordinal(conn: &Connection, conversation_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM messages WHERE conversation_id = ?1",
        rusqlite::params![conversation_id],
        |row| row.get(0),
    )
}

/// Raw message columns, decoded outside the rusqlite closure.
type MessageRow = (String, Option<String>, Option<String>, Option<String>);

fn decode_message(row: MessageRow) -> Option<Message> {
    let (role_str, content, tool_calls_json, tool_call_id) = row;
    let role: Role = role_str.parse().ok()?;
    let tool_calls = match tool_calls_json {
        Some(json) => Some(serde_json::from_str(&json).ok()?),
        None => None,
    };
    Some(Message {
        role,
        content,
        tool_calls,
        tool_call_id,
    })
}

fn load_history(conn: &Connection, conversation_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT role, content, tool_calls_json, tool_call_id
         FROM messages WHERE conversation_id = ?1 ORDER BY ordinal",
    )?;
    let rows: Vec<MessageRow> = stmt
        .query_map(rusqlite::params![conversation_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows.into_iter().filter_map(decode_message).collect())
}

#[async_trait]
impl ConversationRepository for SqliteRepository {
    async fn has_conversation(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM conversations WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn init_conversation(&self, id: &str, system_message: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        ensure_conversation(&db, id)?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )?;
        if count == 0 {
            insert_message(&db, id, 0, &Message::system(system_message))?;
            touch(&db, id)?;
            debug!(conversation_id = %id, "conversation initialised");
        }
        Ok(())
    }

    async fn get_history(&self, id: &str) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        load_history(&db, id)
    }

    async fn add_message(&self, id: &str, message: Message) -> Result<()> {
        let db = self.db.lock().unwrap();
        ensure_conversation(&db, id)?;
        let ordinal = next_ordinal(&db, id)?;
        insert_message(&db, id, ordinal, &message)?;
        touch(&db, id)?;
        Ok(())
    }

    async fn add_messages(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        let db = self.db.lock().unwrap();
        ensure_conversation(&db, id)?;
        let mut ordinal = next_ordinal(&db, id)?;
        for message in &messages {
            insert_message(&db, id, ordinal, message)?;
            ordinal += 1;
        }
        touch(&db, id)?;
        Ok(())
    }

    async fn update_system_prompt(&self, id: &str, system_prompt: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let first: Option<(String, String)> = match db.query_row(
            "SELECT id, role FROM messages WHERE conversation_id = ?1
             ORDER BY ordinal LIMIT 1",
            rusqlite::params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(StoreError::Database(e)),
        };

        // Silent no-op unless the head of the history is a system message.
        if let Some((message_id, role)) = first {
            if role == Role::System.to_string() {
                db.execute(
                    "UPDATE messages SET content = ?1 WHERE id = ?2",
                    rusqlite::params![system_prompt, message_id],
                )?;
                touch(&db, id)?;
            }
        }
        Ok(())
    }

    async fn replace_history(&self, id: &str, history: Vec<Message>) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        ensure_conversation(&db, id)?;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            rusqlite::params![id],
        )?;
        for (ordinal, message) in history.iter().enumerate() {
            insert_message(&tx, id, ordinal as i64, message)?;
        }
        tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now_ms(), id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn message_count(&self, id: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn get_format(&self, id: &str) -> Result<ResponseFormat> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT response_format FROM conversations WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(s) => Ok(s.parse().unwrap_or_default()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(ResponseFormat::default()),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn set_format(&self, id: &str, format: ResponseFormat) -> Result<()> {
        let db = self.db.lock().unwrap();
        ensure_conversation(&db, id)?;
        db.execute(
            "UPDATE conversations SET response_format = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![format.to_string(), now_ms(), id],
        )?;
        Ok(())
    }

    async fn get_collection_settings(&self, id: &str) -> Result<CollectionSettings> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT collection_mode, collection_custom_prompt,
                    collection_result_title, collection_enabled
             FROM conversations WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            },
        ) {
            Ok((mode, custom_prompt, result_title, enabled)) => Ok(CollectionSettings {
                mode: mode.parse().unwrap_or(CollectionMode::TechnicalSpec),
                custom_prompt,
                result_title,
                enabled,
            }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(CollectionSettings::default()),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn set_collection_settings(&self, id: &str, settings: CollectionSettings) -> Result<()> {
        let db = self.db.lock().unwrap();
        ensure_conversation(&db, id)?;
        db.execute(
            "UPDATE conversations
             SET collection_mode = ?1, collection_custom_prompt = ?2,
                 collection_result_title = ?3, collection_enabled = ?4, updated_at = ?5
             WHERE id = ?6",
            rusqlite::params![
                settings.mode.to_string(),
                settings.custom_prompt,
                settings.result_title,
                settings.enabled,
                now_ms(),
                id,
            ],
        )?;
        Ok(())
    }

    async fn get_compression_settings(&self, id: &str) -> Result<CompressionSettings> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT compression_enabled, compression_threshold, compression_keep_recent,
                    compression_summary_tokens, compression_summary_temp
             FROM conversations WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            },
        ) {
            Ok((enabled, threshold, keep_recent, max_tokens, temperature)) => {
                Ok(CompressionSettings {
                    enabled,
                    message_threshold: threshold as usize,
                    keep_recent_messages: keep_recent as usize,
                    summary_max_tokens: max_tokens as u32,
                    summary_temperature: temperature as f32,
                })
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(CompressionSettings::default()),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn set_compression_settings(
        &self,
        id: &str,
        settings: CompressionSettings,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        ensure_conversation(&db, id)?;
        db.execute(
            "UPDATE conversations
             SET compression_enabled = ?1, compression_threshold = ?2,
                 compression_keep_recent = ?3, compression_summary_tokens = ?4,
                 compression_summary_temp = ?5, updated_at = ?6
             WHERE id = ?7",
            rusqlite::params![
                settings.enabled,
                settings.message_threshold as i64,
                settings.keep_recent_messages as i64,
                settings.summary_max_tokens as i64,
                settings.summary_temperature as f64,
                now_ms(),
                id,
            ],
        )?;
        Ok(())
    }

    async fn create_conversation(&self, title: Option<String>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![
                id,
                title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                now_ms(),
            ],
        )?;
        debug!(conversation_id = %id, "conversation created");
        Ok(id)
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![title, now_ms(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            rusqlite::params![id],
        )?;
        let changed = tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            rusqlite::params![id],
        )?;
        tx.commit()?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT c.id, c.title, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c
             ORDER BY c.updated_at DESC",
        )?;
        let infos = stmt
            .query_map([], |row| {
                Ok(ConversationInfo {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                    message_count: row.get::<_, i64>(4)? as usize,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(infos)
    }

    async fn get_conversation_info(&self, id: &str) -> Result<Option<ConversationInfo>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT c.id, c.title, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c WHERE c.id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(ConversationInfo {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                    message_count: row.get::<_, i64>(4)? as usize,
                })
            },
        ) {
            Ok(info) => Ok(Some(info)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn search_messages(&self, query: &str) -> Result<Vec<SearchResult>> {
        let db = self.db.lock().unwrap();
        // Matching happens in Rust: SQLite's lower() folds ASCII only, which
        // would miss case-insensitive Cyrillic matches.
        let mut stmt = db.prepare(
            "SELECT m.conversation_id, c.title, m.ordinal, m.role, m.content, c.updated_at
             FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE m.content IS NOT NULL
             ORDER BY c.updated_at DESC, m.ordinal",
        )?;
        let rows: Vec<(String, String, i64, String, String, i64)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut results = Vec::new();
        for (conversation_id, title, ordinal, role_str, content, updated_at) in rows {
            let Ok(role) = role_str.parse::<Role>() else {
                continue;
            };
            if let Some(highlight) = make_highlight(&content, query) {
                results.push(SearchResult {
                    conversation_id,
                    conversation_title: title,
                    message_index: ordinal as usize,
                    role,
                    highlight,
                    updated_at,
                });
            }
        }
        Ok(results)
    }

    async fn export_conversation(&self, id: &str) -> Result<Option<ConversationExport>> {
        let db = self.db.lock().unwrap();
        let title: Option<String> = match db.query_row(
            "SELECT title FROM conversations WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        ) {
            Ok(title) => Some(title),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(StoreError::Database(e)),
        };
        let Some(title) = title else {
            return Ok(None);
        };

        let mut stmt = db.prepare(
            "SELECT id, role, content, tool_calls_json, tool_call_id, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY ordinal",
        )?;
        let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>, i64)> =
            stmt.query_map(rusqlite::params![id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut messages = Vec::with_capacity(rows.len());
        for (message_id, role_str, content, tool_calls, tool_call_id, created_at) in rows {
            let role = role_str
                .parse::<Role>()
                .map_err(StoreError::InvalidExport)?;
            messages.push(ExportedMessage {
                id: message_id,
                role,
                content,
                timestamp: created_at,
                tool_calls,
                tool_call_id,
            });
        }

        Ok(Some(ConversationExport {
            id: id.to_string(),
            title,
            messages,
            exported_at: now_ms(),
            format: "json".to_string(),
        }))
    }

    async fn import_conversation(&self, export: ConversationExport) -> Result<String> {
        export
            .validate()
            .map_err(|e| StoreError::InvalidExport(e.to_string()))?;
        // Validates every embedded tool-call string before any row lands.
        export
            .to_history()
            .map_err(|e| StoreError::InvalidExport(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![id, export.title, now_ms()],
        )?;
        for (ordinal, message) in export.messages.iter().enumerate() {
            tx.execute(
                "INSERT INTO messages
                 (id, conversation_id, ordinal, role, content, tool_calls_json,
                  tool_call_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    id,
                    ordinal as i64,
                    message.role.to_string(),
                    message.content,
                    message.tool_calls,
                    message.tool_call_id,
                    message.timestamp,
                ],
            )?;
        }
        tx.commit()?;
        debug!(conversation_id = %id, "conversation imported");
        Ok(id)
    }
}
