//! RAG tool group — indexing, search, and question answering over the
//! process-wide vector index.
//!
//! Searches take the read side of the index lock and may run concurrently;
//! indexing takes the write side, so rebuilds serialise against searches.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;

use converse_rag::{Chunk, Chunker, VectorIndex};

use crate::rag_service::{RagAnswer, RagQueryService};
use crate::tools::{parse_args, Tool, ToolError};

const DEFAULT_TOP_K: usize = 3;

/// `rag_index_documents` — rebuild the index from a directory of text files.
pub struct RagIndexDocumentsTool {
    index: Arc<RwLock<VectorIndex>>,
    chunker: Chunker,
}

impl RagIndexDocumentsTool {
    pub fn new(index: Arc<RwLock<VectorIndex>>) -> Self {
        Self {
            index,
            chunker: Chunker::default(),
        }
    }

    fn collect_chunks(&self, directory: &Path) -> Result<Vec<Chunk>, ToolError> {
        let entries = std::fs::read_dir(directory)
            .map_err(|e| ToolError::Execution(format!("не удалось открыть каталог: {e}")))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("txt") | Some("md")
                )
            })
            .collect();
        paths.sort();

        let mut chunks = Vec::new();
        for path in paths {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| ToolError::Execution(format!("ошибка чтения {}: {e}", path.display())))?;
            let source = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();
            chunks.extend(self.chunker.split(&source, &content));
        }
        Ok(chunks)
    }
}

#[async_trait]
impl Tool for RagIndexDocumentsTool {
    fn name(&self) -> &str {
        "rag_index_documents"
    }

    fn description(&self) -> &str {
        "Индексирует документы (.txt, .md) из каталога в базу знаний. \
         Перестраивает индекс целиком."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "Путь к каталогу с документами."
                }
            },
            "required": ["directory"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let directory = args
            .get("directory")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'directory' обязателен".into()))?;

        let chunks = self.collect_chunks(Path::new(directory))?;
        if chunks.is_empty() {
            return Ok("❌ В каталоге нет документов .txt или .md".to_string());
        }

        let sources: usize = {
            let mut names: Vec<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
            names.sort();
            names.dedup();
            names.len()
        };

        let mut index = self.index.write().await;
        let indexed = index
            .index_chunks(chunks)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        info!(chunks = indexed, documents = sources, "documents indexed");

        Ok(format!(
            "Проиндексировано документов: {sources}, фрагментов: {indexed}."
        ))
    }
}

/// `rag_search` — raw top-K search without the LLM follow-up.
pub struct RagSearchTool {
    index: Arc<RwLock<VectorIndex>>,
}

impl RagSearchTool {
    pub fn new(index: Arc<RwLock<VectorIndex>>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for RagSearchTool {
    fn name(&self) -> &str {
        "rag_search"
    }

    fn description(&self) -> &str {
        "Ищет фрагменты в базе знаний по смысловой близости. Возвращает \
         найденные фрагменты с оценками релевантности."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Поисковый запрос."
                },
                "top_k": {
                    "type": "integer",
                    "description": "Сколько фрагментов вернуть (по умолчанию 3)."
                },
                "min_relevance": {
                    "type": "number",
                    "description": "Минимальная релевантность 0..1 (необязательно)."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'query' обязателен".into()))?;
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let min_relevance = args
            .get("min_relevance")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32);

        let index = self.index.read().await;
        let hits = index
            .search(query, top_k, min_relevance)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        if hits.is_empty() {
            return Ok("Ничего не найдено. Возможно, индекс пуст — выполните rag_index_documents.".to_string());
        }

        let mut out = format!("Найдено фрагментов: {}\n", hits.len());
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "\n[{}] {} (релевантность {:.2})\n{}\n",
                i + 1,
                hit.source,
                hit.score,
                hit.content.trim(),
            ));
        }
        Ok(out)
    }
}

/// `rag_index_info` — index statistics.
pub struct RagIndexInfoTool {
    index: Arc<RwLock<VectorIndex>>,
}

impl RagIndexInfoTool {
    pub fn new(index: Arc<RwLock<VectorIndex>>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for RagIndexInfoTool {
    fn name(&self) -> &str {
        "rag_index_info"
    }

    fn description(&self) -> &str {
        "Показывает состояние базы знаний: число документов, фрагментов и \
         размерность векторов."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(&self, _args_json: &str) -> Result<String, ToolError> {
        let index = self.index.read().await;
        let info = index.info();
        Ok(format!(
            "Документов: {}\nФрагментов: {}\nРазмерность векторов: {}\nГотов к поиску: {}",
            info.total_documents,
            info.total_chunks,
            info.vector_dimension,
            if info.searchable { "да" } else { "нет — требуется индексация" },
        ))
    }
}

fn format_answer(answer: &RagAnswer) -> String {
    let mut out = answer.answer.clone();
    if answer.used_rag {
        out.push_str(&format!(
            "\n\nИсточники ({}): {}",
            answer.found_chunks,
            answer.sources.join(", "),
        ));
    }
    out
}

/// `ask_with_rag` — retrieval-augmented answer.
pub struct AskWithRagTool {
    service: Arc<RagQueryService>,
}

impl AskWithRagTool {
    pub fn new(service: Arc<RagQueryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for AskWithRagTool {
    fn name(&self) -> &str {
        "ask_with_rag"
    }

    fn description(&self) -> &str {
        "Отвечает на вопрос, используя базу знаний как контекст."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "Вопрос к базе знаний."
                },
                "top_k": {
                    "type": "integer",
                    "description": "Сколько фрагментов контекста использовать (по умолчанию 3)."
                },
                "min_relevance": {
                    "type": "number",
                    "description": "Минимальная релевантность фрагментов (необязательно)."
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'question' обязателен".into()))?;
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let min_relevance = args
            .get("min_relevance")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32);

        let answer = self
            .service
            .query_with_rag(question, top_k, min_relevance)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format_answer(&answer))
    }
}

/// `compare_rag_answers` — the same question with and without retrieval.
pub struct CompareRagAnswersTool {
    service: Arc<RagQueryService>,
}

impl CompareRagAnswersTool {
    pub fn new(service: Arc<RagQueryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CompareRagAnswersTool {
    fn name(&self) -> &str {
        "compare_rag_answers"
    }

    fn description(&self) -> &str {
        "Сравнивает ответы на вопрос с базой знаний и без неё."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "Вопрос для сравнения."
                },
                "top_k": {
                    "type": "integer",
                    "description": "Сколько фрагментов контекста использовать (по умолчанию 3)."
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'question' обязателен".into()))?;
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_TOP_K);

        let comparison = self
            .service
            .compare_answers(question, top_k)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(format!(
            "=== Без базы знаний ({} мс) ===\n{}\n\n=== С базой знаний ({} мс) ===\n{}",
            comparison.without_rag.duration_ms,
            comparison.without_rag.answer,
            comparison.with_rag.duration_ms,
            format_answer(&comparison.with_rag),
        ))
    }
}

/// `compare_rag_with_reranking` — plain, retrieval, retrieval + reranking.
pub struct CompareRagRerankingTool {
    service: Arc<RagQueryService>,
}

impl CompareRagRerankingTool {
    pub fn new(service: Arc<RagQueryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CompareRagRerankingTool {
    fn name(&self) -> &str {
        "compare_rag_with_reranking"
    }

    fn description(&self) -> &str {
        "Сравнивает три режима ответа: без базы знаний, с базой знаний и с \
         базой знаний плюс фильтрация по релевантности."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "Вопрос для сравнения."
                },
                "top_k": {
                    "type": "integer",
                    "description": "Сколько фрагментов контекста использовать (по умолчанию 3)."
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'question' обязателен".into()))?;
        let top_k = args
            .get("top_k")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_TOP_K);

        let comparison = self
            .service
            .compare_with_reranking(question, top_k)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(format!(
            "=== Без базы знаний ===\n{}\n\n=== С базой знаний ===\n{}\n\n=== С фильтрацией ===\n{}",
            comparison.without_rag.answer,
            format_answer(&comparison.with_rag),
            format_answer(&comparison.with_reranking),
        ))
    }
}
