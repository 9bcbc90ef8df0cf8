//! Pipeline demo tool group: search → summarize → save, built declaratively
//! so the chain reads as three closures over shared state.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use converse_core::message::Message;
use converse_rag::VectorIndex;

use crate::client::LlmClient;
use crate::tools::{FunctionTool, ToolError};

/// `pipeline_search_docs` — plain-text search step over the shared index.
pub fn search_docs_tool(index: Arc<RwLock<VectorIndex>>) -> FunctionTool {
    FunctionTool::builder(
        "pipeline_search_docs",
        "Шаг конвейера: ищет фрагменты в базе знаний и возвращает их текст \
         одним блоком для дальнейшей обработки.",
    )
    .param("query", "string", "Поисковый запрос.", true)
    .param("top_k", "integer", "Сколько фрагментов вернуть (по умолчанию 3).", false)
    .handler(move |args| {
        let index = Arc::clone(&index);
        async move {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArguments("'query' обязателен".into()))?;
            let top_k = args
                .get("top_k")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(3);

            let hits = {
                let index = index.read().await;
                index
                    .search(query, top_k, None)
                    .map_err(|e| ToolError::Execution(e.to_string()))?
            };
            if hits.is_empty() {
                return Ok("Ничего не найдено.".to_string());
            }
            Ok(hits
                .iter()
                .map(|h| h.content.trim().to_string())
                .collect::<Vec<_>>()
                .join("\n\n"))
        }
    })
}

/// `pipeline_summarize` — condense arbitrary text with a one-shot LLM call.
pub fn summarize_tool(llm: Arc<dyn LlmClient>) -> FunctionTool {
    FunctionTool::builder(
        "pipeline_summarize",
        "Шаг конвейера: сжимает переданный текст в краткое резюме.",
    )
    .param("text", "string", "Текст для сжатия.", true)
    .handler(move |args| {
        let llm = Arc::clone(&llm);
        async move {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArguments("'text' обязателен".into()))?;

            let messages = vec![
                Message::system(
                    "Сожми текст пользователя в 3-5 предложений, сохранив факты и цифры.",
                ),
                Message::user(text),
            ];
            let response = llm
                .chat(&messages, &[], Some(0.3), "pipeline-summarize")
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            let choice = response
                .into_first_choice()
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            Ok(choice.message.content.unwrap_or_default())
        }
    })
}

/// `pipeline_save_to_file` — final step, writes text under the output
/// directory. Rejects paths that escape it.
pub fn save_to_file_tool(output_dir: PathBuf) -> FunctionTool {
    FunctionTool::builder(
        "pipeline_save_to_file",
        "Шаг конвейера: сохраняет текст в файл в выходном каталоге.",
    )
    .param("filename", "string", "Имя файла (без каталогов).", true)
    .param("text", "string", "Содержимое файла.", true)
    .handler(move |args| {
        let output_dir = output_dir.clone();
        async move {
            let filename = args
                .get("filename")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArguments("'filename' обязателен".into()))?;
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArguments("'text' обязателен".into()))?;

            if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
                return Ok("❌ Имя файла не должно содержать путь".to_string());
            }

            std::fs::create_dir_all(&output_dir)
                .map_err(|e| ToolError::Execution(e.to_string()))?;
            let path = output_dir.join(filename);
            std::fs::write(&path, text).map_err(|e| ToolError::Execution(e.to_string()))?;
            Ok(format!("Сохранено: {}", path.display()))
        }
    })
}
