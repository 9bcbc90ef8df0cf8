use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use converse_core::message::Message;
use converse_rag::reranker::threshold;
use converse_rag::{RagError, Reranker, SearchHit, VectorIndex};

use crate::client::{LlmClient, LlmError};

/// Fixed assistant persona for answers over retrieved context.
const RAG_SYSTEM_PROMPT: &str = "Ты — ассистент, отвечающий на вопросы по базе знаний. \
     Используй предоставленный контекст как основной источник. Если ответа в контексте \
     нет, скажи об этом прямо и отвечай из общих знаний.";

/// Persona for the no-context comparison mode.
const PLAIN_SYSTEM_PROMPT: &str =
    "Ты — полезный ассистент. Отвечай на вопросы кратко и по делу.";

/// Answer produced by one query mode.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub used_rag: bool,
    pub found_chunks: usize,
    pub relevance_scores: Vec<f32>,
    pub sources: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

/// Side-by-side result of the with/without comparison.
#[derive(Debug, Clone, Serialize)]
pub struct RagComparison {
    pub question: String,
    pub without_rag: RagAnswer,
    pub with_rag: RagAnswer,
}

/// Three-mode comparison: plain, retrieval, retrieval + reranking.
#[derive(Debug, Clone, Serialize)]
pub struct RerankComparison {
    pub question: String,
    pub without_rag: RagAnswer,
    pub with_rag: RagAnswer,
    pub with_reranking: RagAnswer,
}

/// Composes retrieval with a follow-up LLM call.
pub struct RagQueryService {
    llm: Arc<dyn LlmClient>,
    index: Arc<RwLock<VectorIndex>>,
}

impl RagQueryService {
    pub fn new(llm: Arc<dyn LlmClient>, index: Arc<RwLock<VectorIndex>>) -> Self {
        Self { llm, index }
    }

    pub fn index(&self) -> Arc<RwLock<VectorIndex>> {
        Arc::clone(&self.index)
    }

    /// Retrieve top-K chunks and answer with them as context.
    ///
    /// An empty or model-less index degrades to a plain answer with
    /// `used_rag = false` — retrieval problems are never fatal here.
    pub async fn query_with_rag(
        &self,
        question: &str,
        top_k: usize,
        min_relevance: Option<f32>,
    ) -> Result<RagAnswer, LlmError> {
        let started = Instant::now();

        let hits = {
            let index = self.index.read().await;
            match index.search(question, top_k, min_relevance) {
                Ok(hits) => hits,
                Err(RagError::ModelMissing) => {
                    warn!("RAG index has no model — answering without context");
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, "RAG search failed — answering without context");
                    Vec::new()
                }
            }
        };

        if hits.is_empty() {
            let mut answer = self
                .ask(PLAIN_SYSTEM_PROMPT, question, started)
                .await?;
            answer.answer.push_str("\n\n(ответ без контекста базы знаний)");
            return Ok(answer);
        }

        let enriched = build_context_message(question, &hits);
        let mut answer = self.ask(RAG_SYSTEM_PROMPT, &enriched, started).await?;
        answer.used_rag = true;
        answer.found_chunks = hits.len();
        answer.relevance_scores = hits.iter().map(|h| h.score).collect();
        answer.sources = unique_sources(&hits);
        Ok(answer)
    }

    /// Same question, no retrieval.
    pub async fn query_without_rag(&self, question: &str) -> Result<RagAnswer, LlmError> {
        let started = Instant::now();
        self.ask(PLAIN_SYSTEM_PROMPT, question, started).await
    }

    /// Run the question with and without retrieval, sequentially.
    pub async fn compare_answers(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<RagComparison, LlmError> {
        let without_rag = self.query_without_rag(question).await?;
        let with_rag = self.query_with_rag(question, top_k, None).await?;
        Ok(RagComparison {
            question: question.to_string(),
            without_rag,
            with_rag,
        })
    }

    /// Three-mode comparison; the reranked mode filters at the moderate
    /// threshold before the stable re-sort.
    pub async fn compare_with_reranking(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<RerankComparison, LlmError> {
        let without_rag = self.query_without_rag(question).await?;
        let with_rag = self.query_with_rag(question, top_k, None).await?;
        let with_reranking = self.query_reranked(question, top_k).await?;
        Ok(RerankComparison {
            question: question.to_string(),
            without_rag,
            with_rag,
            with_reranking,
        })
    }

    async fn query_reranked(&self, question: &str, top_k: usize) -> Result<RagAnswer, LlmError> {
        let started = Instant::now();

        // Over-fetch, then let the reranker filter and re-sort.
        let hits = {
            let index = self.index.read().await;
            match index.search(question, top_k * 2, None) {
                Ok(hits) => hits,
                Err(_) => Vec::new(),
            }
        };
        let mut hits = Reranker::process(question, hits, Some(threshold::MODERATE), true);
        hits.truncate(top_k);

        if hits.is_empty() {
            let mut answer = self.ask(PLAIN_SYSTEM_PROMPT, question, started).await?;
            answer.answer.push_str("\n\n(ответ без контекста базы знаний)");
            return Ok(answer);
        }

        let enriched = build_context_message(question, &hits);
        let mut answer = self.ask(RAG_SYSTEM_PROMPT, &enriched, started).await?;
        answer.used_rag = true;
        answer.found_chunks = hits.len();
        answer.relevance_scores = hits.iter().map(|h| h.score).collect();
        answer.sources = unique_sources(&hits);
        Ok(answer)
    }

    /// One-shot LLM call with no tools; the base of every query mode.
    async fn ask(
        &self,
        system_prompt: &str,
        user_message: &str,
        started: Instant,
    ) -> Result<RagAnswer, LlmError> {
        let messages = vec![Message::system(system_prompt), Message::user(user_message)];
        let response = self.llm.chat(&messages, &[], None, "rag-query").await?;
        let usage = response.usage;
        let choice = response.into_first_choice()?;
        let answer = choice.message.content.unwrap_or_default();
        debug!(duration_ms = started.elapsed().as_millis() as u64, "rag query answered");

        Ok(RagAnswer {
            answer,
            used_rag: false,
            found_chunks: 0,
            relevance_scores: Vec::new(),
            sources: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
        })
    }
}

/// Delimited context block with numbered sources and scores, followed by the
/// question.
fn build_context_message(question: &str, hits: &[SearchHit]) -> String {
    let mut out = String::from("Контекст из базы знаний:\n==========\n");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} (релевантность {:.2})\n{}\n\n",
            i + 1,
            hit.source,
            hit.score,
            hit.content.trim(),
        ));
    }
    out.push_str("==========\n\nВопрос: ");
    out.push_str(question);
    out
}

fn unique_sources(hits: &[SearchHit]) -> Vec<String> {
    let mut sources = Vec::new();
    for hit in hits {
        if !sources.contains(&hit.source) {
            sources.push(hit.source.clone());
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(source: &str, score: f32) -> SearchHit {
        SearchHit {
            id: format!("{source}#0"),
            source: source.to_string(),
            content: "содержимое".to_string(),
            score,
        }
    }

    #[test]
    fn context_message_numbers_sources_and_scores() {
        let message =
            build_context_message("что это?", &[hit("a.md", 0.91), hit("b.md", 0.42)]);
        assert!(message.contains("[1] a.md (релевантность 0.91)"));
        assert!(message.contains("[2] b.md (релевантность 0.42)"));
        assert!(message.ends_with("Вопрос: что это?"));
    }

    #[test]
    fn sources_deduplicate_in_order() {
        let sources = unique_sources(&[hit("a.md", 0.9), hit("b.md", 0.8), hit("a.md", 0.7)]);
        assert_eq!(sources, vec!["a.md".to_string(), "b.md".to_string()]);
    }
}
