use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::Chunk;
use crate::embedder::{cosine_similarity, TfIdfEmbedder, TfIdfModel};
use crate::{RagError, Result};

/// A chunk with its embedding, as stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub source: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// One search result with its cosine score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub source: String,
    pub content: String,
    pub score: f32,
}

/// Summary of the index state for the `rag_index_info` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub total_chunks: usize,
    pub total_documents: usize,
    pub vector_dimension: usize,
    pub searchable: bool,
    pub created_at: i64,
}

/// On-disk index format.
///
/// `model` is optional on deserialize so files written before the model was
/// persisted still load; such an index is not searchable until re-indexed.
#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    entries: Vec<IndexedChunk>,
    vector_dimension: usize,
    total_documents: usize,
    created_at: i64,
    #[serde(default)]
    model: Option<TfIdfModel>,
}

/// In-memory TF-IDF index over document chunks.
///
/// Not internally synchronised: callers wrap it in a read/write lock —
/// searches may run concurrently, indexing and loading take the writer side.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexedChunk>,
    embedder: TfIdfEmbedder,
    created_at: i64,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            embedder: TfIdfEmbedder::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the index can embed queries (a model is fitted or loaded).
    pub fn searchable(&self) -> bool {
        self.embedder.is_fitted()
    }

    /// Rebuild the index from `chunks`: fit the embedder on their contents,
    /// then store every chunk with its embedding. Replaces prior entries —
    /// refitting invalidates old vectors.
    pub fn index_chunks(&mut self, chunks: Vec<Chunk>) -> Result<usize> {
        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        self.embedder.fit(&contents);

        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = self.embedder.embed(&chunk.content)?;
            entries.push(IndexedChunk {
                id: chunk.id,
                source: chunk.source,
                content: chunk.content,
                embedding,
            });
        }

        self.entries = entries;
        self.created_at = chrono::Utc::now().timestamp_millis();
        info!(
            chunks = self.entries.len(),
            vector_dimension = self.embedder.vector_dimension(),
            "index rebuilt"
        );
        Ok(self.entries.len())
    }

    /// Top-K cosine search.
    ///
    /// An empty index returns an empty list. Entries without a fitted model
    /// (a legacy file loaded without one) return [`RagError::ModelMissing`]
    /// so the caller re-indexes instead of silently getting nothing.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        min_relevance: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if !self.embedder.is_fitted() {
            return Err(RagError::ModelMissing);
        }

        let query_vector = self.embedder.embed(query)?;

        let mut hits = Vec::new();
        for entry in &self.entries {
            let score = cosine_similarity(&query_vector, &entry.embedding)?;
            if let Some(min) = min_relevance {
                if score < min {
                    continue;
                }
            }
            hits.push(SearchHit {
                id: entry.id.clone(),
                source: entry.source.clone(),
                content: entry.content.clone(),
                score,
            });
        }

        // Stable sort: equal scores keep insertion order.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.embedder = TfIdfEmbedder::new();
        info!("index cleared");
    }

    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            total_chunks: self.entries.len(),
            total_documents: self.total_documents(),
            vector_dimension: self.embedder.vector_dimension(),
            searchable: self.searchable(),
            created_at: self.created_at,
        }
    }

    fn total_documents(&self) -> usize {
        let mut sources: Vec<&str> = self.entries.iter().map(|e| e.source.as_str()).collect();
        sources.sort();
        sources.dedup();
        sources.len()
    }

    /// Persist entries, metadata, and the fitted model as a single JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let persisted = PersistedIndex {
            entries: self.entries.clone(),
            vector_dimension: self.embedder.vector_dimension(),
            total_documents: self.total_documents(),
            created_at: self.created_at,
            model: self.embedder.model().cloned(),
        };
        let json = serde_json::to_string(&persisted)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), chunks = self.entries.len(), "index saved");
        Ok(())
    }

    /// Restore an index from disk. A file without a persisted model loads,
    /// but stays unsearchable until `index_chunks` runs again.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let persisted: PersistedIndex = serde_json::from_str(&json)?;

        let embedder = match persisted.model {
            Some(model) => TfIdfEmbedder::from_model(model),
            None => {
                warn!(
                    path = %path.display(),
                    "index file has no TF-IDF model — re-index before searching"
                );
                TfIdfEmbedder::new()
            }
        };

        info!(
            path = %path.display(),
            chunks = persisted.entries.len(),
            searchable = embedder.is_fitted(),
            "index loaded"
        );
        Ok(Self {
            entries: persisted.entries,
            embedder,
            created_at: persisted.created_at,
        })
    }
}
