//! TF-IDF document index with top-K cosine search and relevance filtering.
//!
//! The engine is deliberately self-contained: documents are split into
//! overlapping character windows, embedded with a TF-IDF model fitted on the
//! indexed corpus, and searched by cosine similarity over L2-normalised
//! vectors. Persistence keeps the fitted model next to the embeddings so a
//! loaded index stays usable for new query embedding.

pub mod chunker;
pub mod embedder;
pub mod index;
pub mod reranker;

pub use chunker::{Chunk, Chunker};
pub use embedder::{cosine_similarity, TfIdfEmbedder, TfIdfModel};
pub use index::{IndexInfo, IndexedChunk, SearchHit, VectorIndex};
pub use reranker::Reranker;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("index has no fitted model — re-index documents before searching")]
    ModelMissing,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
