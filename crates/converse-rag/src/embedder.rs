use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

/// Vocabulary cap: the top terms by document frequency.
pub const MAX_VOCABULARY: usize = 5000;
/// Tokens of length ≤ 2 are dropped.
const MIN_TOKEN_CHARS: usize = 3;

/// The fitted TF-IDF model. Required to embed queries against an index;
/// persisted alongside the embeddings for that reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfIdfModel {
    /// term → vector position.
    pub vocabulary: HashMap<String, usize>,
    /// term → log10(N / df).
    pub idf: HashMap<String, f64>,
    pub vector_dimension: usize,
}

/// Lowercase, keep Latin alphanumerics and Cyrillic letters, split on
/// everything else, drop short tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || ('а'..='я').contains(&c) || c == 'ё' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// TF-IDF embedder producing L2-normalised vectors.
#[derive(Debug, Clone, Default)]
pub struct TfIdfEmbedder {
    model: Option<TfIdfModel>,
}

impl TfIdfEmbedder {
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Restore an embedder from a persisted model.
    pub fn from_model(model: TfIdfModel) -> Self {
        Self { model: Some(model) }
    }

    pub fn model(&self) -> Option<&TfIdfModel> {
        self.model.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn vector_dimension(&self) -> usize {
        self.model.as_ref().map(|m| m.vector_dimension).unwrap_or(0)
    }

    /// Build the vocabulary and IDF table from the corpus.
    ///
    /// The vocabulary keeps the top [`MAX_VOCABULARY`] terms by document
    /// frequency; ties break lexicographically so fitting is deterministic.
    pub fn fit(&mut self, documents: &[String]) {
        let total_docs = documents.len().max(1);

        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let mut seen: Vec<String> = tokenize(doc);
            seen.sort();
            seen.dedup();
            for term in seen {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let mut terms: Vec<(String, usize)> = document_frequency.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(MAX_VOCABULARY);

        let mut vocabulary = HashMap::with_capacity(terms.len());
        let mut idf = HashMap::with_capacity(terms.len());
        for (position, (term, df)) in terms.into_iter().enumerate() {
            idf.insert(term.clone(), (total_docs as f64 / df as f64).log10());
            vocabulary.insert(term, position);
        }

        let vector_dimension = vocabulary.len();
        debug!(
            documents = total_docs,
            vector_dimension, "fitted TF-IDF model"
        );
        self.model = Some(TfIdfModel {
            vocabulary,
            idf,
            vector_dimension,
        });
    }

    /// Embed `text` into an L2-normalised TF-IDF vector.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.as_ref().ok_or(RagError::ModelMissing)?;

        let mut vector = vec![0.0f32; model.vector_dimension];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vector);
        }

        let mut term_frequency: HashMap<&str, usize> = HashMap::new();
        for token in &tokens {
            *term_frequency.entry(token.as_str()).or_insert(0) += 1;
        }

        for (term, count) in term_frequency {
            if let (Some(&position), Some(&idf)) =
                (model.vocabulary.get(term), model.idf.get(term))
            {
                let tf = count as f64 / tokens.len() as f64;
                vector[position] = (tf * idf) as f32;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}

/// Dot product of two pre-normalised vectors.
///
/// Inputs are assumed L2-normalised; a length mismatch is a definite error,
/// never a silent zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Result<f32> {
    if left.len() != right.len() {
        return Err(RagError::DimensionMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    Ok(left.iter().zip(right).map(|(a, b)| a * b).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tokenizer_keeps_latin_and_cyrillic_drops_short() {
        let tokens = tokenize("Kotlin — это JVM-язык! a bb ёжик");
        assert_eq!(tokens, vec!["kotlin", "это", "jvm", "язык", "ёжик"]);
    }

    #[test]
    fn embed_requires_a_fitted_model() {
        let embedder = TfIdfEmbedder::new();
        assert!(matches!(embedder.embed("query"), Err(RagError::ModelMissing)));
    }

    #[test]
    fn embeddings_are_normalised() {
        let mut embedder = TfIdfEmbedder::new();
        embedder.fit(&docs(&[
            "kotlin coroutines are lightweight",
            "rust ownership prevents races",
            "kotlin flows stream values",
        ]));
        let vector = embedder.embed("kotlin coroutines").expect("embed");
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3 || norm == 0.0);
    }

    #[test]
    fn self_similarity_is_one() {
        let mut embedder = TfIdfEmbedder::new();
        embedder.fit(&docs(&[
            "кошки ловят мышей ночью",
            "собаки охраняют двор днём",
        ]));
        let vector = embedder.embed("кошки ловят мышей").expect("embed");
        let score = cosine_similarity(&vector, &vector).expect("cosine");
        assert!(score >= 0.999);
    }

    #[test]
    fn cosine_rejects_dimension_mismatch() {
        let result = cosine_similarity(&[1.0, 0.0], &[1.0]);
        assert!(matches!(
            result,
            Err(RagError::DimensionMismatch { left: 2, right: 1 })
        ));
    }

    #[test]
    fn vocabulary_is_capped_and_deterministic() {
        let mut embedder = TfIdfEmbedder::new();
        embedder.fit(&docs(&["alpha beta gamma", "alpha beta", "alpha"]));
        let model = embedder.model().expect("model");
        assert_eq!(model.vector_dimension, 3);
        // alpha has the highest df and therefore the first position.
        assert_eq!(model.vocabulary["alpha"], 0);
    }
}
