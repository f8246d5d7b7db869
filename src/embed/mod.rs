//! Embedding and keyword-augmentation capabilities
//!
//! The engine consumes a `Vectorizer` for dense embeddings and an optional
//! `KeywordGenerator` that augments chunk text with extra tokens before
//! indexing. The FastEmbed-backed vectorizer is the default local
//! implementation; LLM-backed keyword generators live outside this crate.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Capability producing dense embeddings for chunk and query text.
///
/// Dimensions are fixed at configuration; the vector store refuses writes
/// that disagree.
pub trait Vectorizer: Send + Sync {
    /// Embed a batch of texts, one vector per input
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single query string
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::GenerationError("No embedding generated".to_string()))
    }

    /// Embedding dimension
    fn dimensions(&self) -> usize;
}

/// Capability generating extra keyword tokens for a chunk.
///
/// Augmentation failure is non-fatal: the chunk is indexed without the
/// extra tokens.
pub trait KeywordGenerator: Send + Sync {
    fn augment(&self, chunk_text: &str, doc_context: &str) -> Result<Vec<String>, EmbedError>;
}

/// FastEmbed vectorizer for local embedding generation
///
/// Uses all-MiniLM-L6-v2 (384 dimensions) by default. Models are
/// downloaded on demand to the huggingface cache on first use.
pub struct FastEmbedVectorizer {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastEmbedVectorizer {
    pub fn new(model_name: &str) -> Result<Self, EmbedError> {
        let embedding_model = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            _ => {
                return Err(EmbedError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };

        let dimensions = match embedding_model {
            EmbeddingModel::BGEBaseENV15 => 768,
            _ => 384,
        };

        tracing::info!(
            "Initializing embedding model: {} ({}D, downloaded on first use if not cached)",
            model_name,
            dimensions
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbedError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Create a vectorizer with the default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbedError> {
        Self::new("all-MiniLM-L6-v2")
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl Vectorizer for FastEmbedVectorizer {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbedError::InvalidInput(
                "Cannot embed empty text".to_string(),
            ));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedError::GenerationError(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimensions {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Keyword generator that never produces tokens. Used when augmentation is
/// disabled or no LLM backend is wired.
pub struct NoopKeywordGenerator;

impl KeywordGenerator for NoopKeywordGenerator {
    fn augment(&self, _chunk_text: &str, _doc_context: &str) -> Result<Vec<String>, EmbedError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires model download - run with: cargo test -- --ignored
    fn test_fastembed_roundtrip() {
        let vectorizer = FastEmbedVectorizer::with_default_model().unwrap();
        assert_eq!(vectorizer.dimensions(), 384);

        let vectors = vectorizer
            .embed(&["laser power sensor".to_string()])
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 384);
    }

    #[test]
    fn test_unsupported_model_rejected() {
        let result = FastEmbedVectorizer::new("no-such-model");
        assert!(matches!(result, Err(EmbedError::InitializationError(_))));
    }

    #[test]
    fn test_noop_generator() {
        let tokens = NoopKeywordGenerator.augment("chunk", "context").unwrap();
        assert!(tokens.is_empty());
    }
}
