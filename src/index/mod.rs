//! Index adapters
//!
//! Both search backends expose the same capability surface: add, delete,
//! query, count, exists, and a self-report of their doc-id contents used
//! by consistency checks. Adapters own their internal concurrency; callers
//! treat them as thread-safe black boxes.

use crate::source::ChunkId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub mod keyword;
pub mod vector;

pub use keyword::KeywordStore;
pub use vector::VectorStore;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Delete failed: {0}")]
    DeleteError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Adapter {kind:?} does not support this query form")]
    UnsupportedQuery { kind: AdapterKind },

    #[error("Chunk is missing its embedding: {0}")]
    MissingEmbedding(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

/// Identity of an index adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterKind {
    Vector,
    Keyword,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Vector => "vector",
            AdapterKind::Keyword => "keyword",
        }
    }
}

/// Metadata carried by every indexed chunk. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub doc_id: String,
    pub source: String,
    pub ordinal: u32,
    /// Indices into the document's pair list for pairs appearing in this
    /// chunk
    pub pair_refs: Vec<usize>,
    /// Content language tag if known
    pub language: Option<String>,
    /// How the source text was produced
    pub parse_method: String,
}

/// A chunk prepared for indexing: augmented text, optional embedding, and
/// payload
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub ordinal: u32,
    pub text: String,
    /// Required by the vector adapter, ignored by the keyword adapter
    pub embedding: Option<Vec<f32>>,
    pub payload: ChunkPayload,
}

impl IndexedChunk {
    pub fn chunk_id(&self) -> ChunkId {
        ChunkId::new(self.payload.doc_id.clone(), self.ordinal)
    }
}

/// Query input: an embedding for the vector adapter, text for the keyword
/// adapter
#[derive(Debug, Clone)]
pub enum AdapterQuery<'a> {
    Embedding(&'a [f32]),
    Text(&'a str),
}

/// One hit from an adapter query. Scores are raw and adapter-specific;
/// normalization happens in the fusion layer when the method requires it.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub chunk: ChunkId,
    pub score: f32,
    pub text: String,
    pub payload: ChunkPayload,
}

/// Optional restriction of results to a set of document ids
#[derive(Debug, Clone, Default)]
pub struct DocFilter {
    doc_ids: HashSet<String>,
}

impl DocFilter {
    pub fn new(doc_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            doc_ids: doc_ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.doc_ids.contains(doc_id)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.doc_ids.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }
}

/// Common capability surface of the two index backends
pub trait IndexAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Add chunks for a document. Idempotent w.r.t. `(doc_id, ordinal)`:
    /// repeats overwrite.
    fn add(&self, doc_id: &str, chunks: &[IndexedChunk]) -> Result<(), IndexError>;

    /// Remove all chunks for a document; succeeds if none exist.
    fn delete(&self, doc_id: &str) -> Result<(), IndexError>;

    /// Query for the top_k best-scoring chunks, optionally restricted to a
    /// doc-id set.
    fn query(
        &self,
        query: AdapterQuery<'_>,
        top_k: usize,
        filter: Option<&DocFilter>,
    ) -> Result<Vec<QueryHit>, IndexError>;

    /// Number of chunks indexed, for one document or in total.
    fn count(&self, doc_id: Option<&str>) -> Result<usize, IndexError>;

    fn exists(&self, doc_id: &str) -> Result<bool, IndexError> {
        Ok(self.count(Some(doc_id))? > 0)
    }

    /// Self-report of contents: doc id → chunk count. Drives consistency
    /// checks.
    fn doc_counts(&self) -> Result<HashMap<String, usize>, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_filter() {
        let filter = DocFilter::new(vec!["a".to_string(), "b".to_string()]);
        assert!(filter.contains("a"));
        assert!(!filter.contains("c"));
        assert!(!filter.is_empty());
    }

    #[test]
    fn test_chunk_id_from_indexed_chunk() {
        let chunk = IndexedChunk {
            ordinal: 3,
            text: "t".to_string(),
            embedding: None,
            payload: ChunkPayload {
                doc_id: "doc".to_string(),
                source: "/s".to_string(),
                ordinal: 3,
                pair_refs: vec![],
                language: None,
                parse_method: "plain".to_string(),
            },
        };
        assert_eq!(chunk.chunk_id(), ChunkId::new("doc", 3));
    }
}
