//! Hybrid search
//!
//! Issues the vector and keyword queries concurrently, oversamples both
//! result sets, and fuses them with the configured method. Pure vector and
//! pure keyword search types are exposed for comparison and debugging.
//! Search never takes document locks: reads observe any committed state.

mod fusion;

pub use fusion::{adaptive_alpha, rrf_fuse, weighted_fuse, FusedHit};

use crate::config::HybridConfig;
use crate::embed::Vectorizer;
use crate::index::{AdapterQuery, DocFilter, IndexAdapter, QueryHit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    #[error("Vector search failed: {0}")]
    VectorSearchError(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearchError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Fusion method for hybrid queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    Rrf,
    Weighted,
    Adaptive,
}

impl std::str::FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rrf" => Ok(SearchMethod::Rrf),
            "weighted" => Ok(SearchMethod::Weighted),
            "adaptive" => Ok(SearchMethod::Adaptive),
            other => Err(format!("unknown fusion method: {}", other)),
        }
    }
}

/// Which index (or both) a search runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchType {
    Vector,
    Keyword,
    Hybrid,
}

impl std::str::FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vector" => Ok(SearchType::Vector),
            "keyword" => Ok(SearchType::Keyword),
            "hybrid" => Ok(SearchType::Hybrid),
            other => Err(format!("unknown search type: {}", other)),
        }
    }
}

/// A search request
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub search_type: SearchType,
    /// Fusion method; the configured default applies when absent
    pub method: Option<SearchMethod>,
    /// Optional doc-id restriction, passed through to both adapters
    pub filter: Option<DocFilter>,
}

impl SearchQuery {
    pub fn hybrid(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            search_type: SearchType::Hybrid,
            method: None,
            filter: None,
        }
    }
}

/// Oversampling: both adapters are asked for
/// `max(top_k * FACTOR, top_k + FLOOR)` hits before fusion
const OVERSAMPLE_FACTOR: usize = 3;
const OVERSAMPLE_FLOOR: usize = 20;

fn oversampled(top_k: usize) -> usize {
    (top_k * OVERSAMPLE_FACTOR).max(top_k + OVERSAMPLE_FLOOR)
}

/// Hybrid searcher over the two adapters
pub struct HybridSearcher {
    vector: Arc<dyn IndexAdapter>,
    keyword: Arc<dyn IndexAdapter>,
    vectorizer: Arc<dyn Vectorizer>,
    config: HybridConfig,
}

impl HybridSearcher {
    pub fn new(
        vector: Arc<dyn IndexAdapter>,
        keyword: Arc<dyn IndexAdapter>,
        vectorizer: Arc<dyn Vectorizer>,
        config: HybridConfig,
    ) -> Self {
        Self {
            vector,
            keyword,
            vectorizer,
            config,
        }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<FusedHit>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if query.top_k == 0 {
            return Err(SearchError::InvalidQuery("top_k must be positive".to_string()));
        }

        match query.search_type {
            SearchType::Vector => {
                let hits = self.vector_search(&query.text, query.top_k, query.filter.as_ref())?;
                Ok(as_fused_vector(hits))
            }
            SearchType::Keyword => {
                let hits = self.keyword_search(&query.text, query.top_k, query.filter.as_ref())?;
                Ok(as_fused_keyword(hits))
            }
            SearchType::Hybrid => self.hybrid_search(query),
        }
    }

    fn hybrid_search(&self, query: &SearchQuery) -> Result<Vec<FusedHit>, SearchError> {
        let fetch = oversampled(query.top_k);

        // Embed up front; the adapter queries then run concurrently
        let embedding = self
            .vectorizer
            .embed_query(&query.text)
            .map_err(|e| SearchError::EmbeddingError(e.to_string()))?;

        let (vector_hits, keyword_hits) = std::thread::scope(|scope| {
            let vector_task = scope.spawn(|| {
                self.vector
                    .query(
                        AdapterQuery::Embedding(&embedding),
                        fetch,
                        query.filter.as_ref(),
                    )
                    .map_err(|e| SearchError::VectorSearchError(e.to_string()))
            });
            let keyword_hits = self
                .keyword
                .query(AdapterQuery::Text(&query.text), fetch, query.filter.as_ref())
                .map_err(|e| SearchError::KeywordSearchError(e.to_string()));
            let vector_hits = vector_task
                .join()
                .unwrap_or_else(|_| Err(SearchError::VectorSearchError("panicked".to_string())));
            (vector_hits, keyword_hits)
        });
        let vector_hits = vector_hits?;
        let keyword_hits = keyword_hits?;

        let method = query.method.unwrap_or_else(|| self.default_method());
        let fused = match method {
            SearchMethod::Rrf => rrf_fuse(
                &vector_hits,
                &keyword_hits,
                self.config.rrf_k,
                query.top_k,
            ),
            SearchMethod::Weighted => weighted_fuse(
                &vector_hits,
                &keyword_hits,
                self.config.alpha,
                self.config.consensus_boost,
                query.top_k,
            ),
            SearchMethod::Adaptive => {
                let alpha = adaptive_alpha(&query.text, self.config.alpha);
                tracing::debug!("Adaptive fusion chose alpha {}", alpha);
                weighted_fuse(
                    &vector_hits,
                    &keyword_hits,
                    alpha,
                    self.config.consensus_boost,
                    query.top_k,
                )
            }
        };

        Ok(fused)
    }

    fn vector_search(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&DocFilter>,
    ) -> Result<Vec<QueryHit>, SearchError> {
        let embedding = self
            .vectorizer
            .embed_query(text)
            .map_err(|e| SearchError::EmbeddingError(e.to_string()))?;
        self.vector
            .query(AdapterQuery::Embedding(&embedding), top_k, filter)
            .map_err(|e| SearchError::VectorSearchError(e.to_string()))
    }

    fn keyword_search(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&DocFilter>,
    ) -> Result<Vec<QueryHit>, SearchError> {
        self.keyword
            .query(AdapterQuery::Text(text), top_k, filter)
            .map_err(|e| SearchError::KeywordSearchError(e.to_string()))
    }

    fn default_method(&self) -> SearchMethod {
        self.config
            .default_method
            .parse()
            .unwrap_or(SearchMethod::Rrf)
    }
}

fn as_fused_vector(hits: Vec<QueryHit>) -> Vec<FusedHit> {
    hits.into_iter()
        .enumerate()
        .map(|(rank0, hit)| FusedHit {
            chunk: hit.chunk,
            score: hit.score,
            vector_rank: Some(rank0 + 1),
            keyword_rank: None,
            text: hit.text,
            payload: hit.payload,
        })
        .collect()
}

fn as_fused_keyword(hits: Vec<QueryHit>) -> Vec<FusedHit> {
    hits.into_iter()
        .enumerate()
        .map(|(rank0, hit)| FusedHit {
            chunk: hit.chunk,
            score: hit.score,
            vector_rank: None,
            keyword_rank: Some(rank0 + 1),
            text: hit.text,
            payload: hit.payload,
        })
        .collect()
}
