//! Result fusion for hybrid search
//!
//! Combines the vector and keyword result lists into one ranking.
//! Reciprocal Rank Fusion works on ranks alone and needs no score
//! normalization; Weighted fusion min-max normalizes each list before
//! blending. Adaptive search classifies the query to pick the blend
//! weight, then runs Weighted.

use crate::index::QueryHit;
use crate::source::ChunkId;
use ahash::AHashMap;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// A hit after fusion, carrying its per-adapter ranks for tie-breaking
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk: ChunkId,
    pub score: f32,
    /// 1-based rank in the vector result list, if present there
    pub vector_rank: Option<usize>,
    /// 1-based rank in the keyword result list, if present there
    pub keyword_rank: Option<usize>,
    pub text: String,
    pub payload: crate::index::ChunkPayload,
}

struct Accumulator {
    score: f32,
    vector_rank: Option<usize>,
    keyword_rank: Option<usize>,
    text: String,
    payload: Option<crate::index::ChunkPayload>,
}

/// Reciprocal Rank Fusion: each hit at 1-based rank `r` contributes
/// `1 / (k + r)`; contributions sum per chunk. Robust to score-scale
/// differences between the two adapters.
pub fn rrf_fuse(
    vector_hits: &[QueryHit],
    keyword_hits: &[QueryHit],
    rrf_k: f32,
    top_k: usize,
) -> Vec<FusedHit> {
    let mut acc: AHashMap<ChunkId, Accumulator> = AHashMap::new();

    for (rank0, hit) in vector_hits.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = acc.entry(hit.chunk.clone()).or_insert_with(|| Accumulator {
            score: 0.0,
            vector_rank: None,
            keyword_rank: None,
            text: hit.text.clone(),
            payload: None,
        });
        entry.score += 1.0 / (rrf_k + rank as f32);
        entry.vector_rank = Some(rank);
        entry.payload.get_or_insert_with(|| hit.payload.clone());
    }

    for (rank0, hit) in keyword_hits.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = acc.entry(hit.chunk.clone()).or_insert_with(|| Accumulator {
            score: 0.0,
            vector_rank: None,
            keyword_rank: None,
            text: hit.text.clone(),
            payload: None,
        });
        entry.score += 1.0 / (rrf_k + rank as f32);
        entry.keyword_rank = Some(rank);
        entry.payload.get_or_insert_with(|| hit.payload.clone());
    }

    finish(acc, top_k)
}

/// Weighted fusion: min-max normalize each list to [0, 1], blend with
/// `alpha * vector + (1 - alpha) * keyword`, and apply a multiplicative
/// consensus boost to chunks present in both lists.
pub fn weighted_fuse(
    vector_hits: &[QueryHit],
    keyword_hits: &[QueryHit],
    alpha: f32,
    consensus_boost: f32,
    top_k: usize,
) -> Vec<FusedHit> {
    let vector_norm = min_max_normalize(vector_hits);
    let keyword_norm = min_max_normalize(keyword_hits);

    let mut acc: AHashMap<ChunkId, Accumulator> = AHashMap::new();

    for (rank0, (hit, norm)) in vector_hits.iter().zip(vector_norm).enumerate() {
        let entry = acc.entry(hit.chunk.clone()).or_insert_with(|| Accumulator {
            score: 0.0,
            vector_rank: None,
            keyword_rank: None,
            text: hit.text.clone(),
            payload: None,
        });
        entry.score += alpha * norm;
        entry.vector_rank = Some(rank0 + 1);
        entry.payload.get_or_insert_with(|| hit.payload.clone());
    }

    for (rank0, (hit, norm)) in keyword_hits.iter().zip(keyword_norm).enumerate() {
        let entry = acc.entry(hit.chunk.clone()).or_insert_with(|| Accumulator {
            score: 0.0,
            vector_rank: None,
            keyword_rank: None,
            text: hit.text.clone(),
            payload: None,
        });
        entry.score += (1.0 - alpha) * norm;
        entry.keyword_rank = Some(rank0 + 1);
        entry.payload.get_or_insert_with(|| hit.payload.clone());
    }

    for entry in acc.values_mut() {
        if entry.vector_rank.is_some() && entry.keyword_rank.is_some() {
            entry.score *= consensus_boost;
        }
    }

    finish(acc, top_k)
}

fn finish(acc: AHashMap<ChunkId, Accumulator>, top_k: usize) -> Vec<FusedHit> {
    let mut hits: Vec<FusedHit> = acc
        .into_iter()
        .map(|(chunk, entry)| {
            let payload = entry.payload.unwrap_or(crate::index::ChunkPayload {
                doc_id: chunk.doc_id.clone(),
                source: String::new(),
                ordinal: chunk.ordinal,
                pair_refs: vec![],
                language: None,
                parse_method: String::new(),
            });
            FusedHit {
                chunk,
                score: entry.score,
                vector_rank: entry.vector_rank,
                keyword_rank: entry.keyword_rank,
                text: entry.text,
                payload,
            }
        })
        .collect();

    hits.sort_by(compare_fused);
    hits.truncate(top_k);
    hits
}

/// Descending score; ties go to the better (lower) vector rank, then to
/// the lexicographically smaller chunk id.
fn compare_fused(a: &FusedHit, b: &FusedHit) -> Ordering {
    match b.score.partial_cmp(&a.score) {
        Some(Ordering::Equal) | None => {}
        Some(order) => return order,
    }
    let a_vec = a.vector_rank.unwrap_or(usize::MAX);
    let b_vec = b.vector_rank.unwrap_or(usize::MAX);
    a_vec.cmp(&b_vec).then_with(|| a.chunk.cmp(&b.chunk))
}

/// Min-max normalize scores to [0, 1]. BM25 scores can be negative, so the
/// absolute value is taken first. A constant list maps to all ones.
fn min_max_normalize(hits: &[QueryHit]) -> Vec<f32> {
    if hits.is_empty() {
        return Vec::new();
    }
    let scores: Vec<f32> = hits.iter().map(|h| h.score.abs()).collect();
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        return vec![1.0; hits.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Query classification for Adaptive fusion.
///
/// Model-number-shaped queries (an all-caps-and-digits token or an
/// explicit long part number) shift weight to the keyword side; queries of
/// overwhelmingly plain dictionary words shift to the vector side;
/// everything else stays balanced at the configured alpha.
pub fn adaptive_alpha(query: &str, default_alpha: f32) -> f32 {
    static MODEL_RE: OnceLock<Regex> = OnceLock::new();
    let model_re = MODEL_RE
        .get_or_init(|| Regex::new(r"\b(?:[A-Z]{2,}[A-Z0-9\-]*\d[A-Z0-9\-]*|\d{5,})\b").unwrap());

    if model_re.is_match(query) {
        return 0.3;
    }

    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.is_empty() {
        return default_alpha;
    }
    let wordlike = tokens
        .iter()
        .filter(|t| t.chars().all(|c| c.is_alphabetic()))
        .count();
    if wordlike * 5 >= tokens.len() * 4 {
        return 0.8;
    }

    default_alpha
}
