//! Shared test fixtures: deterministic stub capabilities and a fully
//! wired engine over a temp directory.

#![allow(dead_code)]

use sheaf::config::Config;
use sheaf::embed::{EmbedError, KeywordGenerator, Vectorizer};
use sheaf::extract::{
    ContentExtractor, ExtractMode, Extraction, ExtractError, ProcessingOptions, TextExtractor,
};
use sheaf::index::{
    AdapterKind, AdapterQuery, DocFilter, IndexAdapter, IndexError, IndexedChunk, QueryHit,
};
use sheaf::manager::IndexManager;
use sheaf::search::HybridSearcher;
use sheaf::storage::StorageContext;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DIM: usize = 64;

/// Extractor that parses text/markdown like the built-in one but counts
/// invocations, so tests can assert cache behaviour.
pub struct CountingExtractor {
    inner: TextExtractor,
    pub calls: Arc<AtomicUsize>,
}

impl CountingExtractor {
    pub fn new(calls: Arc<AtomicUsize>) -> Self {
        Self {
            inner: TextExtractor::new(),
            calls,
        }
    }
}

impl ContentExtractor for CountingExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        mime_hint: Option<&str>,
        mode: ExtractMode,
        prompt: &str,
    ) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(bytes, mime_hint, mode, prompt)
    }

    fn version(&self) -> &str {
        "stub/1"
    }
}

/// Deterministic bag-of-words embedding: each token hashes into a bucket.
/// Cosine similarity then reflects token overlap, which is enough for the
/// retrieval assertions in these tests.
pub struct StubVectorizer;

impl StubVectorizer {
    fn embed_one(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.to_ascii_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % DIM;
            v[bucket] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

impl Vectorizer for StubVectorizer {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Keyword generator emitting a fixed marker token, so augmentation is
/// observable in the indexed text.
pub struct MarkerKeywordGenerator;

impl KeywordGenerator for MarkerKeywordGenerator {
    fn augment(&self, _chunk_text: &str, _doc_context: &str) -> Result<Vec<String>, EmbedError> {
        Ok(vec!["augmarker".to_string()])
    }
}

/// Adapter wrapper that fails `add` a configured number of times before
/// delegating, to simulate crashes between the two adapter writes.
pub struct FlakyAdapter {
    inner: Arc<dyn IndexAdapter>,
    remaining_failures: AtomicUsize,
}

impl FlakyAdapter {
    pub fn new(inner: Arc<dyn IndexAdapter>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
        }
    }
}

impl IndexAdapter for FlakyAdapter {
    fn kind(&self) -> AdapterKind {
        self.inner.kind()
    }

    fn add(&self, doc_id: &str, chunks: &[IndexedChunk]) -> Result<(), IndexError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(IndexError::InsertError(
                "injected adapter failure".to_string(),
            ));
        }
        self.inner.add(doc_id, chunks)
    }

    fn delete(&self, doc_id: &str) -> Result<(), IndexError> {
        self.inner.delete(doc_id)
    }

    fn query(
        &self,
        query: AdapterQuery<'_>,
        top_k: usize,
        filter: Option<&DocFilter>,
    ) -> Result<Vec<QueryHit>, IndexError> {
        self.inner.query(query, top_k, filter)
    }

    fn count(&self, doc_id: Option<&str>) -> Result<usize, IndexError> {
        self.inner.count(doc_id)
    }

    fn doc_counts(&self) -> Result<HashMap<String, usize>, IndexError> {
        self.inner.doc_counts()
    }
}

pub struct TestEngine {
    pub config: Config,
    pub ctx: StorageContext,
    pub manager: Arc<IndexManager>,
    pub searcher: Arc<HybridSearcher>,
    pub extract_calls: Arc<AtomicUsize>,
}

/// Wire an engine over `root` with stub capabilities. `keyword_failures`
/// injects that many `add` failures into the keyword adapter.
pub fn build_engine(root: &Path, keyword_failures: usize) -> TestEngine {
    let mut config = Config::with_root(root);
    config.vector.dimensions = DIM;
    config.workers.max_attempts = 2;

    let ctx = StorageContext::open(&config).expect("storage context");

    let extract_calls = Arc::new(AtomicUsize::new(0));
    let extractor: Arc<dyn ContentExtractor> =
        Arc::new(CountingExtractor::new(extract_calls.clone()));
    let vectorizer: Arc<dyn Vectorizer> = Arc::new(StubVectorizer);

    let keyword: Arc<dyn IndexAdapter> = if keyword_failures > 0 {
        Arc::new(FlakyAdapter::new(ctx.keyword.clone(), keyword_failures))
    } else {
        ctx.keyword.clone()
    };

    let manager = Arc::new(IndexManager::new(
        ctx.registry.clone(),
        ctx.fingerprints.clone(),
        ctx.cache.clone(),
        ctx.vector.clone(),
        keyword.clone(),
        ctx.intents.clone(),
        extractor,
        vectorizer.clone(),
        Some(Arc::new(MarkerKeywordGenerator)),
        config.clone(),
    ));

    let searcher = Arc::new(HybridSearcher::new(
        ctx.vector.clone(),
        ctx.keyword.clone(),
        vectorizer,
        config.hybrid.clone(),
    ));

    TestEngine {
        config,
        ctx,
        manager,
        searcher,
        extract_calls,
    }
}

pub fn engine(root: &Path) -> TestEngine {
    build_engine(root, 0)
}

pub fn options(mode: ExtractMode, chunk_size: usize, overlap: usize) -> ProcessingOptions {
    ProcessingOptions::new(mode, chunk_size, overlap)
}

/// Write a file under `dir` and return its source handle
pub fn write_source(dir: &Path, name: &str, contents: &str) -> sheaf::source::SourceHandle {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write source file");
    sheaf::source::SourceHandle::Path(path)
}

/// A small datasheet-like document with an embedded pairs block and a
/// unique token for retrieval assertions
pub fn datasheet_text(unique_token: &str) -> String {
    format!(
        "Thermal sensor family overview.\n\
         The {} detector assembly couples a thermopile disc to a heat sink.\n\
         Metadata: {{'pairs': [('PM10K', '2293937'), ('PM3K', '1174268')]}}\n\
         Calibration is traceable and the sensor housing is anodized.\n\
         Operating instructions continue here with mounting torque values.\n",
        unique_token
    )
}
