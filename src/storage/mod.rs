//! Storage context
//!
//! The six persistent stores are logically separate, each under its own
//! directory, but their lifecycles are unified here so startup and
//! shutdown order is explicit: registry first (source of truth), then the
//! fingerprint store, artifact cache, and intent log, then the two index
//! adapters, and the job queue last.

use crate::cache::ArtifactCache;
use crate::config::Config;
use crate::error::Result;
use crate::fingerprint::FingerprintStore;
use crate::index::{KeywordStore, VectorStore};
use crate::intent::IntentLog;
use crate::queue::JobQueue;
use crate::registry::DocumentRegistry;
use std::sync::Arc;

/// Explicitly-constructed handle to every persistent store
pub struct StorageContext {
    pub registry: Arc<DocumentRegistry>,
    pub fingerprints: Arc<FingerprintStore>,
    pub cache: Arc<ArtifactCache>,
    pub intents: Arc<IntentLog>,
    pub vector: Arc<VectorStore>,
    pub keyword: Arc<KeywordStore>,
    pub queue: Arc<JobQueue>,
}

impl StorageContext {
    /// Open every store under the configured paths, creating directories
    /// as needed.
    pub fn open(config: &Config) -> Result<Self> {
        let paths = &config.paths;

        let registry = Arc::new(DocumentRegistry::open(&paths.registry)?);
        let fingerprints = Arc::new(FingerprintStore::open(&paths.fingerprint)?);
        let cache = Arc::new(ArtifactCache::open(
            &paths.cache,
            config.cache.enabled,
            config.cache.compress,
            config.cache.ttl_secs,
        )?);
        let intents = Arc::new(IntentLog::open(&paths.intent_log)?);
        let vector = Arc::new(VectorStore::open(&paths.vector, config.vector.dimensions)?);
        let keyword = Arc::new(KeywordStore::open(&paths.keyword)?);
        let queue = Arc::new(JobQueue::open(&paths.queue)?);

        tracing::info!(
            "Storage context opened (registry: {})",
            paths.registry.display()
        );

        Ok(Self {
            registry,
            fingerprints,
            cache,
            intents,
            vector,
            keyword,
            queue,
        })
    }
}
