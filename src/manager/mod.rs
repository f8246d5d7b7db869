//! Index manager
//!
//! The transactional façade that carries a detected change across both
//! index adapters and the registry. Every mutating operation follows the
//! intent-log protocol: plan the primitive steps, announce them durably,
//! execute with delete-before-add ordering, commit, and replay anything
//! left `InProgress` after a crash. Adapters' idempotent add/delete make
//! replay safe.

use crate::cache::{Artifact, ArtifactCache};
use crate::chunk::{chunk_text, pair_refs};
use crate::config::Config;
use crate::detect::{self, AdapterCounts, ChangeKind};
use crate::embed::{KeywordGenerator, Vectorizer};
use crate::error::{Result, SheafError};
use crate::extract::{
    extract_with_deadline, ContentExtractor, Extraction, ProcessingOptions,
};
use crate::fingerprint::FingerprintStore;
use crate::index::{AdapterKind, ChunkPayload, IndexAdapter, IndexedChunk};
use crate::intent::{IntentLog, IntentRecord, IntentState, IntentStep, OpKind, StepKind};
use crate::registry::{
    AdapterReport, ConsistencyReport, ConsistencyStatus, DocumentRecord, DocumentRegistry,
    DocumentState,
};
use crate::source::{document_id, Fingerprint, SourceHandle, SourceMeta};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, observed at step boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out with `SheafError::Cancelled` if cancellation was requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SheafError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of an ingest operation
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub doc_id: String,
    pub change: ChangeKind,
    pub chunk_count: usize,
    pub pair_count: usize,
}

/// What to remove: everything for a source, or one document id
#[derive(Debug, Clone)]
pub enum RemoveTarget {
    Source(SourceHandle),
    DocId(String),
}

/// Result of a repair pass
#[derive(Debug, Default)]
pub struct RepairSummary {
    pub examined: usize,
    pub repaired: usize,
    pub failed: Vec<(String, String)>,
}

/// Transactional façade over the registry, both adapters, the cache, the
/// fingerprint store, and the intent log.
///
/// Callers are expected to serialize mutating operations per document (the
/// worker pool's doc-keyed mutex does this); reads never take locks here.
pub struct IndexManager {
    registry: Arc<DocumentRegistry>,
    fingerprints: Arc<FingerprintStore>,
    cache: Arc<ArtifactCache>,
    vector: Arc<dyn IndexAdapter>,
    keyword: Arc<dyn IndexAdapter>,
    intents: Arc<IntentLog>,
    extractor: Arc<dyn ContentExtractor>,
    vectorizer: Arc<dyn Vectorizer>,
    keywords: Option<Arc<dyn KeywordGenerator>>,
    config: Config,
}

impl IndexManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DocumentRegistry>,
        fingerprints: Arc<FingerprintStore>,
        cache: Arc<ArtifactCache>,
        vector: Arc<dyn IndexAdapter>,
        keyword: Arc<dyn IndexAdapter>,
        intents: Arc<IntentLog>,
        extractor: Arc<dyn ContentExtractor>,
        vectorizer: Arc<dyn Vectorizer>,
        keywords: Option<Arc<dyn KeywordGenerator>>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            fingerprints,
            cache,
            vector,
            keyword,
            intents,
            extractor,
            vectorizer,
            keywords,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn fingerprints(&self) -> &Arc<FingerprintStore> {
        &self.fingerprints
    }

    pub fn intents(&self) -> &Arc<IntentLog> {
        &self.intents
    }

    /// Ingest a source whose bytes the caller already holds.
    ///
    /// Runs change detection first and only does the expensive work the
    /// detected `ChangeKind` prescribes.
    pub fn ingest(
        &self,
        handle: &SourceHandle,
        bytes: &[u8],
        options: &ProcessingOptions,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<IngestOutcome> {
        cancel.checkpoint()?;

        let source_key = handle.normalized();
        let meta = match handle {
            SourceHandle::Path(p) => SourceMeta::from_path(p),
            SourceHandle::Url(_) => SourceMeta {
                name: Some(handle.display_name()),
                ..Default::default()
            },
        };
        let fingerprint = Fingerprint::of_bytes(bytes, &meta);
        let options_fp = options.fingerprint();

        let existing = self.registry.find_by_source(&source_key)?;
        let counts = match &existing {
            Some(record) => Some(AdapterCounts {
                vector: self.vector.count(Some(&record.doc_id))?,
                keyword: self.keyword.count(Some(&record.doc_id))?,
            }),
            None => None,
        };

        let change = detect::detect(
            existing.as_ref(),
            &fingerprint,
            &options_fp,
            counts,
            force,
        );
        tracing::info!(
            "Change detection for {}: {}",
            handle.display_name(),
            change.as_str()
        );

        match change {
            ChangeKind::Unchanged => {
                let record = existing.expect("unchanged implies a record");
                self.registry.touch(&record.doc_id)?;
                self.fingerprints
                    .put(&source_key, &fingerprint, Some(&record.doc_id))?;
                Ok(IngestOutcome {
                    doc_id: record.doc_id.clone(),
                    change,
                    chunk_count: record.chunk_ids.len(),
                    pair_count: record.pairs.len(),
                })
            }
            ChangeKind::MetadataOnly => {
                let mut record = existing.expect("metadata drift implies a record");
                record.metadata_hash = fingerprint.metadata_hash.clone();
                record.updated_at = chrono::Utc::now().timestamp();
                self.registry.upsert(&record)?;
                self.fingerprints
                    .put(&source_key, &fingerprint, Some(&record.doc_id))?;
                Ok(IngestOutcome {
                    doc_id: record.doc_id.clone(),
                    change,
                    chunk_count: record.chunk_ids.len(),
                    pair_count: record.pairs.len(),
                })
            }
            ChangeKind::Corrupt => {
                let record = existing.expect("corrupt implies a record");
                self.repair_document(&record)?;
                Ok(IngestOutcome {
                    doc_id: record.doc_id.clone(),
                    change,
                    chunk_count: record.chunk_ids.len(),
                    pair_count: record.pairs.len(),
                })
            }
            ChangeKind::NewDocument | ChangeKind::ContentChanged | ChangeKind::OptionsChanged => {
                self.full_ingest(
                    handle,
                    bytes,
                    options,
                    &source_key,
                    &fingerprint,
                    &options_fp,
                    existing,
                    change,
                    cancel,
                )
            }
        }
    }

    /// Convenience wrapper reading bytes from a local path
    pub fn ingest_path(
        &self,
        handle: &SourceHandle,
        options: &ProcessingOptions,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<IngestOutcome> {
        let SourceHandle::Path(path) = handle else {
            return Err(SheafError::Validation(
                "Remote sources must be fetched upstream; pass bytes directly".to_string(),
            ));
        };
        if !path.exists() {
            return Err(SheafError::Validation(format!(
                "Source file not found: {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path).map_err(|e| SheafError::Io {
            source: e,
            context: format!("Failed to read source: {}", path.display()),
        })?;
        self.ingest(handle, &bytes, options, force, cancel)
    }

    #[allow(clippy::too_many_arguments)]
    fn full_ingest(
        &self,
        handle: &SourceHandle,
        bytes: &[u8],
        options: &ProcessingOptions,
        source_key: &str,
        fingerprint: &Fingerprint,
        options_fp: &str,
        existing: Option<DocumentRecord>,
        change: ChangeKind,
        cancel: &CancelToken,
    ) -> Result<IngestOutcome> {
        let doc_id = document_id(source_key, &fingerprint.content_hash, options_fp);
        let supersedes = existing
            .as_ref()
            .filter(|r| r.doc_id != doc_id)
            .map(|r| r.doc_id.clone());

        // Create the Pending record before any expensive work so failures
        // have somewhere to latch their diagnostic
        let mut record = DocumentRecord::pending(
            doc_id.clone(),
            source_key.to_string(),
            fingerprint.content_hash.clone(),
            fingerprint.metadata_hash.clone(),
            options_fp.to_string(),
        );
        record.options = Some(options.clone());
        self.registry.upsert(&record)?;

        // Parse (cache-first)
        self.registry
            .set_state(&doc_id, DocumentState::Parsing, None)?;
        cancel.checkpoint()?;

        let cache_key = ArtifactCache::key(
            &fingerprint.content_hash,
            &options.prompt_hash(),
            self.extractor.version(),
        );
        let artifact = match self.cache.get(&cache_key, self.extractor.version()) {
            Some(artifact) => {
                tracing::debug!("Cache hit for {} ({})", handle.display_name(), cache_key);
                artifact
            }
            None => {
                let extraction = self.run_extractor(handle, bytes, options, &doc_id)?;
                Artifact {
                    extraction,
                    extractor_version: self.extractor.version().to_string(),
                }
            }
        };

        // Chunk, augment, embed
        cancel.checkpoint()?;
        let chunks = self.build_chunks(&doc_id, source_key, &artifact.extraction, options, cancel)?;
        if chunks.is_empty() {
            let message = "No indexable text extracted".to_string();
            self.registry
                .set_state(&doc_id, DocumentState::Failed, Some(&message))?;
            return Err(SheafError::Validation(message));
        }

        // Plan and announce
        let mut intent = IntentRecord::new(OpKind::Ingest, doc_id.clone(), source_key.to_string());
        intent.supersedes = supersedes.clone();
        intent.cache_key = Some(cache_key.clone());
        intent.content_hash = fingerprint.content_hash.clone();
        intent.options = Some(options.clone());
        intent.steps = Self::plan_ingest_steps(&doc_id, supersedes.as_deref());
        self.intents.append(&intent)?;

        // Execute
        let result = self.execute_ingest(
            &intent,
            &doc_id,
            supersedes.as_deref(),
            &cache_key,
            &artifact,
            &chunks,
            cancel,
        );

        match result {
            Ok(()) => {}
            Err(SheafError::Cancelled) => {
                // Intent stays InProgress so a retry or startup recovery
                // can finish the replay
                tracing::info!("Ingest of {} cancelled at a step boundary", doc_id);
                return Err(SheafError::Cancelled);
            }
            Err(e) => {
                tracing::error!("Ingest of {} failed mid-execution: {}", doc_id, e);
                return Err(e);
            }
        }

        // Commit: intent first, then the registry flips to Ready
        self.intents.mark(&intent, IntentState::Committed)?;

        let mut record = self
            .registry
            .get(&doc_id)?
            .ok_or_else(|| SheafError::Consistency(format!("Record vanished: {}", doc_id)))?;
        record.chunk_ids = chunks.iter().map(|c| c.chunk_id()).collect();
        record.pairs = artifact.extraction.pairs.clone();
        record.state = DocumentState::Ready;
        record.last_error = None;
        record.updated_at = chrono::Utc::now().timestamp();
        self.registry.upsert(&record)?;

        self.fingerprints
            .put(source_key, fingerprint, Some(&doc_id))?;

        tracing::info!(
            "Ingested {} as {} ({} chunks, {} pairs)",
            handle.display_name(),
            doc_id,
            chunks.len(),
            artifact.extraction.pairs.len()
        );

        Ok(IngestOutcome {
            doc_id,
            change,
            chunk_count: chunks.len(),
            pair_count: artifact.extraction.pairs.len(),
        })
    }

    fn plan_ingest_steps(doc_id: &str, supersedes: Option<&str>) -> Vec<IntentStep> {
        let mut steps = Vec::new();
        if let Some(old) = supersedes {
            steps.push(IntentStep::new(StepKind::VectorDelete, old));
            steps.push(IntentStep::new(StepKind::KeywordDelete, old));
            steps.push(IntentStep::new(StepKind::RegistryWrite, old));
        }
        steps.push(IntentStep::new(StepKind::CachePut, doc_id));
        steps.push(IntentStep::new(StepKind::VectorDelete, doc_id));
        steps.push(IntentStep::new(StepKind::VectorAdd, doc_id));
        steps.push(IntentStep::new(StepKind::KeywordDelete, doc_id));
        steps.push(IntentStep::new(StepKind::KeywordAdd, doc_id));
        steps.push(IntentStep::new(StepKind::RegistryWrite, doc_id));
        steps
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_ingest(
        &self,
        _intent: &IntentRecord,
        doc_id: &str,
        supersedes: Option<&str>,
        cache_key: &str,
        artifact: &Artifact,
        chunks: &[IndexedChunk],
        cancel: &CancelToken,
    ) -> Result<()> {
        // Replacements delete the superseded document first, on both
        // adapters, before the new version lands
        if let Some(old) = supersedes {
            cancel.checkpoint()?;
            // The old record may already be gone on replay
            let _ = self
                .registry
                .set_state(old, DocumentState::Removing, None);
            self.vector.delete(old)?;
            self.keyword.delete(old)?;
            self.registry.delete(old)?;
            tracing::debug!("Superseded document {} removed", old);
        }

        self.registry
            .set_state(doc_id, DocumentState::Indexing, None)?;

        cancel.checkpoint()?;
        self.cache.put(cache_key, artifact)?;

        // Delete-before-add on each adapter; the per-adapter flag flips
        // only after its add succeeded
        cancel.checkpoint()?;
        self.vector.delete(doc_id)?;
        self.vector.add(doc_id, chunks)?;
        self.registry
            .set_index_flag(doc_id, AdapterKind::Vector, true)?;

        cancel.checkpoint()?;
        self.keyword.delete(doc_id)?;
        self.keyword.add(doc_id, chunks)?;
        self.registry
            .set_index_flag(doc_id, AdapterKind::Keyword, true)?;

        Ok(())
    }

    fn run_extractor(
        &self,
        handle: &SourceHandle,
        bytes: &[u8],
        options: &ProcessingOptions,
        doc_id: &str,
    ) -> Result<Extraction> {
        let mime_hint = mime_hint_for(handle);
        let result = extract_with_deadline(
            self.extractor.clone(),
            bytes,
            mime_hint.as_deref(),
            options.mode,
            &options.prompt,
            self.config.timeouts.base_secs,
            self.config.timeouts.per_page_secs,
        );

        match result {
            Ok(extraction) => Ok(extraction),
            Err(e) => {
                // Extractor failure: record Failed, no adapter writes
                self.registry
                    .set_state(doc_id, DocumentState::Failed, Some(&e.to_string()))?;
                Err(e.into())
            }
        }
    }

    /// Chunk extracted text, attach pair references, run optional keyword
    /// augmentation, and embed. Augmentation failure is non-fatal.
    fn build_chunks(
        &self,
        doc_id: &str,
        source_key: &str,
        extraction: &Extraction,
        options: &ProcessingOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<IndexedChunk>> {
        let raw_chunks = chunk_text(&extraction.text, options.chunk_size, options.chunk_overlap);
        if raw_chunks.is_empty() {
            return Ok(Vec::new());
        }

        let doc_context: String = extraction.text.chars().take(500).collect();
        let mut texts = Vec::with_capacity(raw_chunks.len());
        let mut payloads = Vec::with_capacity(raw_chunks.len());

        for chunk in &raw_chunks {
            cancel.checkpoint()?;
            let mut text = chunk.text.clone();

            // Augmentation tokens become part of the chunk payload and
            // are indexed with it
            if options.augment_keywords {
                if let Some(generator) = &self.keywords {
                    match generator.augment(&chunk.text, &doc_context) {
                        Ok(tokens) if !tokens.is_empty() => {
                            text.push('\n');
                            text.push_str(&tokens.join(" "));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(
                                "Keyword augmentation failed for {}:{} ({}); indexing without",
                                doc_id,
                                chunk.ordinal,
                                e
                            );
                        }
                    }
                }
            }

            payloads.push(ChunkPayload {
                doc_id: doc_id.to_string(),
                source: source_key.to_string(),
                ordinal: chunk.ordinal,
                pair_refs: pair_refs(&text, &extraction.pairs),
                language: None,
                parse_method: extraction.parse_method.clone(),
            });
            texts.push(text);
        }

        cancel.checkpoint()?;
        let embeddings = self.vectorizer.embed(&texts)?;
        if embeddings.len() != texts.len() {
            return Err(SheafError::Embed(crate::embed::EmbedError::GenerationError(
                format!(
                    "Vectorizer returned {} embeddings for {} chunks",
                    embeddings.len(),
                    texts.len()
                ),
            )));
        }

        let chunks = raw_chunks
            .iter()
            .zip(texts)
            .zip(embeddings)
            .zip(payloads)
            .map(|(((raw, text), embedding), payload)| IndexedChunk {
                ordinal: raw.ordinal,
                text,
                embedding: Some(embedding),
                payload,
            })
            .collect();

        Ok(chunks)
    }

    /// Remove a document (or every record of a source) from both adapters
    /// and the registry. Returns the removed document ids.
    pub fn remove(&self, target: &RemoveTarget) -> Result<Vec<String>> {
        let records = match target {
            RemoveTarget::Source(handle) => {
                self.registry.find_all_by_source(&handle.normalized())?
            }
            RemoveTarget::DocId(doc_id) => {
                self.registry.get(doc_id)?.into_iter().collect()
            }
        };

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::with_capacity(records.len());
        for record in records {
            let doc_id = record.doc_id.clone();

            let mut intent =
                IntentRecord::new(OpKind::Remove, doc_id.clone(), record.source.clone());
            intent.steps = vec![
                IntentStep::new(StepKind::VectorDelete, &doc_id),
                IntentStep::new(StepKind::KeywordDelete, &doc_id),
                IntentStep::new(StepKind::RegistryWrite, &doc_id),
            ];
            self.intents.append(&intent)?;

            self.registry
                .set_state(&doc_id, DocumentState::Removing, None)?;
            self.vector.delete(&doc_id)?;
            self.keyword.delete(&doc_id)?;

            // A successful remove must leave nothing behind in either
            // adapter. A violation here is fatal, never auto-repaired.
            let vector_left = self.vector.count(Some(&doc_id))?;
            let keyword_left = self.keyword.count(Some(&doc_id))?;
            if vector_left != 0 || keyword_left != 0 {
                let detail = format!(
                    "remove left {} vector / {} keyword chunks",
                    vector_left, keyword_left
                );
                self.registry
                    .set_state(&doc_id, DocumentState::Failed, Some(&detail))?;
                return Err(SheafError::InvariantBreach { doc_id, detail });
            }

            self.registry.delete(&doc_id)?;
            // Cache entries for this content are retained; eviction is
            // TTL-only
            self.fingerprints.delete(&record.source)?;
            self.intents.mark(&intent, IntentState::Committed)?;

            tracing::info!("Removed document {} ({})", doc_id, record.source);
            removed.push(doc_id);
        }

        Ok(removed)
    }

    /// Compare the registry against both adapters' self-reports
    pub fn verify(&self) -> Result<ConsistencyReport> {
        let vector = AdapterReport {
            doc_counts: self.vector.doc_counts()?,
        };
        let keyword = AdapterReport {
            doc_counts: self.keyword.doc_counts()?,
        };
        self.registry.verify_consistency(&vector, &keyword)
    }

    /// Run targeted repair for every inconsistency the verify pass finds
    pub fn repair(&self) -> Result<RepairSummary> {
        let report = self.verify()?;
        let mut summary = RepairSummary::default();

        for entry in report.problems() {
            summary.examined += 1;
            let outcome = match entry.status {
                ConsistencyStatus::OrphanInVector => {
                    self.vector.delete(&entry.doc_id).map_err(SheafError::from)
                }
                ConsistencyStatus::OrphanInKeyword => {
                    self.keyword.delete(&entry.doc_id).map_err(SheafError::from)
                }
                ConsistencyStatus::MissingInVector
                | ConsistencyStatus::MissingInKeyword
                | ConsistencyStatus::StateInconsistent => {
                    match self.registry.get(&entry.doc_id)? {
                        Some(record) => self.repair_document(&record),
                        None => Ok(()),
                    }
                }
                ConsistencyStatus::Consistent => Ok(()),
            };

            match outcome {
                Ok(()) => summary.repaired += 1,
                Err(e) => {
                    tracing::error!("Repair of {} failed: {}", entry.doc_id, e);
                    summary.failed.push((entry.doc_id.clone(), e.to_string()));
                }
            }
        }

        Ok(summary)
    }

    /// Rebuild a document's entries in both adapters from the cache
    /// (preferred) or by re-extracting the source (fallback).
    fn repair_document(&self, record: &DocumentRecord) -> Result<()> {
        tracing::info!("Repairing document {}", record.doc_id);

        let options = record.options.clone().ok_or_else(|| {
            SheafError::Consistency(format!(
                "Cannot repair {}: record carries no processing options",
                record.doc_id
            ))
        })?;

        let cache_key = ArtifactCache::key(
            &record.fingerprint,
            &options.prompt_hash(),
            self.extractor.version(),
        );

        let artifact = match self.cache.get(&cache_key, self.extractor.version()) {
            Some(artifact) => artifact,
            None => {
                // Fallback: re-extract from the original source
                let handle = SourceHandle::parse(&record.source);
                let SourceHandle::Path(path) = &handle else {
                    let message = "repair needs cached artifact for remote source".to_string();
                    self.registry
                        .set_state(&record.doc_id, DocumentState::Failed, Some(&message))?;
                    return Err(SheafError::Consistency(message));
                };
                let bytes = std::fs::read(path).map_err(|e| SheafError::Io {
                    source: e,
                    context: format!("Failed to re-read source for repair: {}", path.display()),
                })?;

                // The source may have changed since; a repair must rebuild
                // the version the registry describes
                let meta = SourceMeta::from_path(path);
                let current = Fingerprint::of_bytes(&bytes, &meta);
                if current.content_hash != record.fingerprint {
                    let message =
                        "source content changed since indexing; re-add instead of repair"
                            .to_string();
                    self.registry
                        .set_state(&record.doc_id, DocumentState::Failed, Some(&message))?;
                    return Err(SheafError::Consistency(message));
                }

                let extraction = self.run_extractor(&handle, &bytes, &options, &record.doc_id)?;
                let artifact = Artifact {
                    extraction,
                    extractor_version: self.extractor.version().to_string(),
                };
                self.cache.put(&cache_key, &artifact)?;
                artifact
            }
        };

        let cancel = CancelToken::new();
        let chunks = self.build_chunks(
            &record.doc_id,
            &record.source,
            &artifact.extraction,
            &options,
            &cancel,
        )?;

        let mut intent = IntentRecord::new(
            OpKind::Repair,
            record.doc_id.clone(),
            record.source.clone(),
        );
        intent.cache_key = Some(cache_key.clone());
        intent.content_hash = record.fingerprint.clone();
        intent.options = Some(options.clone());
        intent.steps = Self::plan_ingest_steps(&record.doc_id, None);
        self.intents.append(&intent)?;

        self.execute_ingest(
            &intent,
            &record.doc_id,
            None,
            &cache_key,
            &artifact,
            &chunks,
            &cancel,
        )?;

        self.intents.mark(&intent, IntentState::Committed)?;

        let mut updated = record.clone();
        updated.chunk_ids = chunks.iter().map(|c| c.chunk_id()).collect();
        updated.pairs = artifact.extraction.pairs.clone();
        updated.state = DocumentState::Ready;
        updated.last_error = None;
        updated.updated_at = chrono::Utc::now().timestamp();
        self.registry.upsert(&updated)?;

        Ok(())
    }

    /// Replay every intent left `InProgress` by a crash. Returns the
    /// number of intents driven to a terminal state.
    pub fn recover(&self) -> Result<usize> {
        let pending = self.intents.in_progress()?;
        if pending.is_empty() {
            return Ok(0);
        }

        tracing::info!("Recovering {} in-flight intents", pending.len());
        let mut recovered = 0;

        for intent in pending {
            let outcome = match intent.op {
                OpKind::Remove => self.recover_remove(&intent),
                OpKind::Ingest | OpKind::Repair => self.recover_ingest(&intent),
            };

            match outcome {
                Ok(()) => recovered += 1,
                Err(e) => {
                    tracing::error!(
                        "Recovery of intent {} ({}) failed: {}",
                        intent.op_id,
                        intent.doc_id,
                        e
                    );
                }
            }
        }

        Ok(recovered)
    }

    fn recover_remove(&self, intent: &IntentRecord) -> Result<()> {
        // Deletes are idempotent; re-run them and finish the registry part
        self.vector.delete(&intent.doc_id)?;
        self.keyword.delete(&intent.doc_id)?;
        self.registry.delete(&intent.doc_id)?;
        self.fingerprints.delete(&intent.source)?;
        self.intents.mark(intent, IntentState::Committed)?;
        tracing::info!("Replayed remove of {}", intent.doc_id);
        Ok(())
    }

    fn recover_ingest(&self, intent: &IntentRecord) -> Result<()> {
        // Superseded document removal replays first
        if let Some(old) = &intent.supersedes {
            self.vector.delete(old)?;
            self.keyword.delete(old)?;
            self.registry.delete(old)?;
        }

        let Some(record) = self.registry.get(&intent.doc_id)? else {
            // The pending record never landed; nothing to rebuild. The job
            // retry will start the ingest over.
            self.intents.mark(intent, IntentState::Cancelled)?;
            return Ok(());
        };

        let options = intent
            .options
            .clone()
            .or_else(|| record.options.clone());
        let (Some(options), Some(cache_key)) = (options, intent.cache_key.clone()) else {
            self.registry.set_state(
                &intent.doc_id,
                DocumentState::Failed,
                Some("recovery context incomplete"),
            )?;
            self.intents.mark(intent, IntentState::Cancelled)?;
            return Ok(());
        };

        let artifact = self.cache.get(&cache_key, self.extractor.version());

        let artifact = match artifact {
            Some(artifact) => artifact,
            None => {
                // Cache miss: fall back to re-reading the source
                let handle = SourceHandle::parse(&intent.source);
                match &handle {
                    SourceHandle::Path(path) if path.exists() => {
                        self.intents.mark(intent, IntentState::Cancelled)?;
                        let bytes = std::fs::read(path).map_err(|e| SheafError::Io {
                            source: e,
                            context: format!("Failed to re-read source: {}", path.display()),
                        })?;
                        let cancel = CancelToken::new();
                        self.ingest(&handle, &bytes, &options, true, &cancel)?;
                        return Ok(());
                    }
                    _ => {
                        self.registry.set_state(
                            &intent.doc_id,
                            DocumentState::Failed,
                            Some("recovery failed: artifact and source both unavailable"),
                        )?;
                        self.intents.mark(intent, IntentState::Cancelled)?;
                        return Ok(());
                    }
                }
            }
        };

        let cancel = CancelToken::new();
        let chunks = self.build_chunks(
            &intent.doc_id,
            &intent.source,
            &artifact.extraction,
            &options,
            &cancel,
        )?;

        self.execute_ingest(
            intent,
            &intent.doc_id,
            None,
            &cache_key,
            &artifact,
            &chunks,
            &cancel,
        )?;

        self.intents.mark(intent, IntentState::Committed)?;

        let mut record = record;
        record.chunk_ids = chunks.iter().map(|c| c.chunk_id()).collect();
        record.pairs = artifact.extraction.pairs.clone();
        record.state = DocumentState::Ready;
        record.last_error = None;
        record.updated_at = chrono::Utc::now().timestamp();
        self.registry.upsert(&record)?;

        tracing::info!("Replayed ingest of {}", intent.doc_id);
        Ok(())
    }

    /// Drop terminal intent records older than the horizon
    pub fn compact_intents(&self, horizon_secs: i64) -> Result<usize> {
        Ok(self.intents.compact(horizon_secs)?)
    }
}

/// Best-effort MIME hint derived from the source name
fn mime_hint_for(handle: &SourceHandle) -> Option<String> {
    let name = handle.display_name().to_ascii_lowercase();
    let mime = if name.ends_with(".md") || name.ends_with(".markdown") {
        "text/markdown"
    } else if name.ends_with(".pdf") {
        "application/pdf"
    } else if name.ends_with(".txt") {
        "text/plain"
    } else {
        return None;
    };
    Some(mime.to_string())
}
