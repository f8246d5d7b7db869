//! Worker pool
//!
//! A fixed set of threads pulls jobs from the durable queue and drives
//! them through the index manager. Per-document exclusion is enforced with
//! an in-process keyed mutex: jobs targeting the same document serialize,
//! everything else runs in parallel. The pool is the engine's only
//! fan-out point; within a job, work is sequential.

use super::{Job, JobPayload, JobQueue, JobState, MaintenanceTask, QueueError};
use crate::error::{ErrorKind, SheafError};
use crate::manager::{CancelToken, IndexManager, RemoveTarget};
use crate::search::{HybridSearcher, SearchQuery};
use crate::source::SourceHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Keyed mutex granting one holder per document key
pub struct DocLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or create) the mutex for a key. The caller locks the
    /// returned handle for the duration of its mutating operation.
    pub fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("doc lock registry poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for DocLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokens of currently running jobs, so cancellation can reach them
struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelRegistry {
    fn register(&self, job_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .insert(job_id.to_string(), token.clone());
        token
    }

    fn deregister(&self, job_id: &str) {
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .remove(job_id);
    }

    fn request(&self, job_id: &str) -> bool {
        let tokens = self.tokens.lock().expect("cancel registry poisoned");
        match tokens.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

struct Shared {
    queue: Arc<JobQueue>,
    manager: Arc<IndexManager>,
    searcher: Arc<HybridSearcher>,
    locks: DocLocks,
    cancels: CancelRegistry,
    shutdown: AtomicBool,
    max_attempts: u32,
}

/// Serialized into the job's `result` column on success
#[derive(Serialize)]
struct IngestResult<'a> {
    doc_id: &'a str,
    change: &'a str,
    chunks: usize,
    pairs: usize,
}

#[derive(Serialize)]
struct SearchResultSummary {
    hits: Vec<(String, f32)>,
}

const IDLE_POLL: Duration = Duration::from_millis(100);
const RECLAIM_EVERY: u32 = 100;

/// Pool of worker threads over the durable queue
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` threads pulling from the queue.
    ///
    /// Call `JobQueue::reset_running` and `IndexManager::recover` before
    /// starting the pool so interrupted work is reconciled first.
    pub fn start(
        queue: Arc<JobQueue>,
        manager: Arc<IndexManager>,
        searcher: Arc<HybridSearcher>,
        workers: usize,
        max_attempts: u32,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue,
            manager,
            searcher,
            locks: DocLocks::new(),
            cancels: CancelRegistry {
                tokens: Mutex::new(HashMap::new()),
            },
            shutdown: AtomicBool::new(false),
            max_attempts,
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sheaf-worker-{}", i))
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        tracing::info!("Worker pool started with {} workers", workers);
        Self { shared, handles }
    }

    /// Cancel a job: pending jobs immediately, running jobs cooperatively
    /// through their cancellation token.
    pub fn cancel(&self, job_id: &str) -> Result<JobState, QueueError> {
        let state = self.shared.queue.cancel(job_id)?;
        if state == JobState::Running {
            self.shared.cancels.request(job_id);
        }
        Ok(state)
    }

    /// Block until no pending or running jobs remain
    pub fn wait_until_drained(&self) -> Result<(), QueueError> {
        loop {
            if !self.shared.queue.has_open_jobs()? {
                return Ok(());
            }
            std::thread::sleep(IDLE_POLL);
        }
    }

    /// Signal shutdown and join every worker
    pub fn shutdown(self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles {
            let _ = handle.join();
        }
        tracing::info!("Worker pool stopped");
    }
}

fn worker_loop(shared: &Shared) {
    let mut ticks = 0u32;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        // Periodically sweep expired leases back into the pending set
        ticks = ticks.wrapping_add(1);
        if ticks % RECLAIM_EVERY == 0 {
            if let Err(e) = shared.queue.reclaim_expired() {
                tracing::error!("Lease reclaim failed: {}", e);
            }
        }

        let job = match shared.queue.claim() {
            Ok(Some(job)) => job,
            Ok(None) => {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
            Err(e) => {
                tracing::error!("Queue claim failed: {}", e);
                std::thread::sleep(IDLE_POLL);
                continue;
            }
        };

        process_job(shared, job);
    }
}

fn process_job(shared: &Shared, job: Job) {
    let job_id = job.job_id.clone();
    tracing::info!("Processing {} job {}", job.kind.as_str(), &job_id[..8]);

    let token = shared.cancels.register(&job_id);

    // Per-document exclusion: at most one worker may mutate a given
    // document at a time
    let lock = job.payload.lock_key().map(|key| shared.locks.acquire(&key));
    let _guard = lock.as_ref().map(|l| l.lock().expect("doc mutex poisoned"));

    shared.queue.heartbeat(&job_id).ok();
    let outcome = run_payload(shared, &job, &token);
    shared.cancels.deregister(&job_id);

    match outcome {
        Ok(result) => {
            if let Err(e) = shared.queue.succeed(&job_id, result.as_deref()) {
                tracing::error!("Failed to record job success: {}", e);
            }
        }
        Err(error) => {
            let kind = error.kind();
            match kind {
                ErrorKind::Cancelled => {
                    // Durable state was left recoverable at a step
                    // boundary; the job itself is done
                    if let Err(e) = shared.queue.mark_cancelled(&job_id) {
                        tracing::error!("Failed to record job cancellation: {}", e);
                    }
                }
                _ => {
                    let retryable = error.is_retryable();
                    if let Err(e) = shared.queue.fail(
                        &job_id,
                        &error.to_string(),
                        retryable,
                        shared.max_attempts,
                    ) {
                        tracing::error!("Failed to record job failure: {}", e);
                    }
                }
            }
        }
    }
}

/// Execute the job body, translating engine errors into the taxonomy the
/// queue layer acts on. All retry policy lives here and in
/// `JobQueue::fail`, not in the manager.
fn run_payload(
    shared: &Shared,
    job: &Job,
    token: &CancelToken,
) -> Result<Option<String>, SheafError> {
    match &job.payload {
        JobPayload::Ingest {
            source,
            options,
            force,
        } => {
            let handle = SourceHandle::parse(source);
            let outcome = shared
                .manager
                .ingest_path(&handle, options, *force, token)?;
            let summary = serde_json::to_string(&IngestResult {
                doc_id: &outcome.doc_id,
                change: outcome.change.as_str(),
                chunks: outcome.chunk_count,
                pairs: outcome.pair_count,
            })
            .ok();
            Ok(summary)
        }
        JobPayload::Remove { source, doc_id } => {
            let target = match (source, doc_id) {
                (Some(source), _) => RemoveTarget::Source(SourceHandle::parse(source)),
                (None, Some(doc_id)) => RemoveTarget::DocId(doc_id.clone()),
                (None, None) => {
                    return Err(SheafError::Validation(
                        "Remove job carries neither source nor doc_id".to_string(),
                    ))
                }
            };
            let removed = shared.manager.remove(&target)?;
            Ok(Some(format!("removed {} documents", removed.len())))
        }
        JobPayload::Search { query, top_k } => {
            let results = shared
                .searcher
                .search(&SearchQuery::hybrid(query.clone(), *top_k))?;
            let summary = SearchResultSummary {
                hits: results
                    .iter()
                    .map(|h| (h.chunk.to_string(), h.score))
                    .collect(),
            };
            Ok(serde_json::to_string(&summary).ok())
        }
        JobPayload::Maintenance { task } => match task {
            MaintenanceTask::Repair => {
                let summary = shared.manager.repair()?;
                Ok(Some(format!(
                    "examined {}, repaired {}, failed {}",
                    summary.examined,
                    summary.repaired,
                    summary.failed.len()
                )))
            }
            MaintenanceTask::Cleanup => {
                let cache_removed = shared.manager.cache().sweep()?;
                let intents_dropped = shared.manager.compact_intents(7 * 24 * 3600)?;
                let jobs_cleared = shared.queue.clear_terminal()?;
                Ok(Some(format!(
                    "cache {} swept, intents {} compacted, jobs {} cleared",
                    cache_removed, intents_dropped, jobs_cleared
                )))
            }
            MaintenanceTask::ConsistencyCheck => {
                let report = shared.manager.verify()?;
                Ok(serde_json::to_string(&report).ok())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_locks_same_key_shares_mutex() {
        let locks = DocLocks::new();
        let a = locks.acquire("/doc1");
        let b = locks.acquire("/doc1");
        assert!(Arc::ptr_eq(&a, &b));

        let c = locks.acquire("/doc2");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_doc_locks_exclusion() {
        let locks = Arc::new(DocLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                let m = locks.acquire("/same");
                let _guard = m.lock().unwrap();
                counter.lock().unwrap().push(("enter", i));
                std::thread::sleep(Duration::from_millis(10));
                counter.lock().unwrap().push(("exit", i));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // Critical sections never interleave: every enter is followed by
        // its own exit
        let events = counter.lock().unwrap();
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "exit");
            assert_eq!(pair[0].1, pair[1].1);
        }
    }

    #[test]
    fn test_cancel_registry() {
        let registry = CancelRegistry {
            tokens: Mutex::new(HashMap::new()),
        };
        let token = registry.register("job1");
        assert!(!token.is_cancelled());

        assert!(registry.request("job1"));
        assert!(token.is_cancelled());

        registry.deregister("job1");
        assert!(!registry.request("job1"));
    }
}
