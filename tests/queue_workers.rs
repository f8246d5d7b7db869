//! Worker pool integration: end-to-end jobs through the durable queue,
//! per-document serialization, retries, and dead-lettering.

mod common;

use common::{build_engine, datasheet_text, engine, options, write_source};
use sheaf::extract::ExtractMode;
use sheaf::index::IndexAdapter;
use sheaf::queue::worker::WorkerPool;
use sheaf::queue::{JobKind, JobPayload, JobPriority, JobState};
use sheaf::registry::DocumentState;
use tempfile::TempDir;

fn ingest_payload(source: &str, chunk: usize) -> JobPayload {
    JobPayload::Ingest {
        source: source.to_string(),
        options: options(ExtractMode::Datasheet, chunk, chunk / 8),
        force: false,
    }
}

#[test]
fn add_job_end_to_end() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("JOBTOK"));

    let job_id = eng
        .ctx
        .queue
        .enqueue(
            JobKind::Add,
            &ingest_payload(&handle.normalized(), 160),
            JobPriority::Normal,
        )
        .unwrap();

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        2,
        eng.config.workers.max_attempts,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    let job = eng.ctx.queue.get(&job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    let result = job.result.unwrap();
    assert!(result.contains("new_document"));

    let record = eng
        .ctx
        .registry
        .find_by_source(&handle.normalized())
        .unwrap()
        .unwrap();
    assert_eq!(record.state, DocumentState::Ready);
}

#[test]
fn concurrent_add_and_remove_serialize_per_source() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("RACETOK"));
    let source = handle.normalized();

    // The two jobs target the same source; the doc-keyed mutex forces
    // some sequential ordering
    eng.ctx
        .queue
        .enqueue(JobKind::Add, &ingest_payload(&source, 160), JobPriority::Normal)
        .unwrap();
    eng.ctx
        .queue
        .enqueue(
            JobKind::Remove,
            &JobPayload::Remove {
                source: Some(source.clone()),
                doc_id: None,
            },
            JobPriority::Normal,
        )
        .unwrap();

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        4,
        eng.config.workers.max_attempts,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    // Whichever order won, the final state matches one of the two
    // sequential outcomes and is internally consistent
    let record = eng.ctx.registry.find_by_source(&source).unwrap();
    match record {
        Some(record) => {
            assert_eq!(record.state, DocumentState::Ready);
            assert_eq!(
                eng.ctx.vector.count(Some(&record.doc_id)).unwrap(),
                record.chunk_ids.len()
            );
            assert_eq!(
                eng.ctx.keyword.count(Some(&record.doc_id)).unwrap(),
                record.chunk_ids.len()
            );
        }
        None => {
            assert_eq!(eng.ctx.vector.count(None).unwrap(), 0);
            assert_eq!(eng.ctx.keyword.count(None).unwrap(), 0);
        }
    }
    assert!(eng.manager.verify().unwrap().is_consistent());
}

#[test]
fn different_sources_process_in_parallel_without_interference() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());

    let mut sources = Vec::new();
    for i in 0..6 {
        let handle = write_source(
            temp.path(),
            &format!("doc{}.txt", i),
            &datasheet_text(&format!("PARTOK{}", i)),
        );
        let source = handle.normalized();
        eng.ctx
            .queue
            .enqueue(JobKind::Add, &ingest_payload(&source, 160), JobPriority::Normal)
            .unwrap();
        sources.push(source);
    }

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        4,
        eng.config.workers.max_attempts,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    for source in &sources {
        let record = eng.ctx.registry.find_by_source(source).unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Ready);
    }
    assert!(eng.manager.verify().unwrap().is_consistent());
}

#[test]
fn persistent_adapter_failure_dead_letters_the_job() {
    let temp = TempDir::new().unwrap();
    // More injected failures than attempts x retries can absorb
    let eng = build_engine(temp.path(), 1000);
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("DEADTOK"));

    let job_id = eng
        .ctx
        .queue
        .enqueue(
            JobKind::Add,
            &ingest_payload(&handle.normalized(), 160),
            JobPriority::Normal,
        )
        .unwrap();

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        1,
        eng.config.workers.max_attempts,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    let job = eng.ctx.queue.get(&job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, eng.config.workers.max_attempts);
    assert!(job.last_error.is_some());

    // The record carries the latched diagnostic shape: not Ready
    let record = eng
        .ctx
        .registry
        .find_by_source(&handle.normalized())
        .unwrap()
        .unwrap();
    assert_ne!(record.state, DocumentState::Ready);
}

#[test]
fn validation_errors_never_retry() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());

    // Source that does not exist: a Validation error
    let job_id = eng
        .ctx
        .queue
        .enqueue(
            JobKind::Add,
            &ingest_payload("/no/such/file.txt", 160),
            JobPriority::Normal,
        )
        .unwrap();

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        1,
        5,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    let job = eng.ctx.queue.get(&job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1, "validation failures are not retried");
}

#[test]
fn search_job_reports_hits() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("SRCHTOK"));

    eng.ctx
        .queue
        .enqueue(
            JobKind::Add,
            &ingest_payload(&handle.normalized(), 160),
            JobPriority::Normal,
        )
        .unwrap();
    let search_id = eng
        .ctx
        .queue
        .enqueue(
            JobKind::Search,
            &JobPayload::Search {
                query: "SRCHTOK detector".to_string(),
                top_k: 5,
            },
            JobPriority::Low,
        )
        .unwrap();

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        1,
        eng.config.workers.max_attempts,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    let job = eng.ctx.queue.get(&search_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert!(job.result.unwrap().contains("hits"));
}

#[test]
fn cancel_pending_job_before_workers_start() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("CNCLTOK"));

    let job_id = eng
        .ctx
        .queue
        .enqueue(
            JobKind::Add,
            &ingest_payload(&handle.normalized(), 160),
            JobPriority::Normal,
        )
        .unwrap();

    assert_eq!(eng.ctx.queue.cancel(&job_id).unwrap(), JobState::Cancelled);

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        1,
        eng.config.workers.max_attempts,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    // The cancelled job was never picked up; nothing was indexed
    assert!(eng
        .ctx
        .registry
        .find_by_source(&handle.normalized())
        .unwrap()
        .is_none());
}

#[test]
fn maintenance_consistency_check_job() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("MAINTOK"));

    eng.ctx
        .queue
        .enqueue(
            JobKind::Add,
            &ingest_payload(&handle.normalized(), 160),
            JobPriority::Normal,
        )
        .unwrap();
    let check_id = eng
        .ctx
        .queue
        .enqueue(
            JobKind::Maintenance,
            &JobPayload::Maintenance {
                task: sheaf::queue::MaintenanceTask::ConsistencyCheck,
            },
            JobPriority::Low,
        )
        .unwrap();

    let pool = WorkerPool::start(
        eng.ctx.queue.clone(),
        eng.manager.clone(),
        eng.searcher.clone(),
        1,
        eng.config.workers.max_attempts,
    );
    pool.wait_until_drained().unwrap();
    pool.shutdown();

    let job = eng.ctx.queue.get(&check_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert!(job.result.unwrap().contains("entries"));
}
