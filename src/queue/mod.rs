//! Durable job queue
//!
//! Priority queue of pending operations backed by SQLite. Workers pull the
//! highest-priority visible job under a short lease; expired leases return
//! the job to `Pending` with an attempt charged. Retries use exponential
//! backoff with full jitter; the attempt ceiling dead-letters the job into
//! `Failed`. All queue state survives restarts.

pub mod worker;

use crate::error::SheafError;
use crate::extract::ProcessingOptions;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Queue pool error: {0}")]
    Pool(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error("Job {job_id} is {state} and cannot be cancelled")]
    NotCancellable { job_id: String, state: String },
}

/// Job kinds accepted by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    Add,
    Update,
    Remove,
    Search,
    Maintenance,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Add => "add",
            JobKind::Update => "update",
            JobKind::Remove => "remove",
            JobKind::Search => "search",
            JobKind::Maintenance => "maintenance",
        }
    }

    fn parse(s: &str) -> Result<Self, QueueError> {
        match s {
            "add" => Ok(JobKind::Add),
            "update" => Ok(JobKind::Update),
            "remove" => Ok(JobKind::Remove),
            "search" => Ok(JobKind::Search),
            "maintenance" => Ok(JobKind::Maintenance),
            other => Err(QueueError::Payload(format!("unknown job kind: {}", other))),
        }
    }
}

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    /// Terminal: the attempt ceiling was reached (dead letter) or the
    /// error class is never retried
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Result<Self, QueueError> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(QueueError::Payload(format!("unknown job state: {}", other))),
        }
    }
}

/// Priority levels; lower value pops first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPriority {
    Urgent = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl JobPriority {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Maintenance task carried by a `Maintenance` job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceTask {
    Repair,
    Cleanup,
    ConsistencyCheck,
}

/// Typed job payload, serialized as JSON in the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobPayload {
    Ingest {
        source: String,
        options: ProcessingOptions,
        force: bool,
    },
    Remove {
        source: Option<String>,
        doc_id: Option<String>,
    },
    Search {
        query: String,
        top_k: usize,
    },
    Maintenance {
        task: MaintenanceTask,
    },
}

impl JobPayload {
    /// The document lock key this payload targets, if any. Jobs with the
    /// same key are serialized by the worker pool; jobs with different
    /// keys run concurrently.
    pub fn lock_key(&self) -> Option<String> {
        match self {
            JobPayload::Ingest { source, .. } => Some(source.clone()),
            JobPayload::Remove {
                source: Some(source),
                ..
            } => Some(source.clone()),
            JobPayload::Remove {
                doc_id: Some(doc_id),
                ..
            } => Some(doc_id.clone()),
            _ => None,
        }
    }
}

/// A job pulled from the queue
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub priority: i64,
    pub attempts: u32,
    pub state: JobState,
    pub created_at: i64,
    pub last_error: Option<String>,
    pub result: Option<String>,
}

/// Queue depth summary
#[derive(Debug, Default, Clone)]
pub struct QueueStats {
    pub by_state: HashMap<String, usize>,
}

impl QueueStats {
    pub fn count(&self, state: JobState) -> usize {
        self.by_state.get(state.as_str()).copied().unwrap_or(0)
    }
}

/// Lease duration for running jobs; a worker that vanishes forfeits the
/// job this many seconds later
pub const LEASE_SECS: i64 = 300;

/// Backoff parameters: full jitter over an exponentially growing window
const BACKOFF_BASE_SECS: u64 = 2;
const BACKOFF_CAP_SECS: u64 = 300;

/// Compute the retry delay for the given attempt: a uniform draw from
/// `[0, min(cap, base * 2^attempt)]`.
pub fn backoff_delay_secs(attempt: u32) -> u64 {
    let window = BACKOFF_BASE_SECS
        .saturating_mul(1u64 << attempt.min(16))
        .min(BACKOFF_CAP_SECS);
    rand::thread_rng().gen_range(0..=window)
}

const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE jobs (
        job_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        priority INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL,
        visible_at INTEGER NOT NULL,
        lease_expires_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_error TEXT,
        result TEXT
    );

    CREATE INDEX idx_jobs_claim ON jobs(state, visible_at, priority, created_at);
    "#];

/// Durable priority queue
pub struct JobQueue {
    pool: Pool<SqliteConnectionManager>,
}

impl JobQueue {
    pub fn open(dir: &Path) -> Result<Self, SheafError> {
        std::fs::create_dir_all(dir).map_err(|e| SheafError::Io {
            source: e,
            context: format!("Failed to create queue directory: {}", dir.display()),
        })?;
        let db_path = dir.join("jobs.sqlite");

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| SheafError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| SheafError::Config(format!("Failed to get connection: {}", e)))?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
        }

        let queue = Self { pool };
        queue.migrate()?;
        Ok(queue)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, QueueError> {
        self.pool
            .get()
            .map_err(|e| QueueError::Pool(e.to_string()))
    }

    fn migrate(&self) -> Result<(), SheafError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| SheafError::Config(format!("Failed to get connection: {}", e)))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| {
                r.get(0)
            })
            .unwrap_or(0);

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            let version = i as i32 + 1;
            if version > current {
                tracing::info!("Applying queue migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }
        Ok(())
    }

    /// Enqueue a job; returns its id
    pub fn enqueue(
        &self,
        kind: JobKind,
        payload: &JobPayload,
        priority: JobPriority,
    ) -> Result<String, QueueError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| QueueError::Payload(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs
             (job_id, kind, payload, priority, attempts, state, visible_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 'pending', ?5, ?5, ?5)",
            params![job_id, kind.as_str(), payload_json, priority.as_i64(), now],
        )?;

        tracing::info!(
            "Enqueued {} job {} (priority {})",
            kind.as_str(),
            &job_id[..8],
            priority.as_i64()
        );
        Ok(job_id)
    }

    /// Claim the highest-priority visible pending job, moving it to
    /// `Running` under a lease.
    pub fn claim(&self) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let tx = conn.transaction()?;

        let row: Option<(String, String, String, i64, i64, i64, Option<String>, Option<String>)> =
            tx.query_row(
                "SELECT job_id, kind, payload, priority, attempts, created_at, last_error, result
                 FROM jobs
                 WHERE state = 'pending' AND visible_at <= ?1
                 ORDER BY priority ASC, created_at ASC
                 LIMIT 1",
                params![now],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((job_id, kind, payload_json, priority, attempts, created_at, last_error, result)) =
            row
        else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET state = 'running', lease_expires_at = ?1, updated_at = ?2
             WHERE job_id = ?3",
            params![now + LEASE_SECS, now, job_id],
        )?;
        tx.commit()?;

        let payload: JobPayload = serde_json::from_str(&payload_json)
            .map_err(|e| QueueError::Payload(e.to_string()))?;

        Ok(Some(Job {
            job_id,
            kind: JobKind::parse(&kind)?,
            payload,
            priority,
            attempts: attempts as u32,
            state: JobState::Running,
            created_at,
            last_error,
            result,
        }))
    }

    /// Extend the lease of a running job between steps
    pub fn heartbeat(&self, job_id: &str) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE jobs SET lease_expires_at = ?1, updated_at = ?2
             WHERE job_id = ?3 AND state = 'running'",
            params![now + LEASE_SECS, now, job_id],
        )?;
        Ok(())
    }

    /// Mark a job succeeded, optionally storing a result payload
    pub fn succeed(&self, job_id: &str, result: Option<&str>) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let changed = conn.execute(
            "UPDATE jobs SET state = 'succeeded', result = ?1, lease_expires_at = NULL,
             updated_at = ?2 WHERE job_id = ?3",
            params![result, now, job_id],
        )?;
        if changed == 0 {
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Record a failed attempt. Retryable errors return the job to
    /// `Pending` with backoff until the ceiling; anything else (or a
    /// breached ceiling) dead-letters it into `Failed`.
    pub fn fail(
        &self,
        job_id: &str,
        error: &str,
        retryable: bool,
        max_attempts: u32,
    ) -> Result<JobState, QueueError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();

        let attempts: i64 = conn
            .query_row(
                "SELECT attempts FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let attempts = attempts as u32 + 1;
        let final_state = if retryable && attempts < max_attempts {
            let delay = backoff_delay_secs(attempts);
            conn.execute(
                "UPDATE jobs SET state = 'pending', attempts = ?1, visible_at = ?2,
                 lease_expires_at = NULL, last_error = ?3, updated_at = ?4
                 WHERE job_id = ?5",
                params![attempts, now + delay as i64, error, now, job_id],
            )?;
            tracing::warn!(
                "Job {} attempt {} failed, retrying in {}s: {}",
                &job_id[..8],
                attempts,
                delay,
                error
            );
            JobState::Pending
        } else {
            conn.execute(
                "UPDATE jobs SET state = 'failed', attempts = ?1, lease_expires_at = NULL,
                 last_error = ?2, updated_at = ?3 WHERE job_id = ?4",
                params![attempts, error, now, job_id],
            )?;
            tracing::error!(
                "Job {} dead-lettered after {} attempts: {}",
                &job_id[..8],
                attempts,
                error
            );
            JobState::Failed
        };

        Ok(final_state)
    }

    /// Cancel a job. Pending jobs cancel immediately; running jobs are
    /// marked and rely on the worker observing its cancellation token.
    pub fn cancel(&self, job_id: &str) -> Result<JobState, QueueError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();

        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        let state = state.ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        match JobState::parse(&state)? {
            JobState::Pending => {
                conn.execute(
                    "UPDATE jobs SET state = 'cancelled', updated_at = ?1 WHERE job_id = ?2",
                    params![now, job_id],
                )?;
                Ok(JobState::Cancelled)
            }
            JobState::Running => {
                // The worker flips the row when it reaches a step boundary
                Ok(JobState::Running)
            }
            other => Err(QueueError::NotCancellable {
                job_id: job_id.to_string(),
                state: other.as_str().to_string(),
            }),
        }
    }

    /// Flip a running job to `Cancelled`; called by the worker once it has
    /// observed the token and rolled back.
    pub fn mark_cancelled(&self, job_id: &str) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE jobs SET state = 'cancelled', lease_expires_at = NULL, updated_at = ?1
             WHERE job_id = ?2",
            params![now, job_id],
        )?;
        Ok(())
    }

    /// Return expired-lease jobs to `Pending` with an attempt charged.
    /// Returns the number reclaimed.
    pub fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let reclaimed = conn.execute(
            "UPDATE jobs SET state = 'pending', attempts = attempts + 1,
             lease_expires_at = NULL, visible_at = ?1, updated_at = ?1
             WHERE state = 'running' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1",
            params![now],
        )?;
        if reclaimed > 0 {
            tracing::warn!("Reclaimed {} jobs with expired leases", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Startup resume rule: every `Running` job becomes `Pending` again
    /// (the intent log reconciliation has already run by the time this is
    /// called).
    pub fn reset_running(&self) -> Result<usize, QueueError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let reset = conn.execute(
            "UPDATE jobs SET state = 'pending', lease_expires_at = NULL,
             visible_at = ?1, updated_at = ?1 WHERE state = 'running'",
            params![now],
        )?;
        if reset > 0 {
            tracing::info!("Reset {} interrupted jobs to pending", reset);
        }
        Ok(reset)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT job_id, kind, payload, priority, attempts, state, created_at,
                 last_error, result FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((job_id, kind, payload_json, priority, attempts, state, created_at, last_error, result)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(Job {
            job_id,
            kind: JobKind::parse(&kind)?,
            payload: serde_json::from_str(&payload_json)
                .map_err(|e| QueueError::Payload(e.to_string()))?,
            priority,
            attempts: attempts as u32,
            state: JobState::parse(&state)?,
            created_at,
            last_error,
            result,
        }))
    }

    /// Whether any pending or running work remains
    pub fn has_open_jobs(&self) -> Result<bool, QueueError> {
        let conn = self.conn()?;
        let open: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state IN ('pending', 'running')",
            [],
            |row| row.get(0),
        )?;
        Ok(open > 0)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let conn = self.conn()?;
        let mut stats = QueueStats::default();
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            stats.by_state.insert(state, count as usize);
        }
        Ok(stats)
    }

    /// Remove terminal jobs from the queue. Returns the number removed.
    pub fn clear_terminal(&self) -> Result<usize, QueueError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM jobs WHERE state IN ('succeeded', 'failed', 'cancelled')",
            [],
        )?;
        Ok(removed)
    }
}
