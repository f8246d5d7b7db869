//! Durable intent log
//!
//! Append-only record of in-progress mutations. Every mutating operation
//! announces its planned steps before executing them; recovery replays any
//! intent still `InProgress` after a crash. State transitions are recorded
//! by appending a new line for the same op id, so the log never rewrites
//! in place; compaction periodically drops terminal records older than a
//! horizon.

use crate::extract::ProcessingOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntentError {
    #[error("Intent log IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Intent log corrupt at line {line}: {detail}")]
    Corrupt { line: usize, detail: String },

    #[error("Unknown intent: {0}")]
    Unknown(String),
}

/// Primitive step kinds an operation is decomposed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    CachePut,
    RegistryWrite,
    VectorDelete,
    VectorAdd,
    KeywordDelete,
    KeywordAdd,
}

/// One planned step, targeting a specific document id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentStep {
    pub kind: StepKind,
    pub doc_id: String,
}

impl IntentStep {
    pub fn new(kind: StepKind, doc_id: impl Into<String>) -> Self {
        Self {
            kind,
            doc_id: doc_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentState {
    InProgress,
    Committed,
    Cancelled,
}

/// What kind of operation the intent describes, for recovery planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Ingest,
    Remove,
    Repair,
}

/// Durable record of one in-flight operation.
///
/// Carries enough context for recovery to rebuild the adds: the cache key
/// of the extraction artifact, the processing options, and the doc id the
/// new version supersedes (if any).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    pub op_id: String,
    pub op: OpKind,
    pub doc_id: String,
    pub source: String,
    pub steps: Vec<IntentStep>,
    pub state: IntentState,
    pub supersedes: Option<String>,
    pub cache_key: Option<String>,
    pub content_hash: String,
    pub options: Option<ProcessingOptions>,
    pub updated_at: i64,
}

impl IntentRecord {
    pub fn new(op: OpKind, doc_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            op_id: uuid::Uuid::new_v4().to_string(),
            op,
            doc_id: doc_id.into(),
            source: source.into(),
            steps: Vec::new(),
            state: IntentState::InProgress,
            supersedes: None,
            cache_key: None,
            content_hash: String::new(),
            options: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Append-only intent log backed by a JSONL file
pub struct IntentLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl IntentLog {
    pub fn open(dir: &Path) -> Result<Self, IntentError> {
        std::fs::create_dir_all(dir).map_err(|e| IntentError::Io {
            source: e,
            context: format!("Failed to create intent log directory: {}", dir.display()),
        })?;
        let path = dir.join("intents.jsonl");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| IntentError::Io {
                source: e,
                context: format!("Failed to open intent log: {}", path.display()),
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append a record and fsync. The write is durable before this
    /// returns.
    pub fn append(&self, record: &IntentRecord) -> Result<(), IntentError> {
        let line = serde_json::to_string(record).map_err(|e| IntentError::Corrupt {
            line: 0,
            detail: format!("Failed to serialize intent: {}", e),
        })?;

        let mut file = self.file.lock().expect("intent log mutex poisoned");
        writeln!(file, "{}", line).map_err(|e| IntentError::Io {
            source: e,
            context: "Failed to append intent record".to_string(),
        })?;
        file.sync_data().map_err(|e| IntentError::Io {
            source: e,
            context: "Failed to sync intent log".to_string(),
        })?;
        Ok(())
    }

    /// Re-append an existing record with a new state
    pub fn mark(&self, record: &IntentRecord, state: IntentState) -> Result<(), IntentError> {
        let mut updated = record.clone();
        updated.state = state;
        updated.updated_at = chrono::Utc::now().timestamp();
        self.append(&updated)
    }

    /// Load the latest state of every intent in the log
    pub fn load(&self) -> Result<Vec<IntentRecord>, IntentError> {
        // Lock the writer so a concurrent append cannot tear a line under us
        let _guard = self.file.lock().expect("intent log mutex poisoned");

        let file = File::open(&self.path).map_err(|e| IntentError::Io {
            source: e,
            context: format!("Failed to read intent log: {}", self.path.display()),
        })?;

        let mut latest: BTreeMap<String, IntentRecord> = BTreeMap::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| IntentError::Io {
                source: e,
                context: format!("Failed to read intent log line {}", i + 1),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IntentRecord>(&line) {
                Ok(record) => {
                    latest.insert(record.op_id.clone(), record);
                }
                Err(e) => {
                    // A torn trailing line after a crash is expected; only
                    // warn and keep what parsed
                    tracing::warn!("Skipping unparseable intent log line {}: {}", i + 1, e);
                }
            }
        }

        Ok(latest.into_values().collect())
    }

    /// All intents whose latest state is `InProgress`, oldest first
    pub fn in_progress(&self) -> Result<Vec<IntentRecord>, IntentError> {
        let mut records: Vec<IntentRecord> = self
            .load()?
            .into_iter()
            .filter(|r| r.state == IntentState::InProgress)
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    /// Rewrite the log, dropping `Committed` and `Cancelled` records whose
    /// last update is older than the horizon. Returns the number dropped.
    pub fn compact(&self, horizon_secs: i64) -> Result<usize, IntentError> {
        let cutoff = chrono::Utc::now().timestamp() - horizon_secs;
        let records = self.load()?;

        let (keep, dropped): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| {
            r.state == IntentState::InProgress || r.updated_at >= cutoff
        });

        if dropped.is_empty() {
            return Ok(0);
        }

        let temp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut temp = File::create(&temp_path).map_err(|e| IntentError::Io {
                source: e,
                context: format!("Failed to create compaction file: {}", temp_path.display()),
            })?;
            for record in &keep {
                let line = serde_json::to_string(record).map_err(|e| IntentError::Corrupt {
                    line: 0,
                    detail: format!("Failed to serialize intent: {}", e),
                })?;
                writeln!(temp, "{}", line).map_err(|e| IntentError::Io {
                    source: e,
                    context: "Failed to write compacted intent log".to_string(),
                })?;
            }
            temp.sync_all().map_err(|e| IntentError::Io {
                source: e,
                context: "Failed to sync compacted intent log".to_string(),
            })?;
        }

        let mut file = self.file.lock().expect("intent log mutex poisoned");
        std::fs::rename(&temp_path, &self.path).map_err(|e| IntentError::Io {
            source: e,
            context: "Failed to swap compacted intent log into place".to_string(),
        })?;
        *file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| IntentError::Io {
                source: e,
                context: "Failed to reopen intent log after compaction".to_string(),
            })?;

        tracing::info!(
            "Compacted intent log: kept {}, dropped {}",
            keep.len(),
            dropped.len()
        );
        Ok(dropped.len())
    }
}
