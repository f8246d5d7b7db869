//! Document registry
//!
//! Single source of truth for what is indexed. Holds one record per
//! processed document version with its chunk ids, extracted pairs,
//! per-adapter indexing flags, and lifecycle state. Consistency between
//! the registry and the two index adapters is checked by
//! `verify_consistency`.

use crate::error::{Result, SheafError};
use crate::extract::ProcessingOptions;
use crate::source::{ChunkId, Pair};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Lifecycle state of a document record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    Pending,
    Parsing,
    Indexing,
    Ready,
    Failed,
    Removing,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Parsing => "parsing",
            DocumentState::Indexing => "indexing",
            DocumentState::Ready => "ready",
            DocumentState::Failed => "failed",
            DocumentState::Removing => "removing",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DocumentState::Pending),
            "parsing" => Ok(DocumentState::Parsing),
            "indexing" => Ok(DocumentState::Indexing),
            "ready" => Ok(DocumentState::Ready),
            "failed" => Ok(DocumentState::Failed),
            "removing" => Ok(DocumentState::Removing),
            other => Err(SheafError::Consistency(format!(
                "Unknown document state in registry: {}",
                other
            ))),
        }
    }
}

/// Canonical per-document state
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub doc_id: String,
    /// Normalized source key
    pub source: String,
    /// Content hash
    pub fingerprint: String,
    /// Metadata-folded hash, used to detect metadata-only drift
    pub metadata_hash: String,
    pub options_fp: String,
    /// Full processing options, retained so repair and recovery can
    /// regenerate chunks without the original job payload
    pub options: Option<ProcessingOptions>,
    pub chunk_ids: Vec<ChunkId>,
    pub pairs: Vec<Pair>,
    pub vector_indexed: bool,
    pub keyword_indexed: bool,
    pub state: DocumentState,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_error: Option<String>,
}

impl DocumentRecord {
    /// Fresh record in `Pending` for a newly observed document version
    pub fn pending(
        doc_id: impl Into<String>,
        source: impl Into<String>,
        fingerprint: impl Into<String>,
        metadata_hash: impl Into<String>,
        options_fp: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            doc_id: doc_id.into(),
            source: source.into(),
            fingerprint: fingerprint.into(),
            metadata_hash: metadata_hash.into(),
            options_fp: options_fp.into(),
            options: None,
            chunk_ids: Vec::new(),
            pairs: Vec::new(),
            vector_indexed: false,
            keyword_indexed: false,
            state: DocumentState::Pending,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }
}

/// Filter for `list`
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub state: Option<DocumentState>,
    pub source: Option<String>,
}

/// Paging for `list`
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Per-document verdict from a consistency check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyStatus {
    Consistent,
    MissingInVector,
    MissingInKeyword,
    OrphanInVector,
    OrphanInKeyword,
    StateInconsistent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyEntry {
    pub doc_id: String,
    pub status: ConsistencyStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub entries: Vec<ConsistencyEntry>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.status == ConsistencyStatus::Consistent)
    }

    pub fn problems(&self) -> impl Iterator<Item = &ConsistencyEntry> {
        self.entries
            .iter()
            .filter(|e| e.status != ConsistencyStatus::Consistent)
    }

    pub fn status_of(&self, doc_id: &str) -> Option<ConsistencyStatus> {
        self.entries
            .iter()
            .find(|e| e.doc_id == doc_id)
            .map(|e| e.status)
    }
}

/// Self-reported adapter contents: doc id → chunk count
#[derive(Debug, Clone, Default)]
pub struct AdapterReport {
    pub doc_counts: HashMap<String, usize>,
}

/// Registry statistics for `status` reporting
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub total: usize,
    pub by_state: HashMap<String, usize>,
}

const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE documents (
        doc_id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        metadata_hash TEXT NOT NULL,
        options_fp TEXT NOT NULL,
        options TEXT NOT NULL DEFAULT '{}',
        chunk_ids TEXT NOT NULL,
        pairs TEXT NOT NULL,
        vector_indexed INTEGER NOT NULL DEFAULT 0,
        keyword_indexed INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_error TEXT
    );

    CREATE INDEX idx_documents_source ON documents(source);
    CREATE INDEX idx_documents_state ON documents(state);
    "#];

/// Single source of truth for indexed documents
pub struct DocumentRegistry {
    pool: Pool<SqliteConnectionManager>,
}

struct RawRecord {
    doc_id: String,
    source: String,
    fingerprint: String,
    metadata_hash: String,
    options_fp: String,
    options_json: String,
    chunk_ids_json: String,
    pairs_json: String,
    vector_indexed: bool,
    keyword_indexed: bool,
    state: String,
    created_at: i64,
    updated_at: i64,
    last_error: Option<String>,
}

impl DocumentRegistry {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| SheafError::Io {
            source: e,
            context: format!("Failed to create registry directory: {}", dir.display()),
        })?;
        let db_path = dir.join("registry.sqlite");

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(8)
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

        let registry = Self { pool };
        registry.migrate()?;
        Ok(registry)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| SheafError::Config(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
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
                tracing::info!("Applying registry migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }
        Ok(())
    }

    /// Raw row shape: the record skeleton plus the JSON/state columns that
    /// need parsing outside the rusqlite layer, so serde errors do not
    /// masquerade as SQL errors.
    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
        Ok(RawRecord {
            doc_id: row.get(0)?,
            source: row.get(1)?,
            fingerprint: row.get(2)?,
            metadata_hash: row.get(3)?,
            options_fp: row.get(4)?,
            options_json: row.get(5)?,
            chunk_ids_json: row.get(6)?,
            pairs_json: row.get(7)?,
            vector_indexed: row.get::<_, i64>(8)? != 0,
            keyword_indexed: row.get::<_, i64>(9)? != 0,
            state: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            last_error: row.get(13)?,
        })
    }

    fn finish_record(raw: RawRecord) -> Result<DocumentRecord> {
        let chunk_ids =
            serde_json::from_str(&raw.chunk_ids_json).map_err(|e| SheafError::Json {
                source: e,
                context: format!("Corrupt chunk_ids for document {}", raw.doc_id),
            })?;
        let pairs = serde_json::from_str(&raw.pairs_json).map_err(|e| SheafError::Json {
            source: e,
            context: format!("Corrupt pairs for document {}", raw.doc_id),
        })?;
        let state = DocumentState::parse(&raw.state)?;
        let options = serde_json::from_str(&raw.options_json).unwrap_or(None);
        Ok(DocumentRecord {
            doc_id: raw.doc_id,
            source: raw.source,
            fingerprint: raw.fingerprint,
            metadata_hash: raw.metadata_hash,
            options_fp: raw.options_fp,
            options,
            chunk_ids,
            pairs,
            vector_indexed: raw.vector_indexed,
            keyword_indexed: raw.keyword_indexed,
            state,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            last_error: raw.last_error,
        })
    }

    const SELECT_COLS: &'static str = "doc_id, source, fingerprint, metadata_hash, options_fp, \
         options, chunk_ids, pairs, vector_indexed, keyword_indexed, state, created_at, updated_at, last_error";

    /// Fetch a record by document id
    pub fn get(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE doc_id = ?1",
                    Self::SELECT_COLS
                ),
                params![doc_id],
                Self::record_from_row,
            )
            .optional()?;
        raw.map(Self::finish_record).transpose()
    }

    /// Find the active record for a source: the `Ready` one when present,
    /// otherwise the most recently updated.
    pub fn find_by_source(&self, source: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE source = ?1
                     ORDER BY (state = 'ready') DESC, updated_at DESC LIMIT 1",
                    Self::SELECT_COLS
                ),
                params![source],
                Self::record_from_row,
            )
            .optional()?;
        raw.map(Self::finish_record).transpose()
    }

    /// All records for a source, newest first
    pub fn find_all_by_source(&self, source: &str) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE source = ?1 ORDER BY updated_at DESC",
            Self::SELECT_COLS
        ))?;
        let rows = stmt.query_map(params![source], Self::record_from_row)?;
        rows.map(|r| Self::finish_record(r?)).collect()
    }

    /// List records with filtering and paging
    pub fn list(&self, filter: &ListFilter, paging: Paging) -> Result<Vec<DocumentRecord>> {
        use rusqlite::types::Value;

        let conn = self.conn()?;
        let mut sql = format!("SELECT {} FROM documents WHERE 1=1", Self::SELECT_COLS);
        let mut args: Vec<Value> = Vec::new();

        if let Some(state) = filter.state {
            sql.push_str(" AND state = ?");
            args.push(Value::from(state.as_str().to_string()));
        }
        if let Some(source) = &filter.source {
            sql.push_str(" AND source = ?");
            args.push(Value::from(source.clone()));
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ? OFFSET ?");
        args.push(Value::from(paging.limit.min(i64::MAX as usize) as i64));
        args.push(Value::from(paging.offset.min(i64::MAX as usize) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), Self::record_from_row)?;
        rows.map(|r| Self::finish_record(r?)).collect()
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: &DocumentRecord) -> Result<()> {
        let conn = self.conn()?;
        let chunk_ids = serde_json::to_string(&record.chunk_ids).map_err(|e| SheafError::Json {
            source: e,
            context: "Failed to serialize chunk_ids".to_string(),
        })?;
        let pairs = serde_json::to_string(&record.pairs).map_err(|e| SheafError::Json {
            source: e,
            context: "Failed to serialize pairs".to_string(),
        })?;
        let options = serde_json::to_string(&record.options).map_err(|e| SheafError::Json {
            source: e,
            context: "Failed to serialize options".to_string(),
        })?;

        conn.execute(
            "INSERT OR REPLACE INTO documents
             (doc_id, source, fingerprint, metadata_hash, options_fp, options, chunk_ids, pairs,
              vector_indexed, keyword_indexed, state, created_at, updated_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.doc_id,
                record.source,
                record.fingerprint,
                record.metadata_hash,
                record.options_fp,
                options,
                chunk_ids,
                pairs,
                record.vector_indexed as i64,
                record.keyword_indexed as i64,
                record.state.as_str(),
                record.created_at,
                record.updated_at,
                record.last_error,
            ],
        )?;
        Ok(())
    }

    /// Transition a record's state, optionally recording a diagnostic
    pub fn set_state(
        &self,
        doc_id: &str,
        state: DocumentState,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let changed = conn.execute(
            "UPDATE documents SET state = ?1, last_error = ?2, updated_at = ?3 WHERE doc_id = ?4",
            params![state.as_str(), error, now, doc_id],
        )?;
        if changed == 0 {
            return Err(SheafError::Consistency(format!(
                "set_state on unknown document {}",
                doc_id
            )));
        }
        tracing::debug!("Document {} -> {}", doc_id, state.as_str());
        Ok(())
    }

    /// Flip one adapter's indexed flag. Called only after the
    /// corresponding adapter step succeeded.
    pub fn set_index_flag(&self, doc_id: &str, kind: crate::index::AdapterKind, value: bool) -> Result<()> {
        let conn = self.conn()?;
        let column = match kind {
            crate::index::AdapterKind::Vector => "vector_indexed",
            crate::index::AdapterKind::Keyword => "keyword_indexed",
        };
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            &format!(
                "UPDATE documents SET {} = ?1, updated_at = ?2 WHERE doc_id = ?3",
                column
            ),
            params![value as i64, now, doc_id],
        )?;
        Ok(())
    }

    /// Touch a record's `updated_at` without changing anything else
    pub fn touch(&self, doc_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE documents SET updated_at = ?1 WHERE doc_id = ?2",
            params![now, doc_id],
        )?;
        Ok(())
    }

    /// Delete a record; succeeds if it does not exist
    pub fn delete(&self, doc_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id])?;
        Ok(())
    }

    /// Compare registry flags against the adapters' self-reported doc-id
    /// sets and per-doc counts.
    pub fn verify_consistency(
        &self,
        vector: &AdapterReport,
        keyword: &AdapterReport,
    ) -> Result<ConsistencyReport> {
        let records = self.list(
            &ListFilter::default(),
            Paging {
                limit: i64::MAX as usize,
                offset: 0,
            },
        )?;

        let mut entries = Vec::new();
        let mut known: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for record in &records {
            known.insert(record.doc_id.as_str());
            // Records mid-removal or failed are not expected to be indexed
            if matches!(record.state, DocumentState::Removing | DocumentState::Failed) {
                continue;
            }

            let expected = record.chunk_ids.len();
            let in_vector = vector.doc_counts.get(&record.doc_id).copied();
            let in_keyword = keyword.doc_counts.get(&record.doc_id).copied();

            let status = if record.vector_indexed && in_vector != Some(expected) {
                ConsistencyStatus::MissingInVector
            } else if record.keyword_indexed && in_keyword != Some(expected) {
                ConsistencyStatus::MissingInKeyword
            } else if !record.vector_indexed && in_vector.is_some() {
                ConsistencyStatus::StateInconsistent
            } else if !record.keyword_indexed && in_keyword.is_some() {
                ConsistencyStatus::StateInconsistent
            } else if record.state == DocumentState::Ready
                && !(record.vector_indexed && record.keyword_indexed)
            {
                ConsistencyStatus::StateInconsistent
            } else {
                ConsistencyStatus::Consistent
            };

            entries.push(ConsistencyEntry {
                doc_id: record.doc_id.clone(),
                status,
            });
        }

        // Adapter entries with no registry record are orphans
        for doc_id in vector.doc_counts.keys() {
            if !known.contains(doc_id.as_str()) {
                entries.push(ConsistencyEntry {
                    doc_id: doc_id.clone(),
                    status: ConsistencyStatus::OrphanInVector,
                });
            }
        }
        for doc_id in keyword.doc_counts.keys() {
            if !known.contains(doc_id.as_str()) {
                entries.push(ConsistencyEntry {
                    doc_id: doc_id.clone(),
                    status: ConsistencyStatus::OrphanInKeyword,
                });
            }
        }

        Ok(ConsistencyReport { entries })
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        let conn = self.conn()?;
        let mut stats = RegistryStats::default();
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM documents GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            stats.total += count as usize;
            stats.by_state.insert(state, count as usize);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(doc_id: &str, source: &str) -> DocumentRecord {
        DocumentRecord::pending(doc_id, source, "fp", "mfp", "ofp")
    }

    #[test]
    fn test_upsert_get_delete() {
        let temp = TempDir::new().unwrap();
        let registry = DocumentRegistry::open(temp.path()).unwrap();

        assert!(registry.get("d1").unwrap().is_none());

        let mut rec = record("d1", "/a.pdf");
        rec.pairs.push(Pair::new("PM10K", "2293937"));
        rec.chunk_ids.push(ChunkId::new("d1", 0));
        registry.upsert(&rec).unwrap();

        let fetched = registry.get("d1").unwrap().unwrap();
        assert_eq!(fetched.source, "/a.pdf");
        assert_eq!(fetched.pairs.len(), 1);
        assert_eq!(fetched.chunk_ids, vec![ChunkId::new("d1", 0)]);
        assert_eq!(fetched.state, DocumentState::Pending);

        registry.delete("d1").unwrap();
        assert!(registry.get("d1").unwrap().is_none());
    }

    #[test]
    fn test_find_by_source_prefers_ready() {
        let temp = TempDir::new().unwrap();
        let registry = DocumentRegistry::open(temp.path()).unwrap();

        let mut old = record("old", "/a.pdf");
        old.state = DocumentState::Ready;
        registry.upsert(&old).unwrap();

        let mut newer = record("new", "/a.pdf");
        newer.updated_at += 100;
        registry.upsert(&newer).unwrap();

        let found = registry.find_by_source("/a.pdf").unwrap().unwrap();
        assert_eq!(found.doc_id, "old");

        assert_eq!(registry.find_all_by_source("/a.pdf").unwrap().len(), 2);
    }

    #[test]
    fn test_set_state_and_flags() {
        let temp = TempDir::new().unwrap();
        let registry = DocumentRegistry::open(temp.path()).unwrap();

        registry.upsert(&record("d1", "/a")).unwrap();

        registry
            .set_state("d1", DocumentState::Failed, Some("extractor died"))
            .unwrap();
        let rec = registry.get("d1").unwrap().unwrap();
        assert_eq!(rec.state, DocumentState::Failed);
        assert_eq!(rec.last_error.as_deref(), Some("extractor died"));

        registry
            .set_index_flag("d1", crate::index::AdapterKind::Vector, true)
            .unwrap();
        assert!(registry.get("d1").unwrap().unwrap().vector_indexed);

        assert!(registry
            .set_state("missing", DocumentState::Ready, None)
            .is_err());
    }

    #[test]
    fn test_list_filter_and_paging() {
        let temp = TempDir::new().unwrap();
        let registry = DocumentRegistry::open(temp.path()).unwrap();

        for i in 0..5 {
            let mut rec = record(&format!("d{}", i), &format!("/s{}", i));
            if i % 2 == 0 {
                rec.state = DocumentState::Ready;
            }
            registry.upsert(&rec).unwrap();
        }

        let ready = registry
            .list(
                &ListFilter {
                    state: Some(DocumentState::Ready),
                    source: None,
                },
                Paging::default(),
            )
            .unwrap();
        assert_eq!(ready.len(), 3);

        let page = registry
            .list(&ListFilter::default(), Paging { limit: 2, offset: 0 })
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_verify_consistency() {
        let temp = TempDir::new().unwrap();
        let registry = DocumentRegistry::open(temp.path()).unwrap();

        // Fully indexed, consistent document
        let mut good = record("good", "/good");
        good.chunk_ids = vec![ChunkId::new("good", 0), ChunkId::new("good", 1)];
        good.vector_indexed = true;
        good.keyword_indexed = true;
        good.state = DocumentState::Ready;
        registry.upsert(&good).unwrap();

        // Flagged as vector-indexed but adapter has wrong count
        let mut broken = record("broken", "/broken");
        broken.chunk_ids = vec![ChunkId::new("broken", 0)];
        broken.vector_indexed = true;
        broken.keyword_indexed = true;
        broken.state = DocumentState::Ready;
        registry.upsert(&broken).unwrap();

        let mut vector = AdapterReport::default();
        vector.doc_counts.insert("good".to_string(), 2);
        // "broken" missing from vector entirely
        vector.doc_counts.insert("ghost".to_string(), 3);

        let mut keyword = AdapterReport::default();
        keyword.doc_counts.insert("good".to_string(), 2);
        keyword.doc_counts.insert("broken".to_string(), 1);

        let report = registry.verify_consistency(&vector, &keyword).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(
            report.status_of("good"),
            Some(ConsistencyStatus::Consistent)
        );
        assert_eq!(
            report.status_of("broken"),
            Some(ConsistencyStatus::MissingInVector)
        );
        assert_eq!(
            report.status_of("ghost"),
            Some(ConsistencyStatus::OrphanInVector)
        );
    }

    #[test]
    fn test_stats() {
        let temp = TempDir::new().unwrap();
        let registry = DocumentRegistry::open(temp.path()).unwrap();

        registry.upsert(&record("a", "/a")).unwrap();
        let mut b = record("b", "/b");
        b.state = DocumentState::Ready;
        registry.upsert(&b).unwrap();

        let stats = registry.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_state.get("ready"), Some(&1));
    }
}
