//! Fingerprint store
//!
//! Persistent mapping from source identity to the content fingerprint and
//! last-known processed state. Backed by SQLite in WAL mode; writes are
//! durable before being reported complete. No cross-key transactions are
//! needed.

use crate::error::{Result, SheafError};
use crate::source::Fingerprint;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// A stored fingerprint entry for a source
#[derive(Debug, Clone)]
pub struct FingerprintEntry {
    pub source: String,
    pub fingerprint: Fingerprint,
    pub doc_id: Option<String>,
    pub updated_at: i64,
}

/// Aggregate statistics for `status` reporting
#[derive(Debug, Default)]
pub struct FingerprintStats {
    pub total_sources: usize,
    pub with_doc_id: usize,
    pub average_size_bytes: u64,
}

/// Persistent source → fingerprint mapping
pub struct FingerprintStore {
    pool: Pool<SqliteConnectionManager>,
}

const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE fingerprints (
        source TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        metadata_hash TEXT NOT NULL,
        size INTEGER NOT NULL,
        modified_time INTEGER,
        doc_id TEXT,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX idx_fingerprints_content_hash ON fingerprints(content_hash);
    CREATE INDEX idx_fingerprints_updated_at ON fingerprints(updated_at);
    "#];

impl FingerprintStore {
    /// Open (or create) the store under the given directory
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| SheafError::Io {
            source: e,
            context: format!("Failed to create fingerprint directory: {}", dir.display()),
        })?;
        let db_path = dir.join("fingerprints.sqlite");

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

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
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
                tracing::info!("Applying fingerprint store migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }
        Ok(())
    }

    /// Look up the stored entry for a normalized source key
    pub fn lookup(&self, source: &str) -> Result<Option<FingerprintEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT source, content_hash, metadata_hash, size, modified_time, doc_id, updated_at
                 FROM fingerprints WHERE source = ?1",
                params![source],
                |row| {
                    Ok(FingerprintEntry {
                        source: row.get(0)?,
                        fingerprint: Fingerprint {
                            content_hash: row.get(1)?,
                            metadata_hash: row.get(2)?,
                            size: row.get::<_, i64>(3)? as u64,
                            modified_time: row.get(4)?,
                        },
                        doc_id: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Store or replace the entry for a source
    pub fn put(&self, source: &str, fingerprint: &Fingerprint, doc_id: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT OR REPLACE INTO fingerprints
             (source, content_hash, metadata_hash, size, modified_time, doc_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source,
                fingerprint.content_hash,
                fingerprint.metadata_hash,
                fingerprint.size as i64,
                fingerprint.modified_time,
                doc_id,
                now
            ],
        )?;
        tracing::debug!("Updated fingerprint for {}", source);
        Ok(())
    }

    /// Delete the entry for a source; succeeds if none exists
    pub fn delete(&self, source: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM fingerprints WHERE source = ?1", params![source])?;
        Ok(())
    }

    /// Delete entries not updated since the cutoff. Returns the number
    /// removed.
    pub fn sweep(&self, older_than: i64) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM fingerprints WHERE updated_at < ?1",
            params![older_than],
        )?;
        if removed > 0 {
            tracing::info!("Swept {} stale fingerprint entries", removed);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<FingerprintStats> {
        let conn = self.conn()?;
        let (total, with_doc, avg_size): (i64, i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), COUNT(doc_id), AVG(size) FROM fingerprints",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(FingerprintStats {
            total_sources: total as usize,
            with_doc_id: with_doc as usize,
            average_size_bytes: avg_size.unwrap_or(0.0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceMeta;
    use tempfile::TempDir;

    fn fp(bytes: &[u8]) -> Fingerprint {
        Fingerprint::of_bytes(bytes, &SourceMeta::default())
    }

    #[test]
    fn test_put_lookup_delete() {
        let temp = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp.path()).unwrap();

        assert!(store.lookup("/a/b.pdf").unwrap().is_none());

        let fingerprint = fp(b"datasheet bytes");
        store.put("/a/b.pdf", &fingerprint, Some("doc1")).unwrap();

        let entry = store.lookup("/a/b.pdf").unwrap().unwrap();
        assert_eq!(entry.fingerprint.content_hash, fingerprint.content_hash);
        assert_eq!(entry.doc_id.as_deref(), Some("doc1"));

        store.delete("/a/b.pdf").unwrap();
        assert!(store.lookup("/a/b.pdf").unwrap().is_none());
        // Deleting again is fine
        store.delete("/a/b.pdf").unwrap();
    }

    #[test]
    fn test_put_replaces() {
        let temp = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp.path()).unwrap();

        store.put("/a", &fp(b"v1"), Some("d1")).unwrap();
        store.put("/a", &fp(b"v2"), Some("d2")).unwrap();

        let entry = store.lookup("/a").unwrap().unwrap();
        assert_eq!(entry.doc_id.as_deref(), Some("d2"));
        assert_eq!(entry.fingerprint.content_hash, fp(b"v2").content_hash);
    }

    #[test]
    fn test_sweep() {
        let temp = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp.path()).unwrap();

        store.put("/old", &fp(b"x"), None).unwrap();
        let future = chrono::Utc::now().timestamp() + 100;
        let removed = store.sweep(future).unwrap();
        assert_eq!(removed, 1);
        assert!(store.lookup("/old").unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let temp = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp.path()).unwrap();

        store.put("/a", &fp(b"one"), Some("d1")).unwrap();
        store.put("/b", &fp(b"two"), None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_sources, 2);
        assert_eq!(stats.with_doc_id, 1);
    }
}
