//! Content-addressed artifact cache
//!
//! Stores fully-parsed extractor output keyed by content hash, extraction
//! prompt hash, and extractor version. Entries are pure functions of their
//! key, so evicting them is always safe and never required for
//! correctness. Values are JSON at rest, zstd-compressed when enabled,
//! written atomically via a temp-file rename.

use crate::extract::Extraction;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Cache entry corrupt: {0}")]
    Corrupt(String),
}

/// A cached extraction artifact together with the producing extractor
/// version
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Artifact {
    pub extraction: Extraction,
    pub extractor_version: String,
}

/// Cache hit/miss accounting, exposed through `status`
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
}

/// Content-addressed artifact cache with TTL eviction
pub struct ArtifactCache {
    base_path: PathBuf,
    enabled: bool,
    compress: bool,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ArtifactCache {
    pub fn open(base_path: &Path, enabled: bool, compress: bool, ttl_secs: u64) -> Result<Self, CacheError> {
        let entries_dir = base_path.join("entries");
        fs::create_dir_all(&entries_dir).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to create cache directory: {}", entries_dir.display()),
        })?;

        Ok(Self {
            base_path: base_path.to_path_buf(),
            enabled,
            compress,
            ttl: Duration::from_secs(ttl_secs),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Derive the cache key for an extraction artifact
    pub fn key(content_hash: &str, prompt_hash: &str, extractor_version: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(content_hash.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(prompt_hash.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(extractor_version.as_bytes());
        format!("{:.32}", hasher.finalize().to_hex())
    }

    /// Fetch an artifact. A stored entry whose `extractor_version` does not
    /// match the requested one is treated as a miss.
    pub fn get(&self, key: &str, extractor_version: &str) -> Option<Artifact> {
        if !self.enabled {
            return None;
        }

        let path = self.entry_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let decoded = match zstd::decode_all(&data[..]) {
            Ok(plain) => plain,
            Err(_) => data, // Entry was written uncompressed
        };

        let artifact: Artifact = match serde_json::from_slice(&decoded) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!("Dropping corrupt cache entry {}: {}", key, e);
                let _ = fs::remove_file(&path);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if artifact.extractor_version != extractor_version {
            tracing::debug!(
                "Cache entry {} produced by extractor {} (current {}); treating as miss",
                key,
                artifact.extractor_version,
                extractor_version
            );
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(artifact)
    }

    /// Store an artifact under its key. Atomic: written to a temp file and
    /// renamed into place.
    pub fn put(&self, key: &str, artifact: &Artifact) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let json = serde_json::to_vec(artifact)
            .map_err(|e| CacheError::Corrupt(format!("Failed to serialize artifact: {}", e)))?;

        let payload = if self.compress {
            zstd::encode_all(&json[..], 3).map_err(|e| CacheError::Io {
                source: e,
                context: "Failed to compress cache entry".to_string(),
            })?
        } else {
            json
        };

        let path = self.entry_path(key);
        let parent = path.parent().expect("entry path always has a parent");
        fs::create_dir_all(parent).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to create cache shard: {}", parent.display()),
        })?;

        let temp_path = parent.join(format!("{}.tmp", key));
        let mut file = fs::File::create(&temp_path).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to create temp cache file: {}", temp_path.display()),
        })?;
        file.write_all(&payload).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to write cache entry: {}", temp_path.display()),
        })?;
        file.sync_all().map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to sync cache entry: {}", temp_path.display()),
        })?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(|e| CacheError::Io {
            source: e,
            context: format!(
                "Failed to rename cache entry into place: {} -> {}",
                temp_path.display(),
                path.display()
            ),
        })?;

        Ok(())
    }

    /// Remove entries older than the configured TTL. Returns the number
    /// removed.
    pub fn sweep(&self) -> Result<usize, CacheError> {
        let cutoff = SystemTime::now()
            .checked_sub(self.ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        self.walk_entries(|path| {
            let expired = fs::metadata(path)
                .and_then(|m| m.modified())
                .map(|mtime| mtime < cutoff)
                .unwrap_or(false);
            if expired && fs::remove_file(path).is_ok() {
                removed += 1;
            }
        })?;

        if removed > 0 {
            tracing::info!("Swept {} expired cache entries", removed);
        }
        Ok(removed)
    }

    /// Remove every entry. Admin hook; always safe.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        self.walk_entries(|path| {
            if fs::remove_file(path).is_ok() {
                removed += 1;
            }
        })?;
        tracing::info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn entry_count(&self) -> Result<usize, CacheError> {
        let mut count = 0;
        self.walk_entries(|_| count += 1)?;
        Ok(count)
    }

    /// Two-level sharded path: entries/ab/cd/abcdef...
    fn entry_path(&self, key: &str) -> PathBuf {
        let shard1 = &key[0..2];
        let shard2 = &key[2..4];
        self.base_path
            .join("entries")
            .join(shard1)
            .join(shard2)
            .join(key)
    }

    fn walk_entries<F>(&self, mut callback: F) -> Result<(), CacheError>
    where
        F: FnMut(&Path),
    {
        let entries_dir = self.base_path.join("entries");
        if !entries_dir.exists() {
            return Ok(());
        }

        let read_dir = |p: &Path| {
            fs::read_dir(p).map_err(|e| CacheError::Io {
                source: e,
                context: format!("Failed to read cache directory: {}", p.display()),
            })
        };

        for shard1 in read_dir(&entries_dir)?.flatten() {
            if !shard1.path().is_dir() {
                continue;
            }
            for shard2 in read_dir(&shard1.path())?.flatten() {
                if !shard2.path().is_dir() {
                    continue;
                }
                for entry in read_dir(&shard2.path())?.flatten() {
                    let path = entry.path();
                    let is_temp = path
                        .extension()
                        .map(|e| e == "tmp")
                        .unwrap_or(false);
                    if path.is_file() && !is_temp {
                        callback(&path);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Pair;
    use tempfile::TempDir;

    fn artifact(version: &str) -> Artifact {
        Artifact {
            extraction: Extraction {
                text: "sensor head text".to_string(),
                pairs: vec![Pair::new("PM10K", "2293937")],
                parse_method: "plain".to_string(),
                page_count: 3,
            },
            extractor_version: version.to_string(),
        }
    }

    #[test]
    fn test_put_get_roundtrip() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(temp.path(), true, true, 3600).unwrap();

        let key = ArtifactCache::key("c0ffee", "deadbeef", "text/1");
        assert!(cache.get(&key, "text/1").is_none());

        cache.put(&key, &artifact("text/1")).unwrap();
        let hit = cache.get(&key, "text/1").unwrap();
        assert_eq!(hit.extraction.text, "sensor head text");
        assert_eq!(hit.extraction.pairs.len(), 1);

        let counters = cache.counters();
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
    }

    #[test]
    fn test_version_mismatch_is_miss() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(temp.path(), true, false, 3600).unwrap();

        let key = ArtifactCache::key("c0ffee", "deadbeef", "text/1");
        cache.put(&key, &artifact("text/1")).unwrap();

        assert!(cache.get(&key, "text/2").is_none());
        assert_eq!(cache.counters().misses, 1);
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(temp.path(), false, false, 3600).unwrap();

        let key = ArtifactCache::key("a", "b", "v");
        cache.put(&key, &artifact("v")).unwrap();
        assert!(cache.get(&key, "v").is_none());
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(temp.path(), true, true, 3600).unwrap();

        for i in 0..4 {
            let key = ArtifactCache::key(&format!("content{}", i), "p", "v");
            cache.put(&key, &artifact("v")).unwrap();
        }
        assert_eq!(cache.entry_count().unwrap(), 4);

        let removed = cache.clear().unwrap();
        assert_eq!(removed, 4);
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_sweep_with_zero_ttl_removes_everything() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(temp.path(), true, false, 0).unwrap();

        let key = ArtifactCache::key("x", "y", "v");
        cache.put(&key, &artifact("v")).unwrap();

        let removed = cache.sweep().unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get(&key, "v").is_none());
    }

    #[test]
    fn test_key_distinct_per_component() {
        let base = ArtifactCache::key("c", "p", "v1");
        assert_ne!(base, ArtifactCache::key("c2", "p", "v1"));
        assert_ne!(base, ArtifactCache::key("c", "p2", "v1"));
        assert_ne!(base, ArtifactCache::key("c", "p", "v2"));
    }
}
