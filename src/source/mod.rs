//! Source identity, fingerprints, and document/chunk ids
//!
//! Everything that names a document lives here: the source handle (local
//! path or URL), the content fingerprint used for change detection, and
//! the deterministic document and chunk ids derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A tagged reference identifying a document input: either a local path
/// or an absolute URL. Equality is by normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceHandle {
    Path(PathBuf),
    Url(String),
}

impl SourceHandle {
    /// Parse a raw string into a handle. Anything with a URL scheme is a
    /// URL; everything else is a local path.
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceHandle::Url(raw.to_string())
        } else {
            SourceHandle::Path(PathBuf::from(raw))
        }
    }

    /// Canonical string key used for identity, locking, and persistence.
    ///
    /// Paths are absolutized (canonicalized when the file exists); URLs get
    /// a lowercased scheme and host, default ports dropped, and trailing
    /// slashes stripped.
    pub fn normalized(&self) -> String {
        match self {
            SourceHandle::Path(p) => {
                let abs = p
                    .canonicalize()
                    .unwrap_or_else(|_| absolutize(p));
                abs.to_string_lossy().to_string()
            }
            SourceHandle::Url(u) => normalize_url(u),
        }
    }

    /// Short human-readable name (file name or URL)
    pub fn display_name(&self) -> String {
        match self {
            SourceHandle::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| p.to_string_lossy().to_string()),
            SourceHandle::Url(u) => u.clone(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SourceHandle::Path(_))
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceHandle::Path(p) => write!(f, "{}", p.display()),
            SourceHandle::Url(u) => write!(f, "{}", u),
        }
    }
}

fn absolutize(p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(p))
            .unwrap_or_else(|_| p.to_path_buf())
    }
}

fn normalize_url(raw: &str) -> String {
    let (scheme, rest) = match raw.split_once("://") {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => return raw.trim_end_matches('/').to_string(),
    };

    let (host_port, path) = match rest.split_once('/') {
        Some((hp, p)) => (hp, format!("/{}", p)),
        None => (rest, String::new()),
    };

    let mut host = host_port.to_ascii_lowercase();
    // Drop default ports
    let default_port = match scheme.as_str() {
        "http" => ":80",
        "https" => ":443",
        _ => "",
    };
    if !default_port.is_empty() && host.ends_with(default_port) {
        host.truncate(host.len() - default_port.len());
    }

    let path = path.trim_end_matches('/');
    format!("{}://{}{}", scheme, host, path)
}

/// Declared metadata of a source, folded into the fingerprint when known
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMeta {
    pub size: Option<u64>,
    pub modified_time: Option<i64>,
    pub name: Option<String>,
}

impl SourceMeta {
    /// Read size/mtime metadata from a local file, best-effort.
    pub fn from_path(path: &Path) -> Self {
        let mut meta = SourceMeta {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string()),
            ..Default::default()
        };
        if let Ok(m) = std::fs::metadata(path) {
            meta.size = Some(m.len());
            meta.modified_time = m
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);
        }
        meta
    }
}

/// A 256-bit content fingerprint with an optional metadata-folded variant.
///
/// `content_hash` covers the raw bytes only and is what change detection
/// compares; `metadata_hash` additionally folds declared size/mtime/name so
/// metadata-only drift is distinguishable from content change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub content_hash: String,
    pub metadata_hash: String,
    pub size: u64,
    pub modified_time: Option<i64>,
}

impl Fingerprint {
    /// Compute the fingerprint of raw content bytes plus optional declared
    /// metadata. Deterministic and stable under whitespace-preserving I/O.
    pub fn of_bytes(bytes: &[u8], meta: &SourceMeta) -> Self {
        let content_hash = hash_hex(bytes);

        let mut hasher = blake3::Hasher::new();
        hasher.update(content_hash.as_bytes());
        if let Some(name) = &meta.name {
            hasher.update(b"|name:");
            hasher.update(name.as_bytes());
        }
        if let Some(size) = meta.size {
            hasher.update(b"|size:");
            hasher.update(size.to_string().as_bytes());
        }
        if let Some(mtime) = meta.modified_time {
            hasher.update(b"|mtime:");
            hasher.update(mtime.to_string().as_bytes());
        }
        let metadata_hash = format!("{:.32}", hasher.finalize().to_hex());

        Fingerprint {
            content_hash,
            metadata_hash,
            size: meta.size.unwrap_or(bytes.len() as u64),
            modified_time: meta.modified_time,
        }
    }
}

/// Hash bytes with BLAKE3, truncated to 32 hex characters (128 bits)
pub fn hash_hex(data: &[u8]) -> String {
    format!("{:.32}", blake3::hash(data).to_hex())
}

/// Derive the opaque document id from the normalized source handle, the
/// content hash, and the processing-options fingerprint.
///
/// Two ingests of byte-identical content with the same options produce the
/// same id; changing either the content or the options yields a new id.
pub fn document_id(source_key: &str, content_hash: &str, options_fp: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source_key.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(content_hash.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(options_fp.as_bytes());
    format!("{:.32}", hasher.finalize().to_hex())
}

/// Identity of a single chunk: `(document id, zero-based ordinal)`.
///
/// Ordering is lexicographic on `(doc_id, ordinal)` and is used only for
/// tie-breaking and reconstruction, never for ranking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub doc_id: String,
    pub ordinal: u32,
}

impl ChunkId {
    pub fn new(doc_id: impl Into<String>, ordinal: u32) -> Self {
        Self {
            doc_id: doc_id.into(),
            ordinal,
        }
    }

    /// Stable string key, used as the per-chunk term in the keyword index
    pub fn key(&self) -> String {
        format!("{}:{:06}", self.doc_id, self.ordinal)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc_id, self.ordinal)
    }
}

/// A model-name / part-number pair extracted from a datasheet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub model_name: String,
    pub part_number: String,
}

impl Pair {
    pub fn new(model_name: impl Into<String>, part_number: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            part_number: part_number.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_vs_path() {
        assert!(matches!(
            SourceHandle::parse("https://example.com/ds.pdf"),
            SourceHandle::Url(_)
        ));
        assert!(matches!(
            SourceHandle::parse("/data/ds.pdf"),
            SourceHandle::Path(_)
        ));
        assert!(matches!(
            SourceHandle::parse("relative/ds.pdf"),
            SourceHandle::Path(_)
        ));
    }

    #[test]
    fn test_url_normalization() {
        let a = SourceHandle::Url("HTTPS://Example.COM:443/docs/".to_string());
        let b = SourceHandle::Url("https://example.com/docs".to_string());
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let meta = SourceMeta::default();
        let a = Fingerprint::of_bytes(b"hello world", &meta);
        let b = Fingerprint::of_bytes(b"hello world", &meta);
        assert_eq!(a, b);

        let c = Fingerprint::of_bytes(b"hello worle", &meta);
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[test]
    fn test_metadata_hash_folds_declared_meta() {
        let plain = Fingerprint::of_bytes(b"data", &SourceMeta::default());
        let with_meta = Fingerprint::of_bytes(
            b"data",
            &SourceMeta {
                size: Some(4),
                modified_time: Some(1_700_000_000),
                name: Some("ds.pdf".to_string()),
            },
        );
        assert_eq!(plain.content_hash, with_meta.content_hash);
        assert_ne!(plain.metadata_hash, with_meta.metadata_hash);
    }

    #[test]
    fn test_document_id_injective_inputs() {
        let base = document_id("/a/b.pdf", "c0ffee", "opts1");
        assert_eq!(base, document_id("/a/b.pdf", "c0ffee", "opts1"));
        assert_ne!(base, document_id("/a/b.pdf", "c0ffef", "opts1"));
        assert_ne!(base, document_id("/a/b.pdf", "c0ffee", "opts2"));
        assert_ne!(base, document_id("/a/c.pdf", "c0ffee", "opts1"));
    }

    #[test]
    fn test_chunk_id_ordering() {
        let a = ChunkId::new("aaa", 2);
        let b = ChunkId::new("aaa", 10);
        let c = ChunkId::new("bbb", 0);
        assert!(a < b);
        assert!(b < c);
    }
}
