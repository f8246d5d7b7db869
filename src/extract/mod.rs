//! Content extraction capability
//!
//! The engine consumes extraction as a capability: implementations turn raw
//! source bytes into text plus optional model/part pairs. PDF and
//! vision/LLM extractors live outside this crate; Markdown and plain text
//! are handled by the built-in extractors so the engine is usable offline.

use crate::source::Pair;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;

pub mod pairs;

pub use pairs::extract_pairs_block;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// Extraction exceeded its deadline
    #[error("Extraction timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Input the extractor will never handle (bad MIME, undecodable bytes)
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// Upstream extractor/API failure
    #[error("Upstream extraction failure: {0}")]
    Upstream(String),
}

/// Extraction mode requested for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractMode {
    /// Datasheet-aware extraction with pair harvesting
    Datasheet,
    /// Generic document text extraction
    Generic,
    /// Markdown passthrough with light structure stripping
    Markdown,
    /// Sniff by extension / MIME hint
    Auto,
}

impl ExtractMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractMode::Datasheet => "datasheet",
            ExtractMode::Generic => "generic",
            ExtractMode::Markdown => "markdown",
            ExtractMode::Auto => "auto",
        }
    }
}

impl std::str::FromStr for ExtractMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "datasheet" => Ok(ExtractMode::Datasheet),
            "generic" => Ok(ExtractMode::Generic),
            "markdown" | "md" => Ok(ExtractMode::Markdown),
            "auto" => Ok(ExtractMode::Auto),
            other => Err(format!("unknown extract mode: {}", other)),
        }
    }
}

/// Options that shape how a document is processed. Part of the document
/// identity: changing any field yields a distinct options fingerprint and
/// therefore a distinct document id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub mode: ExtractMode,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Extraction prompt handed to LLM-backed extractors; part of the
    /// artifact cache key
    pub prompt: String,
    /// Whether to run keyword augmentation on chunks before indexing
    pub augment_keywords: bool,
}

impl ProcessingOptions {
    pub fn new(mode: ExtractMode, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            mode,
            chunk_size,
            chunk_overlap,
            prompt: String::new(),
            augment_keywords: false,
        }
    }

    /// Deterministic fingerprint over every identity-bearing field.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.mode.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.chunk_size.to_string().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.chunk_overlap.to_string().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.prompt.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(if self.augment_keywords { b"1" } else { b"0" });
        format!("{:.32}", hasher.finalize().to_hex())
    }

    /// Hash of the extraction prompt alone, used in the cache key
    pub fn prompt_hash(&self) -> String {
        crate::source::hash_hex(self.prompt.as_bytes())
    }
}

/// Output of a successful extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub text: String,
    pub pairs: Vec<Pair>,
    /// Tag describing how the text was produced ("markdown", "plain",
    /// "vision", ...)
    pub parse_method: String,
    pub page_count: u32,
}

/// Capability turning raw bytes into structured text plus optional pairs
pub trait ContentExtractor: Send + Sync {
    fn extract(
        &self,
        bytes: &[u8],
        mime_hint: Option<&str>,
        mode: ExtractMode,
        prompt: &str,
    ) -> Result<Extraction, ExtractError>;

    /// Version tag folded into artifact cache keys. A cache hit is
    /// authoritative only when this matches the stored value.
    fn version(&self) -> &str;
}

/// Rough page estimate used by the extraction deadline formula
pub fn estimate_pages(bytes: &[u8]) -> u32 {
    const BYTES_PER_PAGE: usize = 3_000;
    ((bytes.len() / BYTES_PER_PAGE) + 1) as u32
}

/// Run an extraction under a deadline computed as
/// `base + per_page * page_estimate`.
///
/// The extractor runs on a detached helper thread; if the deadline passes
/// the call returns `ExtractError::Timeout` and the helper thread is left
/// to finish on its own, its result discarded.
pub fn extract_with_deadline(
    extractor: std::sync::Arc<dyn ContentExtractor>,
    bytes: &[u8],
    mime_hint: Option<&str>,
    mode: ExtractMode,
    prompt: &str,
    base_secs: u64,
    per_page_secs: u64,
) -> Result<Extraction, ExtractError> {
    let deadline_secs = base_secs + per_page_secs * u64::from(estimate_pages(bytes));

    let (tx, rx) = mpsc::channel();
    let bytes_owned = bytes.to_vec();
    let mime_owned = mime_hint.map(|m| m.to_string());
    let prompt_owned = prompt.to_string();
    std::thread::spawn(move || {
        let result = extractor.extract(&bytes_owned, mime_owned.as_deref(), mode, &prompt_owned);
        // Receiver may be gone if the deadline already passed
        let _ = tx.send(result);
    });

    match rx.recv_timeout(Duration::from_secs(deadline_secs)) {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                "Extraction deadline of {}s exceeded (mode: {})",
                deadline_secs,
                mode.as_str()
            );
            Err(ExtractError::Timeout {
                secs: deadline_secs,
            })
        }
    }
}

/// Built-in extractor for Markdown and plain text sources.
///
/// Datasheet mode additionally harvests the `Metadata: {'pairs': ...}`
/// block an upstream LLM extractor may have embedded in the text.
pub struct TextExtractor {
    version: String,
}

impl TextExtractor {
    pub fn new() -> Self {
        Self {
            version: "text/1".to_string(),
        }
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for TextExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        mime_hint: Option<&str>,
        mode: ExtractMode,
        _prompt: &str,
    ) -> Result<Extraction, ExtractError> {
        let raw = std::str::from_utf8(bytes)
            .map_err(|_| ExtractError::Unsupported("input is not valid UTF-8".to_string()))?;

        let resolved = match mode {
            ExtractMode::Auto => resolve_auto_mode(mime_hint),
            other => other,
        };

        let (text, parse_method) = match resolved {
            ExtractMode::Markdown => (strip_markdown(raw), "markdown"),
            ExtractMode::Datasheet | ExtractMode::Generic => (raw.to_string(), "plain"),
            ExtractMode::Auto => unreachable!("auto mode resolved above"),
        };

        // Pair blocks only carry meaning for datasheets
        let (text, pairs) = if resolved == ExtractMode::Datasheet {
            extract_pairs_block(&text)
        } else {
            (text, Vec::new())
        };

        let page_count = estimate_pages(bytes);

        Ok(Extraction {
            text,
            pairs,
            parse_method: parse_method.to_string(),
            page_count,
        })
    }

    fn version(&self) -> &str {
        &self.version
    }
}

fn resolve_auto_mode(mime_hint: Option<&str>) -> ExtractMode {
    match mime_hint {
        Some(m) if m.contains("markdown") => ExtractMode::Markdown,
        Some(m) if m.starts_with("text/") => ExtractMode::Generic,
        _ => ExtractMode::Generic,
    }
}

/// Strip Markdown syntax that would pollute BM25 tokens: heading markers,
/// emphasis, inline code fences, and link targets. Content words survive.
fn strip_markdown(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let trimmed = line.trim_start();
        let without_heading = trimmed.trim_start_matches('#').trim_start();
        let line = without_heading
            .replace("**", "")
            .replace("__", "")
            .replace('`', "");
        // Keep link text, drop the target: [text](url) -> text
        let line = strip_link_targets(&line);
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn strip_link_targets(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find("](") else {
            break;
        };
        let close = open + close;
        let Some(paren_end) = rest[close..].find(')') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&rest[open + 1..close]);
        rest = &rest[close + paren_end + 1..];
    }
    out.push_str(rest);
    out
}
