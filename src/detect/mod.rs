//! Change detection
//!
//! Compares a newly observed source against its registry record and emits
//! a `ChangeKind` with a prescribed repair action. This is what lets the
//! engine skip redundant extraction and embedding work when nothing
//! relevant changed.

use crate::registry::{DocumentRecord, DocumentState};
use crate::source::Fingerprint;
use serde::{Deserialize, Serialize};

/// Kind of change detected for a source, in decision order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Record exists, content and options fingerprints equal: no-op
    Unchanged,
    /// No record for this source: full add
    NewDocument,
    /// Content fingerprint differs: remove-old-then-add-new
    ContentChanged,
    /// Content equal, options differ: regenerate chunks and replace
    OptionsChanged,
    /// Content and options equal but record metadata drifted: patch the
    /// registry only, no reindex
    MetadataOnly,
    /// Consistency flags disagree with adapter counts: repair
    Corrupt,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Unchanged => "unchanged",
            ChangeKind::NewDocument => "new_document",
            ChangeKind::ContentChanged => "content_changed",
            ChangeKind::OptionsChanged => "options_changed",
            ChangeKind::MetadataOnly => "metadata_only",
            ChangeKind::Corrupt => "corrupt",
        }
    }
}

/// Adapter-reported chunk counts for the record's doc id
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterCounts {
    pub vector: usize,
    pub keyword: usize,
}

/// Decide what changed for a source given its current bytes and the
/// registry's view of the last processed version.
///
/// Tie-break rule: if both content and options changed, the result is
/// `ContentChanged` (the full replace subsumes the options change).
/// `force` skips the `Unchanged` short-circuit and reprocesses.
pub fn detect(
    record: Option<&DocumentRecord>,
    fingerprint: &Fingerprint,
    options_fp: &str,
    adapter_counts: Option<AdapterCounts>,
    force: bool,
) -> ChangeKind {
    let Some(record) = record else {
        return ChangeKind::NewDocument;
    };

    // A record that never finished indexing is treated as new work
    if matches!(record.state, DocumentState::Failed | DocumentState::Removing) {
        return ChangeKind::ContentChanged;
    }

    let content_equal = record.fingerprint == fingerprint.content_hash;
    let options_equal = record.options_fp == options_fp;

    if !content_equal {
        return ChangeKind::ContentChanged;
    }
    if !options_equal {
        return ChangeKind::OptionsChanged;
    }

    // Content and options are stable; check the indexes actually hold what
    // the flags claim before declaring a no-op
    if let Some(counts) = adapter_counts {
        let expected = record.chunk_ids.len();
        let vector_ok = !record.vector_indexed || counts.vector == expected;
        let keyword_ok = !record.keyword_indexed || counts.keyword == expected;
        if !vector_ok || !keyword_ok {
            tracing::warn!(
                "Document {} flags disagree with adapter counts (vector {}/{}, keyword {}/{})",
                record.doc_id,
                counts.vector,
                expected,
                counts.keyword,
                expected
            );
            return ChangeKind::Corrupt;
        }
    }

    if force {
        return ChangeKind::OptionsChanged;
    }

    if record.metadata_hash != fingerprint.metadata_hash {
        return ChangeKind::MetadataOnly;
    }

    ChangeKind::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DocumentRecord;
    use crate::source::{ChunkId, SourceMeta};

    fn fingerprint(bytes: &[u8]) -> Fingerprint {
        Fingerprint::of_bytes(bytes, &SourceMeta::default())
    }

    fn ready_record(fp: &Fingerprint, options_fp: &str, chunks: usize) -> DocumentRecord {
        let mut record = DocumentRecord::pending(
            "doc1",
            "/a.pdf",
            fp.content_hash.clone(),
            fp.metadata_hash.clone(),
            options_fp,
        );
        record.state = DocumentState::Ready;
        record.vector_indexed = true;
        record.keyword_indexed = true;
        record.chunk_ids = (0..chunks as u32).map(|i| ChunkId::new("doc1", i)).collect();
        record
    }

    #[test]
    fn test_new_document() {
        let fp = fingerprint(b"bytes");
        assert_eq!(detect(None, &fp, "o1", None, false), ChangeKind::NewDocument);
    }

    #[test]
    fn test_unchanged() {
        let fp = fingerprint(b"bytes");
        let record = ready_record(&fp, "o1", 2);
        assert_eq!(
            detect(Some(&record), &fp, "o1", None, false),
            ChangeKind::Unchanged
        );
    }

    #[test]
    fn test_content_changed() {
        let old = fingerprint(b"v1");
        let new = fingerprint(b"v2");
        let record = ready_record(&old, "o1", 2);
        assert_eq!(
            detect(Some(&record), &new, "o1", None, false),
            ChangeKind::ContentChanged
        );
    }

    #[test]
    fn test_options_changed() {
        let fp = fingerprint(b"bytes");
        let record = ready_record(&fp, "o1", 2);
        assert_eq!(
            detect(Some(&record), &fp, "o2", None, false),
            ChangeKind::OptionsChanged
        );
    }

    #[test]
    fn test_both_changed_is_content_changed() {
        let old = fingerprint(b"v1");
        let new = fingerprint(b"v2");
        let record = ready_record(&old, "o1", 2);
        assert_eq!(
            detect(Some(&record), &new, "o2", None, false),
            ChangeKind::ContentChanged
        );
    }

    #[test]
    fn test_metadata_only() {
        let fp = fingerprint(b"bytes");
        let record = ready_record(&fp, "o1", 2);
        let drifted = Fingerprint::of_bytes(
            b"bytes",
            &SourceMeta {
                size: Some(5),
                modified_time: Some(1_700_000_123),
                name: Some("renamed.pdf".to_string()),
            },
        );
        assert_eq!(
            detect(Some(&record), &drifted, "o1", None, false),
            ChangeKind::MetadataOnly
        );
    }

    #[test]
    fn test_corrupt_when_counts_disagree() {
        let fp = fingerprint(b"bytes");
        let record = ready_record(&fp, "o1", 3);
        let counts = AdapterCounts {
            vector: 3,
            keyword: 1,
        };
        assert_eq!(
            detect(Some(&record), &fp, "o1", Some(counts), false),
            ChangeKind::Corrupt
        );
    }

    #[test]
    fn test_matching_counts_stay_unchanged() {
        let fp = fingerprint(b"bytes");
        let record = ready_record(&fp, "o1", 3);
        let counts = AdapterCounts {
            vector: 3,
            keyword: 3,
        };
        assert_eq!(
            detect(Some(&record), &fp, "o1", Some(counts), false),
            ChangeKind::Unchanged
        );
    }

    #[test]
    fn test_force_reprocesses() {
        let fp = fingerprint(b"bytes");
        let record = ready_record(&fp, "o1", 2);
        assert_eq!(
            detect(Some(&record), &fp, "o1", None, true),
            ChangeKind::OptionsChanged
        );
    }

    #[test]
    fn test_failed_record_reprocessed() {
        let fp = fingerprint(b"bytes");
        let mut record = ready_record(&fp, "o1", 2);
        record.state = DocumentState::Failed;
        assert_eq!(
            detect(Some(&record), &fp, "o1", None, false),
            ChangeKind::ContentChanged
        );
    }
}
