//! Document lifecycle integration tests: idempotent ingest, change
//! detection, replacement, options change, and removal.

mod common;

use common::{build_engine, datasheet_text, engine, options, write_source};
use sheaf::detect::ChangeKind;
use sheaf::extract::ExtractMode;
use sheaf::index::{AdapterQuery, IndexAdapter};
use sheaf::manager::{CancelToken, RemoveTarget};
use sheaf::registry::DocumentState;
use sheaf::search::{SearchQuery, SearchType};
use std::sync::atomic::Ordering;
use tempfile::TempDir;

#[test]
fn fresh_add_of_a_datasheet() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "pm10k.txt", &datasheet_text("QZX9904"));
    let opts = options(ExtractMode::Datasheet, 120, 20);
    let cancel = CancelToken::new();

    let outcome = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    assert_eq!(outcome.change, ChangeKind::NewDocument);
    assert!(outcome.chunk_count >= 1);
    assert_eq!(outcome.pair_count, 2);

    let record = eng
        .ctx
        .registry
        .find_by_source(&handle.normalized())
        .unwrap()
        .unwrap();
    assert_eq!(record.state, DocumentState::Ready);
    assert!(record.vector_indexed && record.keyword_indexed);
    assert_eq!(record.chunk_ids.len(), outcome.chunk_count);
    assert_eq!(record.pairs.len(), 2);
    assert_eq!(record.pairs[0].model_name, "PM10K");
    assert_eq!(record.pairs[0].part_number, "2293937");

    // Both adapters hold exactly the registered chunks
    assert_eq!(
        eng.ctx.vector.count(Some(&record.doc_id)).unwrap(),
        record.chunk_ids.len()
    );
    assert_eq!(
        eng.ctx.keyword.count(Some(&record.doc_id)).unwrap(),
        record.chunk_ids.len()
    );

    // A query for the unique in-document token reaches the doc through
    // both index paths
    let keyword_hits = eng
        .ctx
        .keyword
        .query(AdapterQuery::Text("QZX9904"), 10, None)
        .unwrap();
    assert!(keyword_hits.iter().any(|h| h.chunk.doc_id == record.doc_id));

    let hybrid = eng
        .searcher
        .search(&SearchQuery::hybrid("QZX9904 detector assembly", 5))
        .unwrap();
    assert!(hybrid.iter().any(|h| h.chunk.doc_id == record.doc_id));

    // The freshly added doc verifies consistent
    let report = eng.manager.verify().unwrap();
    assert!(report.is_consistent());
}

#[test]
fn idempotent_re_add_is_unchanged() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("UNIQ1"));
    let opts = options(ExtractMode::Datasheet, 200, 40);
    let cancel = CancelToken::new();

    let first = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();
    let record_before = eng.ctx.registry.get(&first.doc_id).unwrap().unwrap();
    assert_eq!(eng.extract_calls.load(Ordering::SeqCst), 1);

    let second = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    // Same doc id, no second extraction, adapters untouched
    assert_eq!(second.change, ChangeKind::Unchanged);
    assert_eq!(second.doc_id, first.doc_id);
    assert_eq!(eng.extract_calls.load(Ordering::SeqCst), 1);

    let record_after = eng.ctx.registry.get(&first.doc_id).unwrap().unwrap();
    assert_eq!(record_after.chunk_ids, record_before.chunk_ids);
    assert_eq!(record_after.pairs, record_before.pairs);
    assert!(record_after.updated_at >= record_before.updated_at);

    assert_eq!(
        eng.ctx.vector.count(Some(&first.doc_id)).unwrap(),
        record_after.chunk_ids.len()
    );
    assert!(eng.manager.verify().unwrap().is_consistent());
}

#[test]
fn content_change_replaces_document() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let opts = options(ExtractMode::Datasheet, 120, 20);
    let cancel = CancelToken::new();

    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("OLDTOKEN77"));
    let first = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();
    let old_doc = first.doc_id.clone();

    // Mutate the content and re-add
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("NEWTOKEN88"));
    let second = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    // Exactly one ready record, new content indexed, old gone
    assert_eq!(second.change, ChangeKind::ContentChanged);
    assert_ne!(second.doc_id, old_doc);

    assert!(eng.ctx.registry.get(&old_doc).unwrap().is_none());
    assert_eq!(eng.ctx.vector.count(Some(&old_doc)).unwrap(), 0);
    assert_eq!(eng.ctx.keyword.count(Some(&old_doc)).unwrap(), 0);

    let records = eng
        .ctx
        .registry
        .find_all_by_source(&handle.normalized())
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, DocumentState::Ready);

    // A hybrid query for the old unique token returns nothing
    let hits = eng
        .searcher
        .search(&SearchQuery::hybrid("OLDTOKEN77", 10))
        .unwrap();
    assert!(hits.iter().all(|h| h.chunk.doc_id != old_doc));

    assert!(eng.manager.verify().unwrap().is_consistent());
}

#[test]
fn options_change_rechunks_from_cache() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let cancel = CancelToken::new();

    // Long enough body that halving the chunk size visibly changes the
    // chunk count
    let body = format!(
        "{}\n{}",
        datasheet_text("OPTTOK1"),
        "thermal sensor calibration words repeated over and over again ".repeat(40)
    );
    let handle = write_source(temp.path(), "doc.txt", &body);

    let big = options(ExtractMode::Datasheet, 400, 40);
    let first = eng
        .manager
        .ingest_path(&handle, &big, false, &cancel)
        .unwrap();
    assert_eq!(eng.extract_calls.load(Ordering::SeqCst), 1);

    let small = options(ExtractMode::Datasheet, 200, 20);
    let second = eng
        .manager
        .ingest_path(&handle, &small, false, &cancel)
        .unwrap();

    assert_eq!(second.change, ChangeKind::OptionsChanged);
    // doc id changes across an options change; the old record is gone
    assert_ne!(second.doc_id, first.doc_id);
    assert!(eng.ctx.registry.get(&first.doc_id).unwrap().is_none());

    // Chunks were regenerated from the cached artifact, not re-extracted
    assert_eq!(eng.extract_calls.load(Ordering::SeqCst), 1);
    assert!(eng.ctx.cache.counters().hits >= 1);

    // Roughly double the chunks, identical pairs
    assert!(second.chunk_count > first.chunk_count);
    assert_eq!(second.pair_count, first.pair_count);

    let record = eng.ctx.registry.get(&second.doc_id).unwrap().unwrap();
    assert_eq!(
        eng.ctx.vector.count(Some(&second.doc_id)).unwrap(),
        record.chunk_ids.len()
    );
    assert_eq!(
        eng.ctx.keyword.count(Some(&second.doc_id)).unwrap(),
        record.chunk_ids.len()
    );
    assert!(eng.manager.verify().unwrap().is_consistent());
}

#[test]
fn remove_is_total() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("REMTOK5"));
    let opts = options(ExtractMode::Datasheet, 150, 30);
    let cancel = CancelToken::new();

    let outcome = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    let removed = eng
        .manager
        .remove(&RemoveTarget::Source(handle.clone()))
        .unwrap();
    assert_eq!(removed, vec![outcome.doc_id.clone()]);

    // Both adapters empty for the doc, registry has no record
    assert_eq!(eng.ctx.vector.count(Some(&outcome.doc_id)).unwrap(), 0);
    assert_eq!(eng.ctx.keyword.count(Some(&outcome.doc_id)).unwrap(), 0);
    assert!(eng
        .ctx
        .registry
        .find_by_source(&handle.normalized())
        .unwrap()
        .is_none());
    assert!(eng
        .ctx
        .fingerprints
        .lookup(&handle.normalized())
        .unwrap()
        .is_none());

    // Cache entries survive removal
    assert!(eng.ctx.cache.entry_count().unwrap() >= 1);

    // Removing an absent source is a no-op
    let removed = eng.manager.remove(&RemoveTarget::Source(handle)).unwrap();
    assert!(removed.is_empty());

    assert!(eng.manager.verify().unwrap().is_consistent());
}

#[test]
fn remove_by_doc_id() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("BYIDTOK"));
    let opts = options(ExtractMode::Datasheet, 150, 30);
    let cancel = CancelToken::new();

    let outcome = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    let removed = eng
        .manager
        .remove(&RemoveTarget::DocId(outcome.doc_id.clone()))
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert!(eng.ctx.registry.get(&outcome.doc_id).unwrap().is_none());
}

#[test]
fn keyword_augmentation_lands_in_indexed_text() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("AUGTOK"));
    let mut opts = options(ExtractMode::Datasheet, 200, 40);
    opts.augment_keywords = true;
    let cancel = CancelToken::new();

    eng.manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    // The generator's marker token is searchable: augmentation is part of
    // the chunk payload, not a side channel
    let hits = eng
        .ctx
        .keyword
        .query(AdapterQuery::Text("augmarker"), 10, None)
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].text.contains("augmarker"));
}

#[test]
fn extraction_failure_latches_failed_state() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    // Invalid UTF-8 makes the text extractor report Unsupported
    let path = temp.path().join("bad.bin");
    std::fs::write(&path, [0xff, 0xfe, 0x00, 0x01]).unwrap();
    let handle = sheaf::source::SourceHandle::Path(path);
    let opts = options(ExtractMode::Generic, 200, 40);
    let cancel = CancelToken::new();

    let result = eng.manager.ingest_path(&handle, &opts, false, &cancel);
    assert!(result.is_err());

    let record = eng
        .ctx
        .registry
        .find_by_source(&handle.normalized())
        .unwrap()
        .unwrap();
    assert_eq!(record.state, DocumentState::Failed);
    assert!(record.last_error.is_some());

    // No adapter writes were attempted
    assert_eq!(eng.ctx.vector.count(Some(&record.doc_id)).unwrap(), 0);
    assert_eq!(eng.ctx.keyword.count(Some(&record.doc_id)).unwrap(), 0);
}

#[test]
fn repair_fixes_orphans_and_missing_chunks() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("REPTOK"));
    let opts = options(ExtractMode::Datasheet, 150, 30);
    let cancel = CancelToken::new();

    let outcome = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    // Sabotage: drop the document from the keyword adapter behind the
    // registry's back
    eng.ctx.keyword.delete(&outcome.doc_id).unwrap();
    let report = eng.manager.verify().unwrap();
    assert!(!report.is_consistent());

    let summary = eng.manager.repair().unwrap();
    assert!(summary.repaired >= 1);
    assert!(summary.failed.is_empty());

    let report = eng.manager.verify().unwrap();
    assert!(report.is_consistent());

    let record = eng.ctx.registry.get(&outcome.doc_id).unwrap().unwrap();
    assert_eq!(record.state, DocumentState::Ready);
    assert_eq!(
        eng.ctx.keyword.count(Some(&outcome.doc_id)).unwrap(),
        record.chunk_ids.len()
    );
}

#[test]
fn vector_search_and_keyword_search_types() {
    let temp = TempDir::new().unwrap();
    let eng = engine(temp.path());
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("TYPETOK"));
    let opts = options(ExtractMode::Datasheet, 200, 40);
    let cancel = CancelToken::new();
    eng.manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();

    let vector_only = eng
        .searcher
        .search(&SearchQuery {
            text: "thermopile disc heat sink".to_string(),
            top_k: 5,
            search_type: SearchType::Vector,
            method: None,
            filter: None,
        })
        .unwrap();
    assert!(!vector_only.is_empty());
    assert!(vector_only.iter().all(|h| h.keyword_rank.is_none()));

    let keyword_only = eng
        .searcher
        .search(&SearchQuery {
            text: "TYPETOK".to_string(),
            top_k: 5,
            search_type: SearchType::Keyword,
            method: None,
            filter: None,
        })
        .unwrap();
    assert!(!keyword_only.is_empty());
    assert!(keyword_only.iter().all(|h| h.vector_rank.is_none()));
}

#[test]
fn force_reprocesses_without_new_extraction() {
    let temp = TempDir::new().unwrap();
    let eng = build_engine(temp.path(), 0);
    let handle = write_source(temp.path(), "doc.txt", &datasheet_text("FORCETOK"));
    let opts = options(ExtractMode::Datasheet, 200, 40);
    let cancel = CancelToken::new();

    let first = eng
        .manager
        .ingest_path(&handle, &opts, false, &cancel)
        .unwrap();
    let second = eng
        .manager
        .ingest_path(&handle, &opts, true, &cancel)
        .unwrap();

    assert_eq!(second.change, ChangeKind::OptionsChanged);
    assert_eq!(second.doc_id, first.doc_id);
    // Forced reprocess reuses the cached artifact
    assert_eq!(eng.extract_calls.load(Ordering::SeqCst), 1);
    assert!(eng.manager.verify().unwrap().is_consistent());
}
