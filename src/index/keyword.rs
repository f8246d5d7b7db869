//! Tantivy keyword index with BM25 scoring
//!
//! Chunks are indexed under a raw per-chunk key for overwrite idempotency
//! and a raw doc-id term for cheap whole-document deletes. Scores are raw
//! BM25 (tantivy's standard k1 = 1.2, b = 0.75) and deliberately
//! unnormalized; the fusion layer normalizes only when its method needs
//! to.

use super::{
    AdapterKind, AdapterQuery, ChunkPayload, DocFilter, IndexAdapter, IndexError, IndexedChunk,
    QueryHit,
};
use crate::source::ChunkId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery, TermSetQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, INDEXED, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

/// Durable keyword index adapter
pub struct KeywordStore {
    index: Index,
    reader: RwLock<IndexReader>,
    writer: Mutex<IndexWriter>,
    doc_id_field: Field,
    chunk_key_field: Field,
    ordinal_field: Field,
    text_field: Field,
    payload_field: Field,
    #[allow(dead_code)]
    index_path: PathBuf,
}

const WRITER_BUFFER_BYTES: usize = 50_000_000;

impl KeywordStore {
    /// Open (or create) the index under the given directory
    pub fn open(index_path: &Path) -> Result<Self, IndexError> {
        let index_path = index_path.to_path_buf();
        std::fs::create_dir_all(&index_path)?;

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)
                .map_err(|e| IndexError::InitializationError(e.to_string()))?
        } else {
            let mut schema_builder = Schema::builder();
            schema_builder.add_text_field("doc_id", STRING | STORED);
            schema_builder.add_text_field("chunk_key", STRING);
            schema_builder.add_u64_field("ordinal", INDEXED | STORED);
            schema_builder.add_text_field("text", TEXT | STORED);
            schema_builder.add_text_field("payload", STORED);
            let schema = schema_builder.build();

            Index::create_in_dir(&index_path, schema)
                .map_err(|e| IndexError::InitializationError(e.to_string()))?
        };

        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                IndexError::InitializationError(format!("Missing '{}' field in schema", name))
            })
        };
        let doc_id_field = field("doc_id")?;
        let chunk_key_field = field("chunk_key")?;
        let ordinal_field = field("ordinal")?;
        let text_field = field("text")?;
        let payload_field = field("payload")?;

        let writer = index
            .writer(WRITER_BUFFER_BYTES)
            .map_err(|e| IndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| {
                IndexError::InitializationError(e.to_string())
            })?;

        Ok(Self {
            index,
            reader: RwLock::new(reader),
            writer: Mutex::new(writer),
            doc_id_field,
            chunk_key_field,
            ordinal_field,
            text_field,
            payload_field,
            index_path,
        })
    }

    fn commit_and_reload(&self, writer: &mut IndexWriter) -> Result<(), IndexError> {
        writer
            .commit()
            .map_err(|e| IndexError::InsertError(e.to_string()))?;
        self.reader
            .read()
            .expect("keyword reader lock poisoned")
            .reload()
            .map_err(|e| IndexError::SearchError(e.to_string()))?;
        Ok(())
    }

    fn hit_from_doc(&self, retrieved: &TantivyDocument, score: f32) -> Result<QueryHit, IndexError> {
        let doc_id = retrieved
            .get_first(self.doc_id_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| IndexError::SearchError("Missing doc_id field".to_string()))?
            .to_string();
        let ordinal = retrieved
            .get_first(self.ordinal_field)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| IndexError::SearchError("Missing ordinal field".to_string()))?
            as u32;
        let text = retrieved
            .get_first(self.text_field)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let payload = retrieved
            .get_first(self.payload_field)
            .and_then(|v| v.as_str())
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(ChunkPayload {
                doc_id: doc_id.clone(),
                source: String::new(),
                ordinal,
                pair_refs: vec![],
                language: None,
                parse_method: String::new(),
            });

        Ok(QueryHit {
            chunk: ChunkId::new(doc_id, ordinal),
            score,
            text,
            payload,
        })
    }
}

impl IndexAdapter for KeywordStore {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Keyword
    }

    fn add(&self, doc_id: &str, chunks: &[IndexedChunk]) -> Result<(), IndexError> {
        let mut writer = self.writer.lock().expect("keyword writer lock poisoned");

        for chunk in chunks {
            let chunk_key = ChunkId::new(doc_id.to_string(), chunk.ordinal).key();
            // Overwrite semantics per (doc_id, ordinal)
            writer.delete_term(Term::from_field_text(self.chunk_key_field, &chunk_key));

            let payload_json = serde_json::to_string(&chunk.payload)
                .map_err(|e| IndexError::InsertError(format!("payload: {}", e)))?;

            writer
                .add_document(doc!(
                    self.doc_id_field => doc_id,
                    self.chunk_key_field => chunk_key,
                    self.ordinal_field => u64::from(chunk.ordinal),
                    self.text_field => chunk.text.clone(),
                    self.payload_field => payload_json,
                ))
                .map_err(|e| IndexError::InsertError(e.to_string()))?;
        }

        self.commit_and_reload(&mut writer)?;
        tracing::debug!("Keyword add: {} chunks for {}", chunks.len(), doc_id);
        Ok(())
    }

    fn delete(&self, doc_id: &str) -> Result<(), IndexError> {
        let mut writer = self.writer.lock().expect("keyword writer lock poisoned");
        writer.delete_term(Term::from_field_text(self.doc_id_field, doc_id));
        self.commit_and_reload(&mut writer)?;
        tracing::debug!("Keyword delete: {}", doc_id);
        Ok(())
    }

    fn query(
        &self,
        query: AdapterQuery<'_>,
        top_k: usize,
        filter: Option<&DocFilter>,
    ) -> Result<Vec<QueryHit>, IndexError> {
        let AdapterQuery::Text(text) = query else {
            return Err(IndexError::UnsupportedQuery {
                kind: AdapterKind::Keyword,
            });
        };

        let reader = self.reader.read().expect("keyword reader lock poisoned");
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        // Lenient parsing: queries are user text, not query syntax
        let (user_query, _errors) = query_parser.parse_query_lenient(text);

        let final_query: Box<dyn Query> = match filter {
            Some(filter) if !filter.is_empty() => {
                let terms: Vec<Term> = filter
                    .doc_ids()
                    .map(|d| Term::from_field_text(self.doc_id_field, d))
                    .collect();
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, user_query),
                    (Occur::Must, Box::new(TermSetQuery::new(terms))),
                ]))
            }
            _ => user_query,
        };

        let top_docs = searcher
            .search(&final_query, &TopDocs::with_limit(top_k.max(1)))
            .map_err(|e| IndexError::SearchError(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| IndexError::SearchError(e.to_string()))?;
            hits.push(self.hit_from_doc(&retrieved, score)?);
        }

        Ok(hits)
    }

    fn count(&self, doc_id: Option<&str>) -> Result<usize, IndexError> {
        let reader = self.reader.read().expect("keyword reader lock poisoned");
        let searcher = reader.searcher();

        match doc_id {
            Some(doc_id) => {
                let term = Term::from_field_text(self.doc_id_field, doc_id);
                let query = TermQuery::new(term, IndexRecordOption::Basic);
                let count = searcher
                    .search(&query, &Count)
                    .map_err(|e| IndexError::SearchError(e.to_string()))?;
                Ok(count)
            }
            None => Ok(searcher.num_docs() as usize),
        }
    }

    fn doc_counts(&self) -> Result<HashMap<String, usize>, IndexError> {
        let reader = self.reader.read().expect("keyword reader lock poisoned");
        let searcher = reader.searcher();

        let addresses = searcher
            .search(&tantivy::query::AllQuery, &DocSetCollector)
            .map_err(|e| IndexError::SearchError(e.to_string()))?;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for address in addresses {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| IndexError::SearchError(e.to_string()))?;
            if let Some(doc_id) = retrieved
                .get_first(self.doc_id_field)
                .and_then(|v| v.as_str())
            {
                *counts.entry(doc_id.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(doc_id: &str, ordinal: u32, text: &str) -> IndexedChunk {
        IndexedChunk {
            ordinal,
            text: text.to_string(),
            embedding: None,
            payload: ChunkPayload {
                doc_id: doc_id.to_string(),
                source: "/src".to_string(),
                ordinal,
                pair_refs: vec![],
                language: None,
                parse_method: "plain".to_string(),
            },
        }
    }

    #[test]
    fn test_add_and_search() {
        let temp = TempDir::new().unwrap();
        let store = KeywordStore::open(temp.path()).unwrap();

        store
            .add(
                "d1",
                &[
                    chunk("d1", 0, "The PM10K thermal sensor measures laser power"),
                    chunk("d1", 1, "Calibration is traceable to NIST standards"),
                ],
            )
            .unwrap();
        store
            .add("d2", &[chunk("d2", 0, "Photodiode sensors for low power")])
            .unwrap();

        assert_eq!(store.count(None).unwrap(), 3);
        assert_eq!(store.count(Some("d1")).unwrap(), 2);

        let hits = store
            .query(AdapterQuery::Text("PM10K"), 10, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk, ChunkId::new("d1", 0));
        assert!(hits[0].score > 0.0, "BM25 scores are raw and positive");

        let hits = store
            .query(AdapterQuery::Text("sensor"), 10, None)
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_overwrite_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = KeywordStore::open(temp.path()).unwrap();

        store.add("d1", &[chunk("d1", 0, "alpha beta")]).unwrap();
        store.add("d1", &[chunk("d1", 0, "alpha beta")]).unwrap();

        assert_eq!(store.count(Some("d1")).unwrap(), 1);
    }

    #[test]
    fn test_delete_total_and_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = KeywordStore::open(temp.path()).unwrap();

        store
            .add("d1", &[chunk("d1", 0, "one"), chunk("d1", 1, "two")])
            .unwrap();
        store.add("d2", &[chunk("d2", 0, "three")]).unwrap();

        store.delete("d1").unwrap();
        assert_eq!(store.count(Some("d1")).unwrap(), 0);
        assert_eq!(store.count(Some("d2")).unwrap(), 1);

        // Deleting again succeeds
        store.delete("d1").unwrap();
    }

    #[test]
    fn test_filter_restricts_results() {
        let temp = TempDir::new().unwrap();
        let store = KeywordStore::open(temp.path()).unwrap();

        store.add("d1", &[chunk("d1", 0, "laser power")]).unwrap();
        store.add("d2", &[chunk("d2", 0, "laser power")]).unwrap();

        let filter = DocFilter::new(vec!["d2".to_string()]);
        let hits = store
            .query(AdapterQuery::Text("laser"), 10, Some(&filter))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.doc_id, "d2");
    }

    #[test]
    fn test_reopen_preserves_index() {
        let temp = TempDir::new().unwrap();
        {
            let store = KeywordStore::open(temp.path()).unwrap();
            store.add("d1", &[chunk("d1", 0, "persistent text")]).unwrap();
        }
        let store = KeywordStore::open(temp.path()).unwrap();
        assert_eq!(store.count(None).unwrap(), 1);
        let hits = store
            .query(AdapterQuery::Text("persistent"), 10, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_embedding_query_unsupported() {
        let temp = TempDir::new().unwrap();
        let store = KeywordStore::open(temp.path()).unwrap();
        let v = vec![0.0f32; 4];
        assert!(matches!(
            store.query(AdapterQuery::Embedding(&v), 5, None),
            Err(IndexError::UnsupportedQuery { .. })
        ));
    }

    #[test]
    fn test_doc_counts() {
        let temp = TempDir::new().unwrap();
        let store = KeywordStore::open(temp.path()).unwrap();

        store
            .add("d1", &[chunk("d1", 0, "a"), chunk("d1", 1, "b")])
            .unwrap();
        store.add("d2", &[chunk("d2", 0, "c")]).unwrap();
        store.delete("d2").unwrap();

        let counts = store.doc_counts().unwrap();
        assert_eq!(counts.get("d1"), Some(&2));
        assert_eq!(counts.get("d2"), None);
    }

    #[test]
    fn test_query_syntax_is_lenient() {
        let temp = TempDir::new().unwrap();
        let store = KeywordStore::open(temp.path()).unwrap();
        store.add("d1", &[chunk("d1", 0, "text body")]).unwrap();

        // Unbalanced quotes and operators must not error out
        let result = store.query(AdapterQuery::Text("\"unbalanced AND ("), 5, None);
        assert!(result.is_ok());
    }
}
