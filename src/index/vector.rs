//! HNSW vector index with a SQLite row store for durability
//!
//! The HNSW graph lives in memory and is rebuilt from the row store on
//! open. Deletion is a filter-delete: rows are removed and the graph
//! entries tombstoned; queries oversample and skip dead entries. The
//! embedding dimension is fixed at store creation and every write is
//! checked against it.

use super::{
    AdapterKind, AdapterQuery, ChunkPayload, DocFilter, IndexAdapter, IndexError, IndexedChunk,
    QueryHit,
};
use crate::source::ChunkId;
use hnsw_rs::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// A live entry in the in-memory graph
struct GraphEntry {
    chunk: ChunkId,
    text: String,
    payload: ChunkPayload,
}

struct GraphState {
    index: Hnsw<'static, f32, DistCosine>,
    /// Internal HNSW id → live entry; absent ids are tombstones
    entries: HashMap<usize, GraphEntry>,
    /// (doc_id, ordinal) → internal id, for overwrite and delete
    by_chunk: HashMap<(String, u32), usize>,
    next_id: usize,
}

impl GraphState {
    fn fresh() -> Self {
        // Connections per layer, capacity hint, layer bound, ef at
        // construction
        let index = Hnsw::<f32, DistCosine>::new(16, 10_000, 16, 200, DistCosine);
        Self {
            index,
            entries: HashMap::new(),
            by_chunk: HashMap::new(),
            next_id: 0,
        }
    }
}

/// Durable vector index adapter
pub struct VectorStore {
    conn: Mutex<Connection>,
    graph: RwLock<GraphState>,
    dimensions: usize,
    #[allow(dead_code)]
    path: PathBuf,
}

const EF_SEARCH: usize = 64;

impl VectorStore {
    /// Open (or create) the store under the given directory with a fixed
    /// embedding dimension. Opening an existing store with a different
    /// dimension is refused.
    pub fn open(dir: &Path, dimensions: usize) -> Result<Self, IndexError> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("vectors.sqlite");
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;

             CREATE TABLE IF NOT EXISTS chunks (
                 doc_id TEXT NOT NULL,
                 ordinal INTEGER NOT NULL,
                 text TEXT NOT NULL,
                 embedding BLOB NOT NULL,
                 payload TEXT NOT NULL,
                 PRIMARY KEY (doc_id, ordinal)
             );

             CREATE TABLE IF NOT EXISTS meta (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;

        // Pin the dimension at creation; refuse mismatched re-opens
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(v) => {
                let existing: usize = v.parse().map_err(|_| {
                    IndexError::InitializationError(format!("Corrupt dimensions value: {}", v))
                })?;
                if existing != dimensions {
                    return Err(IndexError::InvalidDimension {
                        expected: existing,
                        actual: dimensions,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('dimensions', ?1)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        let store = Self {
            conn: Mutex::new(conn),
            graph: RwLock::new(GraphState::fresh()),
            dimensions,
            path: db_path,
        };
        store.rebuild_graph()?;
        Ok(store)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Rebuild the in-memory graph from the row store. Called on open and
    /// after compaction.
    fn rebuild_graph(&self) -> Result<(), IndexError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT doc_id, ordinal, text, embedding, payload FROM chunks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u32,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut graph = GraphState::fresh();
        let mut loaded = 0usize;
        for row in rows {
            let (doc_id, ordinal, text, blob, payload_json) = row?;
            let embedding = decode_embedding(&blob);
            if embedding.len() != self.dimensions {
                tracing::warn!(
                    "Skipping vector row {}:{} with dimension {} (expected {})",
                    doc_id,
                    ordinal,
                    embedding.len(),
                    self.dimensions
                );
                continue;
            }
            let payload: ChunkPayload = serde_json::from_str(&payload_json)
                .map_err(|e| IndexError::InitializationError(format!("Corrupt payload: {}", e)))?;

            let id = graph.next_id;
            graph.next_id += 1;
            graph.index.insert((&embedding, id));
            graph.by_chunk.insert((doc_id.clone(), ordinal), id);
            graph.entries.insert(
                id,
                GraphEntry {
                    chunk: ChunkId::new(doc_id, ordinal),
                    text,
                    payload,
                },
            );
            loaded += 1;
        }

        *self.graph.write().expect("vector graph lock poisoned") = graph;
        if loaded > 0 {
            tracing::info!("Vector index rebuilt with {} chunks", loaded);
        }
        Ok(())
    }
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl IndexAdapter for VectorStore {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Vector
    }

    fn add(&self, doc_id: &str, chunks: &[IndexedChunk]) -> Result<(), IndexError> {
        // Validate before touching either the rows or the graph
        for chunk in chunks {
            let embedding = chunk
                .embedding
                .as_ref()
                .ok_or_else(|| IndexError::MissingEmbedding(chunk.chunk_id().to_string()))?;
            if embedding.len() != self.dimensions {
                return Err(IndexError::InvalidDimension {
                    expected: self.dimensions,
                    actual: embedding.len(),
                });
            }
        }

        {
            let mut conn = self.conn.lock().expect("vector store mutex poisoned");
            let tx = conn
                .transaction()
                .map_err(|e| IndexError::InsertError(e.to_string()))?;
            for chunk in chunks {
                let embedding = chunk.embedding.as_ref().expect("validated above");
                let payload_json = serde_json::to_string(&chunk.payload)
                    .map_err(|e| IndexError::InsertError(format!("payload: {}", e)))?;
                tx.execute(
                    "INSERT OR REPLACE INTO chunks (doc_id, ordinal, text, embedding, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        doc_id,
                        chunk.ordinal as i64,
                        chunk.text,
                        encode_embedding(embedding),
                        payload_json
                    ],
                )?;
            }
            tx.commit()
                .map_err(|e| IndexError::InsertError(e.to_string()))?;
        }

        let mut graph = self.graph.write().expect("vector graph lock poisoned");
        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().expect("validated above");
            let key = (doc_id.to_string(), chunk.ordinal);

            // Overwrite: tombstone any previous entry for this chunk
            if let Some(old_id) = graph.by_chunk.remove(&key) {
                graph.entries.remove(&old_id);
            }

            let id = graph.next_id;
            graph.next_id += 1;
            graph.index.insert((embedding, id));
            graph.by_chunk.insert(key, id);
            graph.entries.insert(
                id,
                GraphEntry {
                    chunk: ChunkId::new(doc_id.to_string(), chunk.ordinal),
                    text: chunk.text.clone(),
                    payload: chunk.payload.clone(),
                },
            );
        }

        tracing::debug!("Vector add: {} chunks for {}", chunks.len(), doc_id);
        Ok(())
    }

    fn delete(&self, doc_id: &str) -> Result<(), IndexError> {
        {
            let conn = self.conn.lock().expect("vector store mutex poisoned");
            conn.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])?;
        }

        let mut graph = self.graph.write().expect("vector graph lock poisoned");
        let dead: Vec<(String, u32)> = graph
            .by_chunk
            .keys()
            .filter(|(d, _)| d == doc_id)
            .cloned()
            .collect();
        for key in dead {
            if let Some(id) = graph.by_chunk.remove(&key) {
                graph.entries.remove(&id);
            }
        }

        tracing::debug!("Vector delete: {}", doc_id);
        Ok(())
    }

    fn query(
        &self,
        query: AdapterQuery<'_>,
        top_k: usize,
        filter: Option<&DocFilter>,
    ) -> Result<Vec<QueryHit>, IndexError> {
        let AdapterQuery::Embedding(embedding) = query else {
            return Err(IndexError::UnsupportedQuery {
                kind: AdapterKind::Vector,
            });
        };

        if embedding.len() != self.dimensions {
            return Err(IndexError::InvalidDimension {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }

        let graph = self.graph.read().expect("vector graph lock poisoned");
        if graph.entries.is_empty() {
            return Ok(Vec::new());
        }

        // Oversample to survive tombstones and filtering
        let fetch = (top_k * 4).max(top_k + 16).min(graph.next_id.max(1));
        let neighbours = graph.index.search(embedding, fetch, EF_SEARCH);

        let mut hits = Vec::with_capacity(top_k);
        for neighbour in neighbours {
            let Some(entry) = graph.entries.get(&neighbour.d_id) else {
                continue; // tombstone
            };
            if let Some(filter) = filter {
                if !filter.contains(&entry.chunk.doc_id) {
                    continue;
                }
            }
            hits.push(QueryHit {
                chunk: entry.chunk.clone(),
                score: 1.0 - neighbour.distance, // cosine distance → similarity
                text: entry.text.clone(),
                payload: entry.payload.clone(),
            });
            if hits.len() >= top_k {
                break;
            }
        }

        Ok(hits)
    }

    fn count(&self, doc_id: Option<&str>) -> Result<usize, IndexError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let count: i64 = match doc_id {
            Some(doc_id) => conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE doc_id = ?1",
                params![doc_id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    fn doc_counts(&self) -> Result<HashMap<String, usize>, IndexError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let mut stmt = conn.prepare("SELECT doc_id, COUNT(*) FROM chunks GROUP BY doc_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (doc_id, count) = row?;
            counts.insert(doc_id, count);
        }
        Ok(counts)
    }
}
