//! Sheaf - Document ingestion and hybrid search service
//!
//! Sheaf ingests heterogeneous source documents (PDF datasheets, generic
//! PDFs, Markdown, plain text), extracts structured text plus optional
//! model/part pairs, chunks the text, and maintains two parallel search
//! indexes over the chunks: a dense-vector semantic index and a sparse
//! full-text (BM25) keyword index. A hybrid query layer fuses the two.
//!
//! The heart of the crate is the document-lifecycle engine: change
//! detection against stored fingerprints, a content-addressed artifact
//! cache, an intent-log protocol that keeps both indexes mutually
//! consistent across crashes, and a durable job queue with a thread-based
//! worker pool.

pub mod cache;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod detect;
pub mod embed;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod index;
pub mod intent;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod search;
pub mod source;
pub mod storage;

pub use error::{Result, SheafError};
