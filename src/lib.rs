//! Embedded retrieval-augmented-generation indexing and query engine.
//!
//! The engine parses heterogeneous documents into deterministic
//! content-aware chunks, embeds them through pluggable backends with a
//! shared cache and fallback, maintains a durable per-collection vector
//! index plus relational metadata, and runs ingestion through a
//! crash-resumable priority job queue fed by explicit requests and a
//! debounced file watcher. [`service::RagService`] is the front door.

pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod processing;
pub mod queue;
pub mod service;
pub mod store;
pub mod types;
pub mod vector;
pub mod watcher;

pub use config::Settings;
pub use error::{RagError, RagResult, StorageError};
pub use service::{
    CollectionSpec, ContextRequest, ContextResponse, DeleteOutcome, DeleteRequest, IngestOutcome,
    IngestRequest, IngestStatus, QueryHit, QueryRequest, QueryResponse, RagService,
};
pub use types::{
    ChunkId, ChunkMetadata, ChunkRecord, Collection, CollectionId, Document, DocumentId,
    DocumentStatus, IndexJob, JobId, JobKind, JobPriority, JobStatus,
};
