//! Service facade orchestrating processing, embedding, storage, and the
//! job queue behind a synchronous-looking API.
//!
//! Entry points and watcher callbacks only enqueue jobs; the worker pool
//! (one active job per collection) owns all mutation. Queries run
//! concurrently with ingestion and observe pre- or post-commit state only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::embedding::{EmbeddingManager, hash_bytes};
use crate::error::{RagError, RagResult};
use crate::processing::{ChunkingLimits, DocumentProcessor, FileType};
use crate::queue::{IndexQueue, JobExecutor, NewJob, WorkerPool};
use crate::store::{CollectionStats, MetadataStore, NewChunk, NewCollection};
use crate::types::{
    ChunkId, ChunkMetadata, Collection, CollectionId, DocumentId, DocumentStatus, IndexJob, JobId,
    JobKind, JobPriority,
};
use crate::vector::{VectorEntry, VectorStore};
use crate::watcher::{FileEventKind, FileWatcher};

/// How many ranked hits each collection contributes before context
/// packing.
const CONTEXT_FETCH_PER_COLLECTION: usize = 16;
/// Over-fetch factor when metadata filters prune ranked hits.
const FILTER_OVERFETCH: usize = 4;

/// Per-collection overrides at creation time; unset fields use the
/// configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CollectionSpec {
    pub description: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub max_chunk_size: Option<usize>,
}

/// Outcome of ingesting a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Indexed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub document_id: DocumentId,
    pub chunks_created: usize,
}

/// A queued ingest request for a file or folder.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub collection_id: CollectionId,
    pub recursive: bool,
    pub file_patterns: Vec<String>,
    pub auto_update: bool,
    pub priority: JobPriority,
}

impl IngestRequest {
    pub fn new(path: impl Into<PathBuf>, collection_id: CollectionId) -> Self {
        Self {
            path: path.into(),
            collection_id,
            recursive: true,
            file_patterns: Vec::new(),
            auto_update: false,
            priority: JobPriority::Normal,
        }
    }
}

/// Payload of a folder job's target column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FolderTarget {
    pub path: PathBuf,
    pub recursive: bool,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub collection_id: CollectionId,
    pub top_k: usize,
    pub min_similarity: f32,
    /// Equality filters over chunk metadata fields.
    pub metadata_filters: Option<serde_json::Map<String, serde_json::Value>>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>, collection_id: CollectionId) -> Self {
        Self {
            text: text.into(),
            collection_id,
            top_k: 5,
            min_similarity: 0.0,
            metadata_filters: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub source_path: String,
    pub content: String,
    pub similarity: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub results: Vec<QueryHit>,
    /// Unique source paths in rank order.
    pub sources: Vec<String>,
    pub similarities: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub text: String,
    pub collection_ids: Vec<CollectionId>,
    pub max_tokens: usize,
    pub deduplicate: bool,
}

impl ContextRequest {
    pub fn new(text: impl Into<String>, collection_ids: Vec<CollectionId>) -> Self {
        Self {
            text: text.into(),
            collection_ids,
            max_tokens: 2000,
            deduplicate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSource {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub source_path: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextResponse {
    pub context: String,
    pub sources: Vec<ContextSource>,
    pub token_count: usize,
    pub chunks_included: usize,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub collection_id: CollectionId,
    pub document_id: Option<DocumentId>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub chunks_removed: usize,
}

/// The RAG engine: construct with [`RagService::start`], drive through
/// the request methods, tear down with [`RagService::shutdown`].
pub struct RagService {
    inner: Arc<ServiceInner>,
    workers: parking_lot::Mutex<Option<WorkerPool>>,
    watchers: parking_lot::Mutex<Vec<FileWatcher>>,
}

struct ServiceInner {
    settings: Settings,
    store: MetadataStore,
    vectors: VectorStore,
    embeddings: EmbeddingManager,
    queue: Arc<IndexQueue>,
    processor: DocumentProcessor,
}

impl RagService {
    /// Wire up stores, embedding backend, and queue; requeue jobs left
    /// over from a crash; start the worker pool.
    pub async fn start(settings: Settings) -> RagResult<Self> {
        std::fs::create_dir_all(&settings.data_dir).map_err(crate::error::StorageError::from)?;

        let store = MetadataStore::connect(&settings.db_path()).await?;
        let vectors = VectorStore::open(settings.vectors_dir())?;
        let embeddings = EmbeddingManager::from_settings(&settings).await?;
        let queue = Arc::new(IndexQueue::new(store.pool().clone()));

        let requeued = queue.resume_from_state().await?;
        if requeued > 0 {
            tracing::info!(target: "service", "resumed {requeued} interrupted jobs");
        }

        let inner = Arc::new(ServiceInner {
            settings: settings.clone(),
            store,
            vectors,
            embeddings,
            queue: queue.clone(),
            processor: DocumentProcessor::new(),
        });

        let pool = WorkerPool::spawn(
            queue,
            inner.clone(),
            settings.queue.max_concurrent_jobs,
            Duration::from_secs(settings.queue.job_timeout_secs),
        );

        Ok(Self {
            inner,
            workers: parking_lot::Mutex::new(Some(pool)),
            watchers: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Stop workers and watchers, then flush queue state.
    pub async fn shutdown(&self) {
        self.watchers.lock().clear();
        let pool = self.workers.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
        if let Err(e) = self.inner.queue.persist_state().await {
            tracing::warn!(target: "service", "state flush on shutdown failed: {e}");
        }
    }

    // ---- collections ----

    pub async fn create_collection(
        &self,
        name: &str,
        spec: CollectionSpec,
    ) -> RagResult<Collection> {
        self.inner.create_collection(name, spec).await
    }

    pub async fn list_collections(&self) -> RagResult<Vec<Collection>> {
        Ok(self.inner.store.list_collections().await?)
    }

    pub async fn get_collection_by_name(&self, name: &str) -> RagResult<Collection> {
        self.inner
            .store
            .get_collection_by_name(name)
            .await?
            .ok_or_else(|| RagError::not_found("collection", name))
    }

    pub async fn delete_collection(&self, id: CollectionId) -> RagResult<()> {
        self.inner.require_collection(id).await?;
        self.inner.store.delete_collection(id).await?;
        self.inner.vectors.delete_collection(id)?;
        tracing::info!(target: "service", "deleted collection {id}");
        Ok(())
    }

    pub async fn get_collection_stats(&self, id: CollectionId) -> RagResult<CollectionStats> {
        self.inner.require_collection(id).await?;
        Ok(self.inner.store.collection_stats(id).await?)
    }

    // ---- ingest ----

    /// Synchronous single-file ingest: hash, dedup, parse, embed, store.
    /// Identical content short-circuits to `Skipped`.
    pub async fn ingest_document(
        &self,
        path: &Path,
        collection_id: CollectionId,
    ) -> RagResult<IngestOutcome> {
        let collection = self.inner.require_collection(collection_id).await?;
        match self.inner.ingest_file(&collection, path, false).await {
            Err(RagError::DuplicateContent { existing }) => Ok(IngestOutcome {
                status: IngestStatus::Skipped,
                document_id: existing,
                chunks_created: 0,
            }),
            other => other,
        }
    }

    /// Queue an ingest job for a file or folder, returning a pollable job
    /// id. With `auto_update`, a watcher keeps feeding change jobs.
    pub async fn ingest(&self, request: IngestRequest) -> RagResult<JobId> {
        self.inner.require_collection(request.collection_id).await?;

        let job = if request.path.is_dir() {
            let target = FolderTarget {
                path: request.path.clone(),
                recursive: request.recursive,
                patterns: request.file_patterns.clone(),
            };
            NewJob {
                kind: JobKind::IndexFolder,
                priority: request.priority,
                collection_id: request.collection_id,
                target: serde_json::to_string(&target)
                    .map_err(|e| RagError::InvalidConfig(e.to_string()))?,
            }
        } else {
            NewJob {
                kind: JobKind::IndexFile,
                priority: request.priority,
                collection_id: request.collection_id,
                target: request.path.display().to_string(),
            }
        };

        let job_id = self.inner.queue.enqueue(job).await?;

        if request.auto_update {
            let watch_root = if request.path.is_dir() {
                request.path.clone()
            } else {
                request
                    .path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| request.path.clone())
            };
            self.enable_auto_update(request.collection_id, watch_root, request.file_patterns)?;
        }

        Ok(job_id)
    }

    /// Queue a reindex for a document (by id) or a path.
    pub async fn reindex(
        &self,
        collection_id: CollectionId,
        target: &str,
        priority: JobPriority,
    ) -> RagResult<JobId> {
        self.inner.require_collection(collection_id).await?;
        Ok(self
            .inner
            .queue
            .enqueue(NewJob {
                kind: JobKind::Reindex,
                priority,
                collection_id,
                target: target.to_string(),
            })
            .await?)
    }

    /// Watch a directory and translate debounced file events into index
    /// jobs. The watcher only enqueues; workers do the mutation.
    pub fn enable_auto_update(
        &self,
        collection_id: CollectionId,
        path: PathBuf,
        patterns: Vec<String>,
    ) -> RagResult<()> {
        let debounce = Duration::from_millis(self.inner.settings.watcher.debounce_ms);
        let (watcher, mut events) = FileWatcher::start(&[path.clone()], &patterns, debounce)?;

        let queue = self.inner.queue.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let kind = match event.kind {
                    FileEventKind::Deleted => JobKind::Delete,
                    FileEventKind::Created | FileEventKind::Modified => JobKind::IndexFile,
                };
                let job = NewJob {
                    kind,
                    priority: JobPriority::Normal,
                    collection_id,
                    target: event.path.display().to_string(),
                };
                if let Err(e) = queue.enqueue(job).await {
                    tracing::error!(target: "watcher", "failed to enqueue change job: {e}");
                }
            }
        });

        self.watchers.lock().push(watcher);
        tracing::info!(
            target: "service",
            "auto-update watching {} for collection {collection_id}",
            path.display()
        );
        Ok(())
    }

    // ---- query ----

    pub async fn query(&self, request: QueryRequest) -> RagResult<QueryResponse> {
        self.inner.query(request).await
    }

    pub async fn get_context(&self, request: ContextRequest) -> RagResult<ContextResponse> {
        self.inner.get_context(request).await
    }

    // ---- delete / jobs / introspection ----

    pub async fn delete_document(&self, request: DeleteRequest) -> RagResult<DeleteOutcome> {
        let collection = self.inner.require_collection(request.collection_id).await?;

        let document = match (request.document_id, &request.path) {
            (Some(id), _) => self.inner.store.get_document(id).await?,
            (None, Some(path)) => {
                self.inner
                    .store
                    .get_document_by_path(collection.id, &path.display().to_string())
                    .await?
            }
            (None, None) => {
                return Err(RagError::InvalidConfig(
                    "delete requires a document id or a path".to_string(),
                ));
            }
        };

        let Some(document) = document else {
            return Err(RagError::not_found(
                "document",
                request
                    .document_id
                    .map(|id| id.to_string())
                    .or_else(|| request.path.as_ref().map(|p| p.display().to_string()))
                    .unwrap_or_default(),
            ));
        };

        self.inner.delete_document_data(&collection, &document.id).await
    }

    pub async fn job_status(&self, id: JobId) -> RagResult<IndexJob> {
        self.inner
            .queue
            .get(id)
            .await?
            .ok_or_else(|| RagError::not_found("job", id))
    }

    pub async fn list_jobs(&self, limit: usize) -> RagResult<Vec<IndexJob>> {
        Ok(self.inner.queue.list_recent(limit).await?)
    }

    /// Resume job processing after a storage-failure pause.
    pub fn resume_queue(&self) {
        self.inner.queue.resume();
    }

    pub fn queue_paused(&self) -> bool {
        self.inner.queue.is_paused()
    }

    pub fn embedding_cache_stats(&self) -> crate::embedding::CacheStats {
        self.inner.embeddings.cache().stats()
    }

    pub async fn list_documents(
        &self,
        collection_id: CollectionId,
    ) -> RagResult<Vec<crate::types::Document>> {
        self.inner.require_collection(collection_id).await?;
        Ok(self.inner.store.list_documents(collection_id).await?)
    }
}

impl ServiceInner {
    async fn require_collection(&self, id: CollectionId) -> RagResult<Collection> {
        self.store
            .get_collection(id)
            .await?
            .ok_or_else(|| RagError::not_found("collection", id))
    }

    fn limits_for(&self, collection: &Collection) -> ChunkingLimits {
        ChunkingLimits::new(
            collection.chunk_size,
            collection.chunk_overlap,
            collection.max_chunk_size,
        )
    }

    async fn create_collection(&self, name: &str, spec: CollectionSpec) -> RagResult<Collection> {
        let defaults = &self.settings.chunking;
        let limits = ChunkingLimits::new(
            spec.chunk_size.unwrap_or(defaults.chunk_size),
            spec.chunk_overlap.unwrap_or(defaults.chunk_overlap),
            spec.max_chunk_size.unwrap_or(defaults.max_chunk_size),
        );
        limits.validate().map_err(RagError::InvalidConfig)?;

        if self.store.get_collection_by_name(name).await?.is_some() {
            return Err(RagError::InvalidConfig(format!(
                "collection '{name}' already exists"
            )));
        }

        let collection = self
            .store
            .create_collection(&NewCollection {
                name: name.to_string(),
                description: spec.description,
                embedding_model: self.embeddings.model_id().to_string(),
                chunk_size: limits.chunk_size,
                chunk_overlap: limits.chunk_overlap,
                max_chunk_size: limits.max_chunk_size,
            })
            .await?;

        self.vectors
            .create_collection(collection.id, self.embeddings.dimension())?;

        tracing::info!(
            target: "service",
            "created collection '{}' (id {}, model {})",
            collection.name,
            collection.id,
            collection.embedding_model
        );
        Ok(collection)
    }

    /// Full single-file pipeline. `force` bypasses the dedup
    /// short-circuit (explicit reindex).
    async fn ingest_file(
        &self,
        collection: &Collection,
        path: &Path,
        force: bool,
    ) -> RagResult<IngestOutcome> {
        let size = std::fs::metadata(path)
            .map_err(|_| RagError::not_found("file", path.display()))?
            .len();

        let cap = self.settings.queue.max_file_size_bytes;
        if size > cap {
            return Err(RagError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                cap,
            });
        }

        let bytes =
            std::fs::read(path).map_err(|_| RagError::not_found("file", path.display()))?;
        let content_hash = hash_bytes(&bytes);
        let path_str = path.display().to_string();
        let file_type = FileType::from_path(path);

        // Resolve the owning document: dedup by hash first, then the
        // reindex path (same file, new content), else a fresh row.
        let document = match self
            .store
            .get_document_by_hash(collection.id, &content_hash)
            .await?
        {
            Some(existing) => {
                let retriable = existing.status == DocumentStatus::Failed;
                if !force && !retriable {
                    return Err(RagError::DuplicateContent {
                        existing: existing.id,
                    });
                }
                existing
            }
            None => match self.store.get_document_by_path(collection.id, &path_str).await? {
                Some(existing) => {
                    self.store
                        .update_document_content(
                            existing.id,
                            &content_hash,
                            size,
                            file_type.as_str(),
                        )
                        .await?;
                    existing
                }
                None => {
                    self.store
                        .create_document(
                            collection.id,
                            &path_str,
                            file_type.as_str(),
                            &content_hash,
                            size,
                        )
                        .await?
                }
            },
        };

        self.store
            .set_document_status(document.id, DocumentStatus::Processing, None)
            .await?;

        let limits = self.limits_for(collection);
        let chunks = match self.processor.process(&bytes, file_type, &limits) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.store
                    .set_document_status(document.id, DocumentStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Err(e.into());
            }
        };

        // Chunks the document held before this run; their vectors are
        // removed only after the new set commits.
        let old_chunk_ids = self.store.chunk_ids_for_document(document.id).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = match self.embeddings.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                self.store
                    .set_document_status(document.id, DocumentStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Err(e.into());
            }
        };

        let chunk_ids = self.store.allocate_chunk_ids(chunks.len());
        let entries: Vec<VectorEntry> = chunk_ids
            .iter()
            .zip(vectors.iter())
            .map(|(chunk_id, vector)| VectorEntry {
                chunk_id: *chunk_id,
                document_id: document.id,
                vector: vector.clone(),
            })
            .collect();
        self.vectors.add(collection.id, &entries)?;

        let new_chunks: Vec<NewChunk> = chunk_ids
            .iter()
            .zip(chunks.iter())
            .map(|(id, chunk)| NewChunk {
                id: *id,
                content: chunk.content.clone(),
                embedding_hash: crate::embedding::hash_text(&chunk.content),
                metadata: chunk.metadata.clone(),
            })
            .collect();
        self.store.commit_chunks(document.id, &new_chunks).await?;

        if !old_chunk_ids.is_empty() {
            let removed = self.vectors.delete_chunks(collection.id, &old_chunk_ids)?;
            tracing::debug!(
                target: "service",
                "reindex of document {} replaced {removed} vectors",
                document.id
            );
        }

        tracing::info!(
            target: "service",
            "indexed {} into collection {} ({} chunks)",
            path_str,
            collection.id,
            new_chunks.len()
        );

        Ok(IngestOutcome {
            status: IngestStatus::Indexed,
            document_id: document.id,
            chunks_created: new_chunks.len(),
        })
    }

    async fn delete_document_data(
        &self,
        collection: &Collection,
        document_id: &DocumentId,
    ) -> RagResult<DeleteOutcome> {
        let vectors_removed = self.vectors.delete_by_document(collection.id, *document_id)?;
        let chunks_removed = self.store.delete_document(*document_id).await?;
        tracing::info!(
            target: "service",
            "deleted document {document_id} ({chunks_removed} chunks, {vectors_removed} vectors)"
        );
        Ok(DeleteOutcome {
            deleted: true,
            chunks_removed,
        })
    }

    async fn query(&self, request: QueryRequest) -> RagResult<QueryResponse> {
        let collection = self.require_collection(request.collection_id).await?;
        let query_vector = self.embeddings.embed(&request.text).await?;

        let fetch = if request.metadata_filters.is_some() {
            request.top_k.saturating_mul(FILTER_OVERFETCH).max(request.top_k)
        } else {
            request.top_k
        };

        let mut hits = self
            .ranked_hits(&collection, &query_vector, fetch)
            .await?;

        if let Some(filters) = &request.metadata_filters {
            hits.retain(|hit| metadata_matches(&hit.metadata, filters));
        }
        hits.truncate(request.top_k);
        // min_similarity prunes after ranking, preserving top_k semantics.
        hits.retain(|hit| hit.similarity >= request.min_similarity);

        let mut sources = Vec::new();
        let mut seen = HashSet::new();
        for hit in &hits {
            if seen.insert(hit.source_path.clone()) {
                sources.push(hit.source_path.clone());
            }
        }
        let similarities = hits.iter().map(|h| h.similarity).collect();

        Ok(QueryResponse {
            results: hits,
            sources,
            similarities,
        })
    }

    /// Rank against one collection and hydrate chunk rows. Vector records
    /// whose metadata never committed are dropped here.
    async fn ranked_hits(
        &self,
        collection: &Collection,
        query_vector: &[f32],
        top_k: usize,
    ) -> RagResult<Vec<QueryHit>> {
        let scored = self.vectors.query(collection.id, query_vector, top_k)?;
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ChunkId> = scored.iter().map(|s| s.chunk_id).collect();
        let records = self.store.get_chunks_by_ids(&ids).await?;
        let by_id: HashMap<ChunkId, _> = records.into_iter().map(|r| (r.id, r)).collect();

        let mut documents: HashMap<DocumentId, String> = HashMap::new();
        let mut hits = Vec::with_capacity(scored.len());
        for scored_chunk in scored {
            let Some(record) = by_id.get(&scored_chunk.chunk_id) else {
                continue;
            };

            let source_path = match documents.get(&record.document_id) {
                Some(path) => path.clone(),
                None => {
                    let path = self
                        .store
                        .get_document(record.document_id)
                        .await?
                        .map(|d| d.source_path)
                        .unwrap_or_default();
                    documents.insert(record.document_id, path.clone());
                    path
                }
            };

            hits.push(QueryHit {
                chunk_id: record.id,
                document_id: record.document_id,
                source_path,
                content: record.content.clone(),
                similarity: scored_chunk.similarity,
                metadata: record.metadata.clone(),
            });
        }

        Ok(hits)
    }

    async fn get_context(&self, request: ContextRequest) -> RagResult<ContextResponse> {
        let query_vector = self.embeddings.embed(&request.text).await?;

        let mut merged: Vec<QueryHit> = Vec::new();
        for collection_id in &request.collection_ids {
            let collection = self.require_collection(*collection_id).await?;
            merged.extend(
                self.ranked_hits(&collection, &query_vector, CONTEXT_FETCH_PER_COLLECTION)
                    .await?,
            );
        }

        merged.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if request.deduplicate {
            let mut seen = HashSet::new();
            merged.retain(|hit| seen.insert(crate::embedding::hash_text(&hit.content)));
        }

        let estimator = self.processor.estimator();
        let mut context_parts = Vec::new();
        let mut sources = Vec::new();
        let mut token_count = 0usize;

        for hit in merged {
            let tokens = estimator.estimate(&hit.content);
            if token_count + tokens > request.max_tokens {
                // Keep scanning: a smaller lower-ranked chunk may still fit.
                continue;
            }
            token_count += tokens;
            context_parts.push(hit.content.clone());
            sources.push(ContextSource {
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                source_path: hit.source_path.clone(),
                similarity: hit.similarity,
            });
        }

        Ok(ContextResponse {
            context: context_parts.join("\n\n"),
            chunks_included: sources.len(),
            sources,
            token_count,
        })
    }

    /// Resolve a reindex/delete target: a numeric document id or a path.
    async fn resolve_document(
        &self,
        collection: &Collection,
        target: &str,
    ) -> RagResult<Option<crate::types::Document>> {
        if let Ok(raw_id) = target.parse::<i64>() {
            return Ok(self.store.get_document(DocumentId::new(raw_id)).await?);
        }
        Ok(self
            .store
            .get_document_by_path(collection.id, target)
            .await?)
    }

    /// Folder ingest: walk, filter, ingest file by file. Per-file errors
    /// mark that document failed and the job continues; storage errors
    /// abort (and pause the queue). Cancellation is honored between
    /// files.
    async fn ingest_folder(
        &self,
        collection: &Collection,
        target: &FolderTarget,
        job: &IndexJob,
        queue: &IndexQueue,
        cancel: &CancellationToken,
    ) -> RagResult<()> {
        let matcher = crate::watcher::build_matcher(&target.patterns)?;

        let mut walker = ignore::WalkBuilder::new(&target.path);
        walker.follow_links(false).require_git(false);
        if !target.recursive {
            walker.max_depth(Some(1));
        }

        let files: Vec<PathBuf> = walker
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| {
                // Skip dotfiles and non-matching patterns.
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
                !hidden && crate::watcher::matches_patterns(&matcher, path)
            })
            .collect();

        let total = files.len().max(1);
        let mut indexed = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for (i, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    target: "service",
                    "folder job {} cancelled after {i} of {} files",
                    job.id,
                    files.len()
                );
                break;
            }

            match self.ingest_file(collection, file, false).await {
                Ok(_) => indexed += 1,
                Err(RagError::DuplicateContent { .. }) => skipped += 1,
                // Storage trouble aborts the whole job; everything else is
                // a per-file failure already recorded on the document.
                Err(RagError::Storage(e)) => return Err(RagError::Storage(e)),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        target: "service",
                        "folder job {}: {} failed: {e}",
                        job.id,
                        file.display()
                    );
                }
            }

            if let Err(e) = queue
                .update_progress(job.id, (i + 1) as f32 / total as f32)
                .await
            {
                tracing::debug!(target: "queue", "progress update failed: {e}");
            }
        }

        tracing::info!(
            target: "service",
            "folder job {} done: {indexed} indexed, {skipped} skipped, {failed} failed",
            job.id
        );
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for ServiceInner {
    async fn execute(
        &self,
        job: &IndexJob,
        queue: &IndexQueue,
        cancel: &CancellationToken,
    ) -> RagResult<()> {
        let collection = self.require_collection(job.collection_id).await?;

        match job.kind {
            JobKind::IndexFile => {
                match self.ingest_file(&collection, Path::new(&job.target), false).await {
                    Ok(_) | Err(RagError::DuplicateContent { .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            JobKind::Reindex => {
                let document = self
                    .resolve_document(&collection, &job.target)
                    .await?
                    .ok_or_else(|| RagError::not_found("document", &job.target))?;
                self.ingest_file(&collection, Path::new(&document.source_path), true)
                    .await
                    .map(|_| ())
            }
            JobKind::Delete => {
                let document = self
                    .resolve_document(&collection, &job.target)
                    .await?
                    .ok_or_else(|| RagError::not_found("document", &job.target))?;
                self.delete_document_data(&collection, &document.id)
                    .await
                    .map(|_| ())
            }
            JobKind::IndexFolder => {
                let target: FolderTarget = serde_json::from_str(&job.target)
                    .map_err(|e| RagError::InvalidConfig(format!("bad folder target: {e}")))?;
                self.ingest_folder(&collection, &target, job, queue, cancel)
                    .await
            }
        }
    }
}

/// Equality match of filter pairs against the chunk's metadata JSON.
fn metadata_matches(
    metadata: &ChunkMetadata,
    filters: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    let value = match serde_json::to_value(metadata) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => return false,
    };
    filters
        .iter()
        .all(|(key, expected)| value.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_filter_equality() {
        let metadata = ChunkMetadata {
            kind: Some("section".to_string()),
            heading: Some("Setup".to_string()),
            ..Default::default()
        };

        let mut filters = serde_json::Map::new();
        filters.insert("heading".to_string(), serde_json::json!("Setup"));
        assert!(metadata_matches(&metadata, &filters));

        filters.insert("kind".to_string(), serde_json::json!("page"));
        assert!(!metadata_matches(&metadata, &filters));
    }

    #[test]
    fn test_folder_target_roundtrip() {
        let target = FolderTarget {
            path: PathBuf::from("/docs"),
            recursive: true,
            patterns: vec!["*.md".to_string()],
        };
        let json = serde_json::to_string(&target).unwrap();
        let parsed: FolderTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.path, PathBuf::from("/docs"));
        assert!(parsed.recursive);
        assert_eq!(parsed.patterns, vec!["*.md"]);
    }

    #[test]
    fn test_request_defaults() {
        let query = QueryRequest::new("q", CollectionId::new(1));
        assert_eq!(query.top_k, 5);
        assert_eq!(query.min_similarity, 0.0);

        let context = ContextRequest::new("q", vec![CollectionId::new(1)]);
        assert_eq!(context.max_tokens, 2000);
        assert!(context.deduplicate);
    }
}
