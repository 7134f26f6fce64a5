//! Per-collection approximate-nearest-neighbor storage.
//!
//! One durable segment file per collection under the vectors directory.
//! Similarity is cosine via dot product over unit vectors; ranking is
//! descending with ties broken by insertion order.

pub mod segment;

pub use segment::{VectorEntry, VectorSegment};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::StorageError;
use crate::types::{ChunkId, CollectionId, DocumentId};

/// A ranked query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub similarity: f32,
}

struct SegmentHandle {
    segment: VectorSegment,
    /// Serializes appends and rewrites; reads go straight to the mmap.
    write_lock: Mutex<()>,
}

/// Durable vector index over all collections.
pub struct VectorStore {
    root: PathBuf,
    segments: DashMap<CollectionId, Arc<SegmentHandle>>,
}

impl VectorStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            segments: DashMap::new(),
        })
    }

    fn segment_path(&self, collection: CollectionId) -> PathBuf {
        self.root.join(format!("collection-{collection}.vec"))
    }

    /// Create the segment for a new collection.
    pub fn create_collection(
        &self,
        collection: CollectionId,
        dimension: usize,
    ) -> Result<(), StorageError> {
        let segment = VectorSegment::open_or_create(&self.segment_path(collection), dimension)?;
        self.segments.insert(
            collection,
            Arc::new(SegmentHandle {
                segment,
                write_lock: Mutex::new(()),
            }),
        );
        Ok(())
    }

    /// Fetch the handle for a collection, reopening from disk after a
    /// restart.
    fn handle(&self, collection: CollectionId) -> Result<Arc<SegmentHandle>, StorageError> {
        if let Some(handle) = self.segments.get(&collection) {
            return Ok(handle.clone());
        }

        let path = self.segment_path(collection);
        if !path.exists() {
            return Err(StorageError::SegmentMissing(collection));
        }

        let segment = VectorSegment::open(&path)?;
        // entry() keeps a racing open from producing two handles (and two
        // write locks) for the same segment.
        let handle = self
            .segments
            .entry(collection)
            .or_insert_with(|| {
                Arc::new(SegmentHandle {
                    segment,
                    write_lock: Mutex::new(()),
                })
            })
            .clone();
        Ok(handle)
    }

    /// Dimension of a collection's segment.
    pub fn dimension(&self, collection: CollectionId) -> Result<usize, StorageError> {
        Ok(self.handle(collection)?.segment.dimension())
    }

    /// Append chunk vectors to a collection.
    pub fn add(
        &self,
        collection: CollectionId,
        entries: &[VectorEntry],
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let handle = self.handle(collection)?;
        let _guard = handle.write_lock.lock();
        handle.segment.append(entries)
    }

    /// Rank chunks by cosine similarity, descending, top_k results.
    pub fn query(
        &self,
        collection: CollectionId,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StorageError> {
        let handle = self.handle(collection)?;
        let scored = handle.segment.search(vector, top_k)?;
        Ok(scored
            .into_iter()
            .map(|(chunk_id, similarity)| ScoredChunk {
                chunk_id,
                similarity,
            })
            .collect())
    }

    /// Remove all vectors belonging to a document. Returns removed count.
    pub fn delete_by_document(
        &self,
        collection: CollectionId,
        document: DocumentId,
    ) -> Result<usize, StorageError> {
        let handle = self.handle(collection)?;
        let _guard = handle.write_lock.lock();
        handle.segment.delete_where(|_, doc| doc == document)
    }

    /// Remove specific chunk vectors (superseded sets after a reindex).
    pub fn delete_chunks(
        &self,
        collection: CollectionId,
        chunks: &[ChunkId],
    ) -> Result<usize, StorageError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let doomed: HashSet<ChunkId> = chunks.iter().copied().collect();
        let handle = self.handle(collection)?;
        let _guard = handle.write_lock.lock();
        handle.segment.delete_where(|chunk, _| doomed.contains(&chunk))
    }

    /// Drop a collection's segment entirely.
    pub fn delete_collection(&self, collection: CollectionId) -> Result<(), StorageError> {
        self.segments.remove(&collection);
        let path = self.segment_path(collection);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Number of stored vectors in a collection.
    pub fn count(&self, collection: CollectionId) -> Result<usize, StorageError> {
        self.handle(collection)?.segment.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chunk: i64, doc: i64, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            chunk_id: ChunkId::new(chunk),
            document_id: DocumentId::new(doc),
            vector: Arc::from(vector),
        }
    }

    #[test]
    fn test_create_add_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        let collection = CollectionId::new(1);

        store.create_collection(collection, 2).unwrap();
        store
            .add(
                collection,
                &[
                    entry(1, 1, vec![1.0, 0.0]),
                    entry(2, 1, vec![0.0, 1.0]),
                ],
            )
            .unwrap();

        let results = store.query(collection, &[0.9, 0.1], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, ChunkId::new(1));
    }

    #[test]
    fn test_collections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        let a = CollectionId::new(1);
        let b = CollectionId::new(2);

        store.create_collection(a, 2).unwrap();
        store.create_collection(b, 2).unwrap();
        store.add(a, &[entry(1, 1, vec![1.0, 0.0])]).unwrap();

        assert_eq!(store.count(a).unwrap(), 1);
        assert_eq!(store.count(b).unwrap(), 0);
        assert!(store.query(b, &[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_missing_collection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();

        let err = store.query(CollectionId::new(9), &[1.0], 5).unwrap_err();
        assert!(matches!(err, StorageError::SegmentMissing(_)));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let collection = CollectionId::new(3);

        {
            let store = VectorStore::open(dir.path()).unwrap();
            store.create_collection(collection, 2).unwrap();
            store.add(collection, &[entry(4, 2, vec![0.0, 1.0])]).unwrap();
        }

        let store = VectorStore::open(dir.path()).unwrap();
        assert_eq!(store.count(collection).unwrap(), 1);
        let results = store.query(collection, &[0.0, 1.0], 5).unwrap();
        assert_eq!(results[0].chunk_id, ChunkId::new(4));
    }

    #[test]
    fn test_delete_collection_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        let collection = CollectionId::new(5);

        store.create_collection(collection, 2).unwrap();
        store.delete_collection(collection).unwrap();

        let err = store.count(collection).unwrap_err();
        assert!(matches!(err, StorageError::SegmentMissing(_)));
    }
}
