//! Durable relational store for collections, documents, and chunks.
//!
//! Backed by SQLite in WAL mode via sqlx. Document status and chunk sets
//! commit in one transaction so readers never observe a half-written
//! document; collection deletion cascades transactionally.

pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::error::StorageError;
use crate::types::{
    ChunkId, ChunkMetadata, ChunkRecord, Collection, CollectionId, Document, DocumentId,
    DocumentStatus, utc_now,
};

/// Parameters for creating a collection.
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub name: String,
    pub description: Option<String>,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunk_size: usize,
}

/// A chunk prepared for commit: id pre-allocated, metadata attached.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: ChunkId,
    pub content: String,
    pub embedding_hash: String,
    pub metadata: ChunkMetadata,
}

/// Aggregated counters for one collection.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CollectionStats {
    pub document_count: u64,
    pub indexed_count: u64,
    pub failed_count: u64,
    pub chunk_count: u64,
    pub total_size_bytes: u64,
}

/// SQLite-backed metadata store.
pub struct MetadataStore {
    pool: SqlitePool,
    /// Chunk ids are handed out before their rows commit, so vectors can
    /// be written first; seeded from MAX(chunks.id) at startup.
    next_chunk_id: AtomicI64,
}

impl MetadataStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn connect(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        for statement in schema::SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let max_chunk_id: i64 = sqlx::query("SELECT COALESCE(MAX(id), 0) AS max_id FROM chunks")
            .fetch_one(&pool)
            .await?
            .get("max_id");

        Ok(Self {
            pool,
            next_chunk_id: AtomicI64::new(max_chunk_id + 1),
        })
    }

    /// Shared pool, also used by the job queue.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reserve `count` chunk ids.
    pub fn allocate_chunk_ids(&self, count: usize) -> Vec<ChunkId> {
        let start = self.next_chunk_id.fetch_add(count as i64, Ordering::SeqCst);
        (start..start + count as i64).map(ChunkId::new).collect()
    }

    // ---- collections ----

    pub async fn create_collection(&self, new: &NewCollection) -> Result<Collection, StorageError> {
        let now = utc_now();
        let result = sqlx::query(
            r#"
            INSERT INTO collections
                (name, description, embedding_model, chunk_size, chunk_overlap,
                 max_chunk_size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.embedding_model)
        .bind(new.chunk_size as i64)
        .bind(new.chunk_overlap as i64)
        .bind(new.max_chunk_size as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Collection {
            id: CollectionId::new(result.last_insert_rowid()),
            name: new.name.clone(),
            description: new.description.clone(),
            embedding_model: new.embedding_model.clone(),
            chunk_size: new.chunk_size,
            chunk_overlap: new.chunk_overlap,
            max_chunk_size: new.max_chunk_size,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_collection(
        &self,
        id: CollectionId,
    ) -> Result<Option<Collection>, StorageError> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_collection(&r)))
    }

    pub async fn get_collection_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Collection>, StorageError> {
        let row = sqlx::query("SELECT * FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_collection(&r)))
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>, StorageError> {
        let rows = sqlx::query("SELECT * FROM collections ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_collection).collect())
    }

    /// Delete a collection with its documents and chunks in one
    /// transaction. Returns false if the collection did not exist.
    pub async fn delete_collection(&self, id: CollectionId) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunks WHERE document_id IN
                 (SELECT id FROM documents WHERE collection_id = ?)",
        )
        .bind(id.get())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM documents WHERE collection_id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- documents ----

    /// Insert a new document in `queued` state.
    pub async fn create_document(
        &self,
        collection_id: CollectionId,
        source_path: &str,
        file_type: &str,
        content_hash: &str,
        size_bytes: u64,
    ) -> Result<Document, StorageError> {
        let now = utc_now();
        let result = sqlx::query(
            r#"
            INSERT INTO documents
                (collection_id, source_path, file_type, content_hash, size_bytes,
                 chunk_count, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, 'queued', ?, ?)
            "#,
        )
        .bind(collection_id.get())
        .bind(source_path)
        .bind(file_type)
        .bind(content_hash)
        .bind(size_bytes as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Document {
            id: DocumentId::new(result.last_insert_rowid()),
            collection_id,
            source_path: source_path.to_string(),
            file_type: file_type.to_string(),
            content_hash: content_hash.to_string(),
            size_bytes,
            chunk_count: 0,
            status: DocumentStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StorageError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_document(&r)))
    }

    /// Dedup lookup: one document per (collection, content hash).
    pub async fn get_document_by_hash(
        &self,
        collection_id: CollectionId,
        content_hash: &str,
    ) -> Result<Option<Document>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE collection_id = ? AND content_hash = ?",
        )
        .bind(collection_id.get())
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_document(&r)))
    }

    /// Latest document for a source path (watcher and reindex resolution).
    pub async fn get_document_by_path(
        &self,
        collection_id: CollectionId,
        source_path: &str,
    ) -> Result<Option<Document>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE collection_id = ? AND source_path = ?
             ORDER BY id DESC LIMIT 1",
        )
        .bind(collection_id.get())
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_document(&r)))
    }

    pub async fn list_documents(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<Document>, StorageError> {
        let rows = sqlx::query("SELECT * FROM documents WHERE collection_id = ? ORDER BY id")
            .bind(collection_id.get())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    pub async fn set_document_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE documents SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(utc_now())
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Refresh hash/size/type when a source file's content changed
    /// (reindex path).
    pub async fn update_document_content(
        &self,
        id: DocumentId,
        content_hash: &str,
        size_bytes: u64,
        file_type: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE documents SET content_hash = ?, size_bytes = ?, file_type = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(content_hash)
        .bind(size_bytes as i64)
        .bind(file_type)
        .bind(utc_now())
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a document and its chunks in one transaction. Returns the
    /// number of chunks removed.
    pub async fn delete_document(&self, id: DocumentId) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed as usize)
    }

    // ---- chunks ----

    /// Replace a document's chunk set and mark it indexed, atomically.
    ///
    /// Prior chunk rows are deleted, the new set is inserted with
    /// contiguous indexes, and the document's chunk_count/status commit in
    /// the same transaction.
    pub async fn commit_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<(), StorageError> {
        let now = utc_now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id.get())
            .execute(&mut *tx)
            .await?;

        for (index, chunk) in chunks.iter().enumerate() {
            let metadata = serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".into());
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, chunk_index, content, embedding_hash, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk.id.get())
            .bind(document_id.get())
            .bind(index as i64)
            .bind(&chunk.content)
            .bind(&chunk.embedding_hash)
            .bind(metadata)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE documents SET chunk_count = ?, status = 'indexed', error = NULL,
             updated_at = ? WHERE id = ?",
        )
        .bind(chunks.len() as i64)
        .bind(now)
        .bind(document_id.get())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// All chunks of a document, ordered by chunk_index.
    pub async fn get_document_chunks(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ChunkRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id.get())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    /// Chunk ids of a document, ordered by chunk_index.
    pub async fn chunk_ids_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ChunkId>, StorageError> {
        let rows =
            sqlx::query("SELECT id FROM chunks WHERE document_id = ? ORDER BY chunk_index")
                .bind(document_id.get())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .map(|r| ChunkId::new(r.get::<i64, _>("id")))
            .collect())
    }

    /// Hydrate chunk rows for ranked vector hits. Unknown ids (vectors
    /// whose metadata never committed) are silently absent.
    pub async fn get_chunks_by_ids(
        &self,
        ids: &[ChunkId],
    ) -> Result<Vec<ChunkRecord>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM chunks WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.get());
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    // ---- stats ----

    pub async fn collection_stats(
        &self,
        collection_id: CollectionId,
    ) -> Result<CollectionStats, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS document_count,
                COALESCE(SUM(CASE WHEN status = 'indexed' THEN 1 ELSE 0 END), 0) AS indexed_count,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed_count,
                COALESCE(SUM(chunk_count), 0) AS chunk_count,
                COALESCE(SUM(size_bytes), 0) AS total_size_bytes
            FROM documents WHERE collection_id = ?
            "#,
        )
        .bind(collection_id.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(CollectionStats {
            document_count: row.get::<i64, _>("document_count") as u64,
            indexed_count: row.get::<i64, _>("indexed_count") as u64,
            failed_count: row.get::<i64, _>("failed_count") as u64,
            chunk_count: row.get::<i64, _>("chunk_count") as u64,
            total_size_bytes: row.get::<i64, _>("total_size_bytes") as u64,
        })
    }
}

fn row_to_collection(row: &SqliteRow) -> Collection {
    Collection {
        id: CollectionId::new(row.get("id")),
        name: row.get("name"),
        description: row.get("description"),
        embedding_model: row.get("embedding_model"),
        chunk_size: row.get::<i64, _>("chunk_size") as usize,
        chunk_overlap: row.get::<i64, _>("chunk_overlap") as usize,
        max_chunk_size: row.get::<i64, _>("max_chunk_size") as usize,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_document(row: &SqliteRow) -> Document {
    let status: String = row.get("status");
    Document {
        id: DocumentId::new(row.get("id")),
        collection_id: CollectionId::new(row.get("collection_id")),
        source_path: row.get("source_path"),
        file_type: row.get("file_type"),
        content_hash: row.get("content_hash"),
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        chunk_count: row.get::<i64, _>("chunk_count") as usize,
        status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Failed),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_chunk(row: &SqliteRow) -> ChunkRecord {
    let metadata: String = row.get("metadata");
    ChunkRecord {
        id: ChunkId::new(row.get("id")),
        document_id: DocumentId::new(row.get("document_id")),
        chunk_index: row.get::<i64, _>("chunk_index") as usize,
        content: row.get("content"),
        embedding_hash: row.get("embedding_hash"),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get("created_at"),
    }
}
