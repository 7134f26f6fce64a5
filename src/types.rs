//! Core identifiers and records shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw database id.
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            /// Get the raw database id.
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id! {
    /// Unique identifier for a collection.
    CollectionId
}
row_id! {
    /// Unique identifier for a document within a collection.
    DocumentId
}
row_id! {
    /// Unique identifier for a chunk.
    ChunkId
}
row_id! {
    /// Unique identifier for an index job.
    JobId
}

/// Lifecycle of a document inside the index.
///
/// queued -> processing -> indexed | failed; reindex returns an indexed
/// document to processing before it becomes indexed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "indexed" => Some(Self::Indexed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling tier for index jobs. Higher tiers always dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Numeric rank stored in the jobs table; larger dequeues first.
    pub fn rank(&self) -> i64 {
        match self {
            Self::High => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            2 => Self::High,
            0 => Self::Low,
            _ => Self::Normal,
        }
    }
}

/// What an index job does when a worker picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    IndexFile,
    IndexFolder,
    Reindex,
    Delete,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IndexFile => "index_file",
            Self::IndexFolder => "index_folder",
            Self::Reindex => "reindex",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "index_file" => Some(Self::IndexFile),
            "index_folder" => Some(Self::IndexFolder),
            "reindex" => Some(Self::Reindex),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an index job. Completed and failed rows are retained for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An isolated named knowledge base with its own chunking/embedding config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub description: Option<String>,
    /// Embedding backend id the collection's vectors were produced with.
    pub embedding_model: String,
    /// Target chunk size in estimated tokens.
    pub chunk_size: usize,
    /// Tokens carried from one chunk into the next.
    pub chunk_overlap: usize,
    /// Hard upper bound on chunk size in estimated tokens.
    pub max_chunk_size: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A source file tracked by a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub collection_id: CollectionId,
    pub source_path: String,
    pub file_type: String,
    /// SHA-256 of the raw file content; dedup key within the collection.
    pub content_hash: String,
    pub size_bytes: u64,
    pub chunk_count: usize,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Structured metadata attached to a chunk, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Strategy-specific kind: "section", "sentence", "page", "function", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Innermost heading for structured text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,

    /// Symbol name for code chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,

    /// Source language for code chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// 1-based inclusive line range in the source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(u32, u32)>,

    /// 1-based page number for paginated sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Leading doc comment or docstring for code chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// A persisted chunk row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub document_id: DocumentId,
    /// Contiguous, 0-based position within the document.
    pub chunk_index: usize,
    pub content: String,
    /// SHA-256 of `content`; the embedding cache key.
    pub embedding_hash: String,
    pub metadata: ChunkMetadata,
    pub created_at: i64,
}

/// A persisted index job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub id: JobId,
    pub priority: JobPriority,
    pub kind: JobKind,
    pub collection_id: CollectionId,
    /// Path for file/folder jobs, document id for reindex/delete by id.
    pub target: String,
    pub status: JobStatus,
    pub progress: f32,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Current unix timestamp in seconds.
pub fn utc_now() -> i64 {
    chrono::Utc::now().timestamp()
}
