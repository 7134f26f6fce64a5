//! Document processing: format detection and content-aware chunking.
//!
//! This module provides:
//! - A shared token estimator for chunk-size bookkeeping
//! - Format-specific chunking strategies (code, markdown, text, paginated)
//! - The `DocumentProcessor` dispatching on file type

pub mod code;
pub mod estimator;
pub mod markdown;
pub mod paginated;
pub mod text;

pub use code::{CodeChunker, CodeLanguage};
pub use estimator::TokenEstimator;
pub use markdown::MarkdownChunker;
pub use paginated::{PAGE_BREAK, PaginatedChunker};
pub use text::TextChunker;

use crate::types::ChunkMetadata;
use std::path::Path;
use thiserror::Error;

/// Errors from document parsing. Raised only for undecodable input;
/// syntactically broken code falls back to text chunking instead.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("input is not valid UTF-8 (first invalid byte at offset {offset})")]
    InvalidUtf8 { offset: usize },
}

/// Chunk sizing limits in estimated tokens.
///
/// Invariant: `chunk_overlap < chunk_size <= max_chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingLimits {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunk_size: usize,
}

impl ChunkingLimits {
    pub fn new(chunk_size: usize, chunk_overlap: usize, max_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            max_chunk_size,
        }
    }

    /// Validate the sizing invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be positive".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.chunk_size > self.max_chunk_size {
            return Err(format!(
                "chunk_size ({}) must not exceed max_chunk_size ({})",
                self.chunk_size, self.max_chunk_size
            ));
        }
        Ok(())
    }
}

/// A chunk produced by the processor, before ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub token_count: usize,
}

/// Detected document format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Code(CodeLanguage),
    Markdown,
    Text,
}

impl FileType {
    /// Detect the file type from a path. Unknown extensions are plain text.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("md" | "markdown" | "mdx") => Self::Markdown,
            Some(ext) => CodeLanguage::from_extension(ext)
                .map(Self::Code)
                .unwrap_or(Self::Text),
            None => Self::Text,
        }
    }

    /// Label stored on the document row.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code(lang) => lang.as_str(),
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }
}

/// Trait implemented by every chunking strategy.
pub trait ChunkingStrategy {
    fn chunk(
        &self,
        content: &str,
        limits: &ChunkingLimits,
        estimator: &TokenEstimator,
    ) -> Vec<Chunk>;
}

/// Tagged dispatch over the available strategies.
#[derive(Debug)]
pub enum Strategy {
    Code(CodeChunker),
    Markdown(MarkdownChunker),
    Text(TextChunker),
    Paginated(PaginatedChunker),
}

impl Strategy {
    /// Pick a strategy for the file type, with one content-aware
    /// refinement: plain text containing form feeds is paginated.
    pub fn select(file_type: FileType, content: &str) -> Self {
        match file_type {
            FileType::Code(language) => Self::Code(CodeChunker { language }),
            FileType::Markdown => Self::Markdown(MarkdownChunker),
            FileType::Text => {
                if content.contains(PAGE_BREAK) {
                    Self::Paginated(PaginatedChunker)
                } else {
                    Self::Text(TextChunker)
                }
            }
        }
    }
}

impl ChunkingStrategy for Strategy {
    fn chunk(
        &self,
        content: &str,
        limits: &ChunkingLimits,
        estimator: &TokenEstimator,
    ) -> Vec<Chunk> {
        match self {
            Self::Code(c) => c.chunk(content, limits, estimator),
            Self::Markdown(c) => c.chunk(content, limits, estimator),
            Self::Text(c) => c.chunk(content, limits, estimator),
            Self::Paginated(c) => c.chunk(content, limits, estimator),
        }
    }
}

/// Parses a file into ordered chunks using format-specific strategies.
#[derive(Debug, Default)]
pub struct DocumentProcessor {
    estimator: TokenEstimator,
}

impl DocumentProcessor {
    pub fn new() -> Self {
        Self {
            estimator: TokenEstimator::new(),
        }
    }

    /// The shared estimator, so callers can measure with the same rules.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Process raw file bytes into ordered chunks.
    ///
    /// The only failure is undecodable input; everything else degrades to
    /// a simpler strategy.
    pub fn process(
        &self,
        bytes: &[u8],
        file_type: FileType,
        limits: &ChunkingLimits,
    ) -> Result<Vec<Chunk>, ParseError> {
        let content = std::str::from_utf8(bytes).map_err(|e| ParseError::InvalidUtf8 {
            offset: e.valid_up_to(),
        })?;
        Ok(self.process_str(content, file_type, limits))
    }

    /// Process already-decoded content into ordered chunks.
    pub fn process_str(
        &self,
        content: &str,
        file_type: FileType,
        limits: &ChunkingLimits,
    ) -> Vec<Chunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let strategy = Strategy::select(file_type, content);
        strategy.chunk(content, limits, &self.estimator)
    }
}
