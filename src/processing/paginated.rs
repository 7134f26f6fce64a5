//! Paginated chunking: one chunk per form-feed separated page.

use super::estimator::TokenEstimator;
use super::{Chunk, ChunkingLimits, ChunkingStrategy, text};
use crate::types::ChunkMetadata;

/// Form feed, the page separator emitted by text extractors for paginated
/// formats.
pub const PAGE_BREAK: char = '\u{000C}';

/// Page-based chunker: each page becomes one chunk carrying its 1-based
/// page number; an oversized page is sentence-packed with every piece
/// keeping the page number.
#[derive(Debug, Default)]
pub struct PaginatedChunker;

impl ChunkingStrategy for PaginatedChunker {
    fn chunk(
        &self,
        content: &str,
        limits: &ChunkingLimits,
        estimator: &TokenEstimator,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for (index, page) in content.split(PAGE_BREAK).enumerate() {
            let page = page.trim();
            if page.is_empty() {
                continue;
            }

            let metadata = ChunkMetadata {
                kind: Some("page".to_string()),
                page: Some(index as u32 + 1),
                ..Default::default()
            };

            let tokens = estimator.estimate(page);
            if tokens <= limits.max_chunk_size {
                chunks.push(Chunk {
                    content: page.to_string(),
                    metadata,
                    token_count: tokens,
                });
            } else {
                chunks.extend(text::pack_sentences(page, limits, estimator, &metadata));
            }
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ChunkingLimits {
        ChunkingLimits {
            chunk_size: 40,
            chunk_overlap: 5,
            max_chunk_size: 60,
        }
    }

    #[test]
    fn test_one_chunk_per_page() {
        let content = "First page text.\u{000C}Second page text.\u{000C}Third page text.";
        let chunks = PaginatedChunker.chunk(content, &limits(), &TokenEstimator::new());

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.page, Some(i as u32 + 1));
            assert_eq!(chunk.metadata.kind.as_deref(), Some("page"));
        }
    }

    #[test]
    fn test_blank_pages_skipped_but_numbering_kept() {
        let content = "Page one.\u{000C}\u{000C}Page three.";
        let chunks = PaginatedChunker.chunk(content, &limits(), &TokenEstimator::new());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.page, Some(1));
        assert_eq!(chunks[1].metadata.page, Some(3));
    }

    #[test]
    fn test_oversized_page_split_keeps_page_number() {
        let big_page = "Lots of words on this page. ".repeat(30);
        let content = format!("Small first page.\u{000C}{big_page}");
        let chunks = PaginatedChunker.chunk(&content, &limits(), &TokenEstimator::new());

        assert!(chunks.len() > 2);
        for chunk in chunks.iter().skip(1) {
            assert_eq!(chunk.metadata.page, Some(2));
            assert!(chunk.token_count <= limits().max_chunk_size);
        }
    }
}
