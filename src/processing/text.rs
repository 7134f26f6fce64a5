//! Plain-text chunking: sentence splitting with greedy packing.

use super::estimator::TokenEstimator;
use super::{Chunk, ChunkingLimits, ChunkingStrategy};
use crate::types::ChunkMetadata;

/// Sentence-based chunker for unstructured text.
///
/// Sentences are packed greedily until `chunk_size`, the last
/// `chunk_overlap` tokens carry forward into the next chunk, and a sentence
/// that would overflow `max_chunk_size` is split mid-sentence on word
/// boundaries.
#[derive(Debug, Default)]
pub struct TextChunker;

impl ChunkingStrategy for TextChunker {
    fn chunk(
        &self,
        content: &str,
        limits: &ChunkingLimits,
        estimator: &TokenEstimator,
    ) -> Vec<Chunk> {
        let meta = ChunkMetadata {
            kind: Some("text".to_string()),
            ..Default::default()
        };
        pack_sentences(content, limits, estimator, &meta)
    }
}

/// Split `text` into sentences on `.`, `!`, `?` followed by whitespace.
///
/// The terminator stays with its sentence; an unterminated tail is a
/// sentence of its own.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut after_terminator = false;

    for (i, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            after_terminator = true;
            continue;
        }
        if after_terminator && ch.is_whitespace() {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = i;
        }
        if !ch.is_whitespace() {
            after_terminator = false;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Greedy sentence packer shared by the text, markdown (oversized
/// paragraphs), paginated (oversized pages), and code (oversized
/// definitions) strategies.
pub(crate) fn pack_sentences(
    content: &str,
    limits: &ChunkingLimits,
    estimator: &TokenEstimator,
    metadata: &ChunkMetadata,
) -> Vec<Chunk> {
    let mut packer = Packer {
        limits,
        estimator,
        metadata,
        chunks: Vec::new(),
        current: String::new(),
        fresh: false,
    };

    for sentence in split_sentences(content) {
        packer.push_sentence(&sentence);
    }

    packer.finish()
}

struct Packer<'a> {
    limits: &'a ChunkingLimits,
    estimator: &'a TokenEstimator,
    metadata: &'a ChunkMetadata,
    chunks: Vec<Chunk>,
    current: String,
    /// Whether `current` holds anything beyond carried overlap.
    fresh: bool,
}

impl Packer<'_> {
    fn push_sentence(&mut self, sentence: &str) {
        let tokens = self.estimator.estimate(sentence);

        if tokens > self.limits.max_chunk_size {
            // Hard-stop case: the sentence alone overflows the cap, so it
            // is packed word by word, closing at chunk_size boundaries.
            for word in sentence.split_whitespace() {
                self.push_word(word);
            }
            return;
        }

        let current_tokens = self.estimator.estimate(&self.current);
        if !self.current.is_empty() && current_tokens + tokens > self.limits.max_chunk_size {
            if self.fresh {
                self.close();
            }
            // Carried overlap plus this sentence may still overflow; the
            // overlap is sacrificed to keep the size invariant.
            if self.estimator.estimate(&self.current) + tokens > self.limits.max_chunk_size {
                self.current.clear();
            }
        }

        self.append(sentence);
        if self.estimator.estimate(&self.current) >= self.limits.chunk_size {
            self.close();
        }
    }

    fn push_word(&mut self, word: &str) {
        // A single pathological word longer than the cap is sliced by
        // characters; anything else closes the chunk at the target size.
        let max_chars = self.limits.max_chunk_size.saturating_mul(4).max(4);
        if word.chars().count() > max_chars {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                let piece: String = piece.iter().collect();
                self.push_word(&piece);
            }
            return;
        }

        self.append(word);
        if self.estimator.estimate(&self.current) >= self.limits.chunk_size {
            self.close();
        }
    }

    fn append(&mut self, text: &str) {
        if !self.current.is_empty() {
            self.current.push(' ');
        }
        self.current.push_str(text);
        self.fresh = true;
    }

    fn close(&mut self) {
        if !self.fresh {
            self.current.clear();
            return;
        }

        let content = std::mem::take(&mut self.current).trim().to_string();
        if content.is_empty() {
            self.fresh = false;
            return;
        }

        let seed = self
            .estimator
            .tail_by_tokens(&content, self.limits.chunk_overlap)
            .to_string();
        let token_count = self.estimator.estimate(&content);
        self.chunks.push(Chunk {
            content,
            metadata: self.metadata.clone(),
            token_count,
        });
        self.current = seed;
        self.fresh = false;
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.close();
        self.chunks
    }
}
