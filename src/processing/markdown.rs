//! Markdown chunking: header-bounded sections with paragraph accumulation.

use super::estimator::TokenEstimator;
use super::{Chunk, ChunkingLimits, ChunkingStrategy, text};
use crate::types::ChunkMetadata;

/// Section-based chunker for markdown and similar structured text.
///
/// Sections split on ATX header boundaries. Body paragraphs accumulate
/// until the target size, a closing chunk seeds the next with trailing
/// whole paragraphs worth at least `chunk_overlap` tokens, and paragraphs
/// are never split unless one alone exceeds `max_chunk_size`.
#[derive(Debug, Default)]
pub struct MarkdownChunker;

#[derive(Debug)]
struct Section {
    /// Heading text without the hash markers.
    heading: Option<String>,
    /// The raw heading line, kept at the top of the section's first chunk.
    heading_line: Option<String>,
    paragraphs: Vec<String>,
}

impl ChunkingStrategy for MarkdownChunker {
    fn chunk(
        &self,
        content: &str,
        limits: &ChunkingLimits,
        estimator: &TokenEstimator,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for section in parse_sections(content) {
            let metadata = ChunkMetadata {
                kind: Some("section".to_string()),
                heading: section.heading.clone(),
                ..Default::default()
            };

            let mut builder = SectionBuilder {
                limits,
                estimator,
                metadata: &metadata,
                chunks: &mut chunks,
                current: Vec::new(),
                fresh: 0,
            };

            if let Some(line) = &section.heading_line {
                builder.current.push(line.clone());
                builder.fresh += 1;
            }

            for paragraph in &section.paragraphs {
                builder.push_paragraph(paragraph);
            }
            builder.finish();
        }

        chunks
    }
}

/// Parse ATX headings: 1-6 hashes followed by whitespace and text.
fn parse_heading(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Split content into sections on heading lines, bodies into paragraphs
/// on blank lines.
fn parse_sections(content: &str) -> Vec<Section> {
    let mut sections = vec![Section {
        heading: None,
        heading_line: None,
        paragraphs: Vec::new(),
    }];
    let mut paragraph = String::new();

    let flush = |sections: &mut Vec<Section>, paragraph: &mut String| {
        let text = paragraph.trim().to_string();
        if !text.is_empty() {
            sections.last_mut().unwrap().paragraphs.push(text);
        }
        paragraph.clear();
    };

    for line in content.lines() {
        if let Some(heading) = parse_heading(line) {
            flush(&mut sections, &mut paragraph);
            sections.push(Section {
                heading: Some(heading),
                heading_line: Some(line.trim().to_string()),
                paragraphs: Vec::new(),
            });
        } else if line.trim().is_empty() {
            flush(&mut sections, &mut paragraph);
        } else {
            if !paragraph.is_empty() {
                paragraph.push('\n');
            }
            paragraph.push_str(line);
        }
    }
    flush(&mut sections, &mut paragraph);

    // Drop an empty leading pseudo-section (content that starts with a header).
    sections
        .into_iter()
        .filter(|s| s.heading.is_some() || !s.paragraphs.is_empty())
        .collect()
}

struct SectionBuilder<'a> {
    limits: &'a ChunkingLimits,
    estimator: &'a TokenEstimator,
    metadata: &'a ChunkMetadata,
    chunks: &'a mut Vec<Chunk>,
    current: Vec<String>,
    /// Paragraphs added since the last close (seeded overlap excluded).
    fresh: usize,
}

impl SectionBuilder<'_> {
    fn current_tokens(&self) -> usize {
        self.current
            .iter()
            .map(|p| self.estimator.estimate(p))
            .sum()
    }

    fn push_paragraph(&mut self, paragraph: &str) {
        let tokens = self.estimator.estimate(paragraph);

        if tokens > self.limits.max_chunk_size {
            // The one case where a paragraph is split: it cannot fit whole.
            self.close(false);
            self.current.clear();
            self.fresh = 0;
            self.chunks.extend(text::pack_sentences(
                paragraph,
                self.limits,
                self.estimator,
                self.metadata,
            ));
            return;
        }

        if !self.current.is_empty() && self.current_tokens() + tokens > self.limits.max_chunk_size {
            self.close(true);
            if self.current_tokens() + tokens > self.limits.max_chunk_size {
                self.current.clear();
            }
        }

        self.current.push(paragraph.to_string());
        self.fresh += 1;

        if self.current_tokens() >= self.limits.chunk_size {
            self.close(true);
        }
    }

    /// Emit the accumulated chunk. With `seed_overlap`, trailing whole
    /// paragraphs worth at least `chunk_overlap` tokens carry into the
    /// next chunk.
    fn close(&mut self, seed_overlap: bool) {
        if self.fresh == 0 {
            self.current.clear();
            return;
        }

        let content = self.current.join("\n\n");
        let token_count = self.estimator.estimate(&content);

        let mut seed: Vec<String> = Vec::new();
        if seed_overlap && self.limits.chunk_overlap > 0 {
            let mut seed_tokens = 0;
            for paragraph in self.current.iter().rev() {
                if seed_tokens >= self.limits.chunk_overlap
                    || seed_tokens + self.estimator.estimate(paragraph) > self.limits.chunk_size
                {
                    break;
                }
                seed_tokens += self.estimator.estimate(paragraph);
                seed.insert(0, paragraph.clone());
            }
        }

        self.chunks.push(Chunk {
            content,
            metadata: self.metadata.clone(),
            token_count,
        });
        self.current = seed;
        self.fresh = 0;
    }

    fn finish(mut self) {
        self.close(false);
    }
}
