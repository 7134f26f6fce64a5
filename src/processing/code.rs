//! Code chunking: one chunk per top-level definition via tree-sitter.

use tree_sitter::{Node, Parser};

use super::estimator::TokenEstimator;
use super::{Chunk, ChunkingLimits, ChunkingStrategy, text};
use crate::types::ChunkMetadata;

/// Languages with grammar support for syntax-aware chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    Rust,
    Python,
    JavaScript,
}

impl CodeLanguage {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::JavaScript),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

/// Syntax-aware chunker: one chunk per top-level function/class/method,
/// falling back to plain-text chunking when the source is unparsable.
#[derive(Debug)]
pub struct CodeChunker {
    pub language: CodeLanguage,
}

impl ChunkingStrategy for CodeChunker {
    fn chunk(
        &self,
        content: &str,
        limits: &ChunkingLimits,
        estimator: &TokenEstimator,
    ) -> Vec<Chunk> {
        match chunk_definitions(self.language, content, limits, estimator) {
            Some(chunks) if !chunks.is_empty() => chunks,
            _ => {
                tracing::debug!(
                    target: "processing",
                    "no {} definitions found, falling back to text chunking",
                    self.language.as_str()
                );
                text::TextChunker.chunk(content, limits, estimator)
            }
        }
    }
}

fn chunk_definitions(
    language: CodeLanguage,
    source: &str,
    limits: &ChunkingLimits,
    estimator: &TokenEstimator,
) -> Option<Vec<Chunk>> {
    let mut parser = Parser::new();
    parser.set_language(&language.grammar()).ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();

    let mut chunks = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        collect_top_level(language, child, source, limits, estimator, &mut chunks);
    }

    if chunks.is_empty() { None } else { Some(chunks) }
}

fn collect_top_level(
    language: CodeLanguage,
    node: Node,
    source: &str,
    limits: &ChunkingLimits,
    estimator: &TokenEstimator,
    out: &mut Vec<Chunk>,
) {
    match language {
        CodeLanguage::Rust => match node.kind() {
            "function_item" => emit(node, "function", name_of(node, source), language, source, limits, estimator, out),
            "struct_item" => emit(node, "struct", name_of(node, source), language, source, limits, estimator, out),
            "enum_item" => emit(node, "enum", name_of(node, source), language, source, limits, estimator, out),
            "trait_item" => emit(node, "trait", name_of(node, source), language, source, limits, estimator, out),
            "impl_item" => {
                // One chunk per method, qualified by the impl target.
                let type_name = node
                    .child_by_field_name("type")
                    .map(|n| source[n.byte_range()].to_string());
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for item in body.children(&mut cursor) {
                        if item.kind() == "function_item" {
                            let method = name_of(item, source);
                            let symbol = match (&type_name, &method) {
                                (Some(t), Some(m)) => Some(format!("{t}::{m}")),
                                _ => method.clone(),
                            };
                            emit(item, "method", symbol, language, source, limits, estimator, out);
                        }
                    }
                }
            }
            _ => {}
        },
        CodeLanguage::Python => match node.kind() {
            "function_definition" => emit(node, "function", name_of(node, source), language, source, limits, estimator, out),
            "class_definition" => {
                emit_class(node, source, language, limits, estimator, out, "function_definition")
            }
            "decorated_definition" => {
                if let Some(inner) = node.child_by_field_name("definition") {
                    collect_top_level(language, inner, source, limits, estimator, out);
                }
            }
            _ => {}
        },
        CodeLanguage::JavaScript => match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                emit(node, "function", name_of(node, source), language, source, limits, estimator, out)
            }
            "class_declaration" => {
                emit_class(node, source, language, limits, estimator, out, "method_definition")
            }
            "export_statement" => {
                if let Some(inner) = node.child_by_field_name("declaration") {
                    collect_top_level(language, inner, source, limits, estimator, out);
                }
            }
            _ => {}
        },
    }
}

/// A class fits in one chunk when small; an oversized class becomes one
/// chunk per method instead.
#[allow(clippy::too_many_arguments)]
fn emit_class(
    node: Node,
    source: &str,
    language: CodeLanguage,
    limits: &ChunkingLimits,
    estimator: &TokenEstimator,
    out: &mut Vec<Chunk>,
    method_kind: &str,
) {
    let class_name = name_of(node, source);
    let tokens = estimator.estimate(&source[node.byte_range()]);
    if tokens <= limits.max_chunk_size {
        emit(node, "class", class_name, language, source, limits, estimator, out);
        return;
    }

    let mut emitted = false;
    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for item in body.children(&mut cursor) {
            if item.kind() == method_kind {
                let method = name_of(item, source);
                let symbol = match (&class_name, &method) {
                    (Some(c), Some(m)) => Some(format!("{c}.{m}")),
                    _ => method.clone(),
                };
                emit(item, "method", symbol, language, source, limits, estimator, out);
                emitted = true;
            }
        }
    }

    if !emitted {
        emit(node, "class", class_name, language, source, limits, estimator, out);
    }
}

#[allow(clippy::too_many_arguments)]
fn emit(
    node: Node,
    kind: &str,
    symbol: Option<String>,
    language: CodeLanguage,
    source: &str,
    limits: &ChunkingLimits,
    estimator: &TokenEstimator,
    out: &mut Vec<Chunk>,
) {
    let content = &source[node.byte_range()];
    let metadata = ChunkMetadata {
        kind: Some(kind.to_string()),
        symbol,
        language: Some(language.as_str().to_string()),
        line_range: Some((
            node.start_position().row as u32 + 1,
            node.end_position().row as u32 + 1,
        )),
        doc: extract_doc(language, node, source),
        ..Default::default()
    };

    let tokens = estimator.estimate(content);
    if tokens <= limits.max_chunk_size {
        out.push(Chunk {
            content: content.to_string(),
            metadata,
            token_count: tokens,
        });
    } else {
        out.extend(text::pack_sentences(content, limits, estimator, &metadata));
    }
}

fn name_of(node: Node, source: &str) -> Option<String> {
    node.child_by_field_name("name")
        .map(|n| source[n.byte_range()].to_string())
}

fn extract_doc(language: CodeLanguage, node: Node, source: &str) -> Option<String> {
    match language {
        CodeLanguage::Rust => {
            let mut lines = Vec::new();
            let mut prev = node.prev_sibling();
            while let Some(sibling) = prev {
                if sibling.kind() != "line_comment" {
                    break;
                }
                let comment = source[sibling.byte_range()].trim();
                let Some(text) = comment.strip_prefix("///") else {
                    break;
                };
                lines.push(text.trim().to_string());
                prev = sibling.prev_sibling();
            }
            if lines.is_empty() {
                None
            } else {
                lines.reverse();
                Some(lines.join("\n"))
            }
        }
        CodeLanguage::Python => {
            let body = node.child_by_field_name("body")?;
            let first = body.named_child(0)?;
            if first.kind() != "expression_statement" {
                return None;
            }
            let string = first.named_child(0)?;
            if string.kind() != "string" {
                return None;
            }
            Some(strip_string_quotes(&source[string.byte_range()]))
        }
        CodeLanguage::JavaScript => {
            let sibling = node.prev_sibling()?;
            if sibling.kind() != "comment" {
                return None;
            }
            let comment = source[sibling.byte_range()].trim();
            let body = comment.strip_prefix("/**")?.strip_suffix("*/")?;
            let cleaned: Vec<&str> = body
                .lines()
                .map(|l| l.trim().trim_start_matches('*').trim())
                .filter(|l| !l.is_empty())
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(cleaned.join("\n"))
            }
        }
    }
}

fn strip_string_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if trimmed.len() >= quote.len() * 2
            && trimmed.starts_with(quote)
            && trimmed.ends_with(quote)
        {
            return trimmed[quote.len()..trimmed.len() - quote.len()]
                .trim()
                .to_string();
        }
    }
    trimmed.to_string()
}
