//! Heading-aware semantic chunking with overlap and stable ids.
//!
//! Markdown input is segmented at ATX headings; sections that fit the
//! character budget become one `section` chunk, oversized sections are
//! split into overlapping word windows. Input without headings goes
//! through the same window algorithm as `text_chunk`s.

use pagemill_types::{ChunkFormat, Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use url::Url;

/// Approximate characters per word; converts the character budget into
/// word-window sizes. Calibrated for English prose.
const CHARS_PER_WORD: usize = 5;

/// One chunk of content for retrieval indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable digest of `(source_url, heading-or-kind tag, chunk_index)`.
    pub id: String,
    pub content: String,
    pub source_url: String,
    pub domain: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub word_count: usize,
    pub char_count: usize,
    pub kind: ChunkKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// A whole heading-delimited section that fit the budget.
    Section,
    /// A window cut from an oversized section.
    ContentChunk,
    /// A window cut from input without headings.
    TextChunk,
}

/// Split content into chunks.
///
/// `chunk_index` values are contiguous from 0 across the document and
/// `total_chunks` is set on every chunk. Empty input yields zero chunks.
pub fn chunk_content(
    content: &str,
    source_url: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>> {
    if chunk_size == 0 || chunk_overlap >= chunk_size {
        return Err(Error::new(
            ErrorKind::ConfigInvalid,
            "chunk_overlap must be smaller than chunk_size",
        )
        .with_context("chunk_size", chunk_size.to_string())
        .with_context("chunk_overlap", chunk_overlap.to_string()));
    }
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let domain = domain_of(source_url);
    let mut builder = ChunkBuilder {
        source_url,
        domain: &domain,
        chunks: Vec::new(),
    };

    if has_heading(content) {
        for (heading, body) in split_sections(content) {
            builder.push_section(&heading, &body, chunk_size, chunk_overlap);
        }
    } else {
        builder.push_windows(content, None, ChunkKind::TextChunk, chunk_size, chunk_overlap);
    }

    let total = builder.chunks.len();
    for chunk in &mut builder.chunks {
        chunk.total_chunks = total;
    }
    Ok(builder.chunks)
}

/// Persist chunks under `dir`: one `chunks.jsonl` line per chunk, or one
/// pretty-printed `{id}.json` file per chunk.
pub fn write_chunks(chunks: &[Chunk], dir: &Path, format: ChunkFormat) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| chunk_io(dir, e))?;

    match format {
        ChunkFormat::Jsonl => {
            let mut out = String::new();
            for chunk in chunks {
                let line = serde_json::to_string(chunk).map_err(|e| {
                    Error::new(ErrorKind::ChunkingFailed, format!("chunk serialization failed: {e}"))
                        .with_source(e)
                })?;
                out.push_str(&line);
                out.push('\n');
            }
            let path = dir.join("chunks.jsonl");
            std::fs::write(&path, out).map_err(|e| chunk_io(&path, e))?;
        }
        ChunkFormat::Json => {
            for chunk in chunks {
                let path = dir.join(format!("{}.json", chunk.id));
                let body = serde_json::to_string_pretty(chunk).map_err(|e| {
                    Error::new(ErrorKind::ChunkingFailed, format!("chunk serialization failed: {e}"))
                        .with_source(e)
                })?;
                std::fs::write(&path, body).map_err(|e| chunk_io(&path, e))?;
            }
        }
    }
    Ok(())
}

fn chunk_io(path: &Path, e: std::io::Error) -> Error {
    Error::new(ErrorKind::ChunkingFailed, format!("failed to write chunks: {e}"))
        .with_context("path", path.display().to_string())
        .with_source(e)
}

struct ChunkBuilder<'a> {
    source_url: &'a str,
    domain: &'a str,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder<'_> {
    fn push_section(&mut self, heading: &str, body: &str, chunk_size: usize, chunk_overlap: usize) {
        if body.trim().is_empty() {
            return;
        }
        if body.chars().count() <= chunk_size {
            self.push_chunk(body.to_string(), non_empty(heading), ChunkKind::Section);
        } else {
            self.push_windows(
                body,
                non_empty(heading),
                ChunkKind::ContentChunk,
                chunk_size,
                chunk_overlap,
            );
        }
    }

    /// Overlapping word windows: `stride = words_per_chunk - overlap_words`.
    fn push_windows(
        &mut self,
        text: &str,
        heading: Option<String>,
        kind: ChunkKind,
        chunk_size: usize,
        chunk_overlap: usize,
    ) {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return;
        }
        let words_per_chunk = (chunk_size / CHARS_PER_WORD).max(1);
        let overlap_words = chunk_overlap / CHARS_PER_WORD;
        let stride = words_per_chunk.saturating_sub(overlap_words).max(1);

        let mut start = 0;
        while start < words.len() {
            let end = (start + words_per_chunk).min(words.len());
            let content = words[start..end].join(" ");
            self.push_chunk(content, heading.clone(), kind);
            if end == words.len() {
                break;
            }
            start += stride;
        }
    }

    fn push_chunk(&mut self, content: String, heading: Option<String>, kind: ChunkKind) {
        let index = self.chunks.len();
        let tag = match (&heading, kind) {
            (Some(heading), _) => heading.clone(),
            (None, ChunkKind::TextChunk) => "text".to_string(),
            (None, _) => String::new(),
        };
        let id = chunk_id(self.source_url, &tag, index);
        let word_count = content.split_whitespace().count();
        let char_count = content.chars().count();
        self.chunks.push(Chunk {
            id,
            content,
            source_url: self.source_url.to_string(),
            domain: self.domain.to_string(),
            chunk_index: index,
            total_chunks: 0,
            word_count,
            char_count,
            kind,
            heading,
        });
    }
}

/// Digest of `(source_url, heading-or-kind tag, chunk_index)`; stable
/// across runs.
fn chunk_id(source_url: &str, tag: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{source_url}:{tag}:{index}").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn domain_of(source_url: &str) -> String {
    Url::parse(source_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn has_heading(content: &str) -> bool {
    content.lines().any(is_heading_line)
}

fn is_heading_line(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// Segment at heading lines. A section is its heading line plus all
/// content up to the next heading; content before the first heading
/// forms a section with an empty heading.
fn split_sections(content: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut heading = String::new();
    let mut body = String::new();

    for line in content.lines() {
        if line.starts_with('#') {
            if !body.is_empty() {
                sections.push((heading.clone(), body.clone()));
            }
            heading = line.to_string();
            body = format!("{line}\n");
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    if !body.is_empty() {
        sections.push((heading, body));
    }
    sections
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
