//! Markdown chunking pipeline.
//!
//! A document is split at heading boundaries first, then any section longer
//! than the token ceiling is cut into overlapping windows. Tokens come from a
//! [`TokenSpans`] implementation: the embedding model's tokenizer in
//! production, whitespace words otherwise. A window keeps the original text
//! between its first and last token.
use crate::embedder::tokenizer::{TokenSpans, WhitespaceTokens};
use crate::error::IndexError;
use crate::indexer::ledger::{FileFingerprint, fingerprint_with_bytes};
use crate::indexer::paths::file_name;
use pulldown_cmark::{Event, Options, Parser, Tag};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A chunk before embedding, with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub text: String,
    pub filename: String,
    /// Canonical path; the join key to the ledger and the store.
    pub path: String,
}

/// Chunks of one file together with the fingerprint of the bytes they came from.
#[derive(Debug)]
pub struct ChunkedFile {
    pub fingerprint: FileFingerprint,
    pub chunks: Vec<DocumentChunk>,
}

/// Result of chunking a batch of files.
#[derive(Debug, Default)]
pub struct ChunkingReport {
    pub files: Vec<ChunkedFile>,
    /// Files that could not be read, with the reason.
    pub skipped: Vec<(String, IndexError)>,
}

impl ChunkingReport {
    /// All chunks of the batch, file by file.
    pub fn chunks(&self) -> impl Iterator<Item = &DocumentChunk> {
        self.files.iter().flat_map(|f| f.chunks.iter())
    }

    pub fn chunk_count(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }
}

/// Heading-then-size splitter.
#[derive(Clone)]
pub struct MarkdownSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    tokens: Arc<dyn TokenSpans>,
}

impl Default for MarkdownSplitter {
    fn default() -> Self {
        Self::new(512, 100)
    }
}

impl MarkdownSplitter {
    /// `chunk_overlap` is clamped below `chunk_size` so windows always advance.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            tokens: Arc::new(WhitespaceTokens),
        }
    }

    /// Measure chunks with `tokens` instead of whitespace words.
    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSpans>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Split document text into non-empty chunk texts.
    pub fn split<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut chunks = Vec::new();
        for section in split_sections(text) {
            let spans = self.tokens.token_spans(section);
            chunks.extend(split_by_spans(
                section,
                &spans,
                self.chunk_size,
                self.chunk_overlap,
            ));
        }
        chunks
    }

    /// Read each file and turn it into chunks. Unreadable files are reported
    /// in [`ChunkingReport::skipped`] and do not stop the batch.
    pub fn chunk_documents(&self, paths: &[String]) -> ChunkingReport {
        let mut report = ChunkingReport::default();

        for path in paths {
            let (fingerprint, bytes) = match fingerprint_with_bytes(Path::new(path)) {
                Ok(read) => read,
                Err(e) => {
                    warn!("Skipping {path}: {e}");
                    report.skipped.push((path.clone(), e));
                    continue;
                }
            };

            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!("{path} is not valid UTF-8, decoding lossily");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };

            let filename = file_name(&fingerprint.path).to_string();
            let chunks: Vec<DocumentChunk> = self
                .split(&text)
                .into_iter()
                .map(|piece| DocumentChunk {
                    text: piece.to_string(),
                    filename: filename.clone(),
                    path: fingerprint.path.clone(),
                })
                .collect();

            debug!("{path}: {} chunks", chunks.len());
            report.files.push(ChunkedFile {
                fingerprint,
                chunks,
            });
        }

        report
    }
}

/// Split Markdown at heading boundaries. Each section starts with its heading;
/// text before the first heading forms its own section.
pub fn split_sections(text: &str) -> Vec<&str> {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES
        | Options::ENABLE_YAML_STYLE_METADATA_BLOCKS;

    let mut boundaries = vec![0];
    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        if let Event::Start(Tag::Heading { .. }) = event {
            // Setext headings report the start of their text line
            let start = text[..range.start].rfind('\n').map_or(0, |i| i + 1);
            if start > *boundaries.last().unwrap_or(&0) {
                boundaries.push(start);
            }
        }
    }
    boundaries.push(text.len());

    boundaries
        .windows(2)
        .map(|w| &text[w[0]..w[1]])
        .filter(|section| !section.trim().is_empty())
        .collect()
}

/// Cut `text` into windows of at most `size` whitespace words, consecutive
/// windows sharing `overlap` words. Whitespace-only input yields nothing.
pub fn split_by_tokens(text: &str, size: usize, overlap: usize) -> Vec<&str> {
    split_by_spans(text, &WhitespaceTokens.token_spans(text), size, overlap)
}

/// Window `text` over the token byte ranges in `spans`.
fn split_by_spans<'t>(
    text: &'t str,
    spans: &[(usize, usize)],
    size: usize,
    overlap: usize,
) -> Vec<&'t str> {
    let spans: Vec<(usize, usize)> = spans
        .iter()
        .copied()
        .filter(|&(start, end)| {
            start < end
                && end <= text.len()
                && text.is_char_boundary(start)
                && text.is_char_boundary(end)
        })
        .collect();

    let Some(&(first, _)) = spans.first() else {
        return Vec::new();
    };
    let size = size.max(1);
    if spans.len() <= size {
        let last = spans[spans.len() - 1].1;
        return vec![&text[first..last]];
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(spans.len());
        windows.push(&text[spans[start].0..spans[end - 1].1]);
        if end == spans.len() {
            break;
        }
        start += step;
    }
    windows
}
