//! Budgeted content extraction
//!
//! Reduces an arbitrarily large body to at most `budget` bytes of evidence:
//! a head, a tail and pattern-matched snippets from the middle region. All
//! sizes are UTF-8 byte lengths; every cut is snapped inward to a character
//! boundary, so the budget is never exceeded.

use super::patterns::{compile_catalogue, PatternCategory, SecurityPattern};
use serde::Serialize;

/// Default total extraction budget in bytes
pub const DEFAULT_BUDGET: usize = 24_000;

const HEAD_BYTES: usize = 8_000;
const TAIL_BYTES: usize = 4_000;
const CONTEXT_BYTES: usize = 150;
/// Extra distance searched for a line break around the context window
const LINE_SNAP_BYTES: usize = 50;
const MAX_SNIPPET_BYTES: usize = 500;
const MAX_SNIPPETS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Body fit in the budget and is returned whole as the head
    FullContent,
    /// Head, tail and middle-region snippets
    Budgeted,
}

/// Code found around one pattern match
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snippet {
    pub pattern: String,
    pub category: PatternCategory,
    pub code: String,
    /// Byte offset of the match in the original body
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionMetadata {
    pub original_size: usize,
    pub content_type: String,
    pub extraction_method: ExtractionMethod,
    pub budget: usize,
    pub head_size: usize,
    pub tail_size: usize,
    pub patterns_size: usize,
    pub total_extracted: usize,
    /// Distinct pattern names that produced a snippet, in catalogue order
    pub patterns_found: Vec<String>,
    pub patterns_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub head: String,
    pub tail: String,
    pub snippets: Vec<Snippet>,
    pub metadata: ExtractionMetadata,
}

/// Extractor holding the compiled pattern catalogue
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    patterns: Vec<SecurityPattern>,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor {
    pub fn new() -> Self {
        Self {
            patterns: compile_catalogue(),
        }
    }

    /// Extract at most `budget` bytes of evidence from `body`.
    pub fn extract(&self, body: &str, content_type: &str, budget: usize) -> Extraction {
        let size = body.len();

        if size <= budget {
            return finish(
                body.to_string(),
                String::new(),
                Vec::new(),
                ExtractionMethod::FullContent,
                size,
                content_type,
                budget,
            );
        }

        let head_end = floor_boundary(body, HEAD_BYTES.min(budget));
        let tail_want = TAIL_BYTES.min(budget - head_end).min(size - head_end);
        let tail_start = ceil_boundary(body, size - tail_want).max(head_end);

        let head = &body[..head_end];
        let tail = &body[tail_start..];
        let pattern_budget = budget - head.len() - tail.len();
        let middle = &body[head_end..tail_start];

        let snippets = self.scan(middle, head_end, pattern_budget);

        tracing::debug!(
            original_size = size,
            budget,
            snippets = snippets.len(),
            "Budgeted extraction complete"
        );

        finish(
            head.to_string(),
            tail.to_string(),
            snippets,
            ExtractionMethod::Budgeted,
            size,
            content_type,
            budget,
        )
    }

    fn scan(&self, middle: &str, offset: usize, budget: usize) -> Vec<Snippet> {
        let mut snippets: Vec<Snippet> = Vec::new();
        let mut remaining = budget;

        if middle.is_empty() || remaining == 0 {
            return snippets;
        }

        'patterns: for pattern in &self.patterns {
            for m in pattern.regex.find_iter(middle) {
                if remaining == 0 || snippets.len() >= MAX_SNIPPETS {
                    break 'patterns;
                }

                let code = context_window(middle, m.start(), m.end());
                if code.is_empty()
                    || code.len() >= MAX_SNIPPET_BYTES
                    || code.len() > remaining
                    || snippets.iter().any(|s| s.code == code)
                {
                    continue;
                }

                remaining -= code.len();
                snippets.push(Snippet {
                    pattern: pattern.name.to_string(),
                    category: pattern.category,
                    code: code.to_string(),
                    position: offset + m.start(),
                });
            }
        }

        snippets
    }
}

fn finish(
    head: String,
    tail: String,
    snippets: Vec<Snippet>,
    method: ExtractionMethod,
    original_size: usize,
    content_type: &str,
    budget: usize,
) -> Extraction {
    let patterns_size: usize = snippets.iter().map(|s| s.code.len()).sum();
    let mut patterns_found: Vec<String> = Vec::new();
    for snippet in &snippets {
        if !patterns_found.contains(&snippet.pattern) {
            patterns_found.push(snippet.pattern.clone());
        }
    }

    let metadata = ExtractionMetadata {
        original_size,
        content_type: content_type.to_string(),
        extraction_method: method,
        budget,
        head_size: head.len(),
        tail_size: tail.len(),
        patterns_size,
        total_extracted: head.len() + tail.len() + patterns_size,
        patterns_found,
        patterns_count: snippets.len(),
    };

    Extraction {
        head,
        tail,
        snippets,
        metadata,
    }
}

/// Trimmed text around a match: `CONTEXT_BYTES` either side, widened or
/// narrowed to a line break found within `LINE_SNAP_BYTES` more.
fn context_window(text: &str, match_start: usize, match_end: usize) -> &str {
    let bytes = text.as_bytes();

    let start = ceil_boundary(text, match_start.saturating_sub(CONTEXT_BYTES)).min(match_start);
    let end = floor_boundary(text, (match_end + CONTEXT_BYTES).min(text.len())).max(match_end);

    let search_from = start.saturating_sub(LINE_SNAP_BYTES);
    let line_start = bytes[search_from..match_start]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| search_from + pos + 1)
        .unwrap_or(start);

    let search_to = (end + LINE_SNAP_BYTES).min(text.len());
    let line_end = bytes[match_end..search_to]
        .iter()
        .position(|&b| b == b'\n')
        .map(|pos| match_end + pos)
        .unwrap_or(end);

    text[line_start..line_end].trim()
}

/// Largest char boundary `<= index`
fn floor_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary `>= index`
fn ceil_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
