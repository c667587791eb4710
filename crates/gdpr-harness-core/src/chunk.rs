//! Text normalization and section-aware sliding-window chunking.
//!
//! Document text is split into sections on heading lines (`# Title`,
//! `## Title`, `1. Title`). Each section's body is tokenized on
//! whitespace and covered by overlapping windows of at most
//! `max_tokens` tokens.
//!
//! # Algorithm
//!
//! 1. Walk the lines. A heading line opens a new section titled with the
//!    line stripped of `#` markers; other lines accumulate as its body.
//!    Sections without body lines are dropped.
//! 2. Join the body, split on whitespace.
//! 3. Slide a window of `max_tokens` tokens with step
//!    `max_tokens - floor(max_tokens × overlap_ratio)` (or `max_tokens` if
//!    the overlap would leave no forward progress).
//! 4. The first window of a section is always emitted. A later window
//!    shorter than `min_tokens` is not emitted as-is: if it holds tokens
//!    the previous window did not cover, the last `max_tokens` tokens of
//!    the section are emitted instead; otherwise it is dropped.
//! 5. Chunk indices are global across sections, starting at 0.
//!
//! # Example
//!
//! ```rust
//! use gdpr_harness_core::chunk::{chunk_text, ChunkingParams};
//!
//! let chunks = chunk_text("# Intro\nHello world.", &ChunkingParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].section_title.as_deref(), Some("Intro"));
//! ```

use sha2::{Digest, Sha256};

pub const DEFAULT_MAX_TOKENS: usize = 1200;
pub const DEFAULT_MIN_TOKENS: usize = 400;
pub const DEFAULT_OVERLAP_RATIO: f64 = 0.15;

/// Window bounds for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkingParams {
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_ratio: f64,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            min_tokens: DEFAULT_MIN_TOKENS,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
        }
    }
}

impl ChunkingParams {
    /// Tokens shared by consecutive windows.
    pub fn overlap_tokens(&self) -> usize {
        (self.max_tokens as f64 * self.overlap_ratio).floor() as usize
    }

    /// Distance between consecutive window starts. Never zero.
    pub fn step(&self) -> usize {
        let overlap = self.overlap_tokens();
        if self.max_tokens > overlap {
            self.max_tokens - overlap
        } else {
            self.max_tokens.max(1)
        }
    }
}

/// A chunk produced by [`chunk_text`], before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub index: i64,
    pub section_title: Option<String>,
}

/// Collapse every whitespace run to one space and trim both ends.
///
/// Total and idempotent.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize each line on its own and drop lines that end up empty.
///
/// Line breaks survive, so headings stay visible to [`chunk_text`].
pub fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(normalize_text)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// SHA-256 hex digest of the chunk text. Used for dedup and staleness.
pub fn content_checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

struct Section<'a> {
    title: Option<String>,
    body: Vec<&'a str>,
}

fn heading_title(line: &str) -> Option<String> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    let is_heading = if hashes > 0 {
        line[hashes..].starts_with(|c: char| c.is_whitespace())
    } else {
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        digits > 0
            && line[digits..].starts_with('.')
            && line[digits + 1..].starts_with(|c: char| c.is_whitespace())
    };
    if !is_heading {
        return None;
    }
    Some(
        line.trim_matches(|c: char| c == '#' || c == ' ')
            .trim()
            .to_string(),
    )
}

fn split_sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut current = Section {
        title: None,
        body: Vec::new(),
    };
    for line in text.lines() {
        if let Some(title) = heading_title(line) {
            if !current.body.is_empty() {
                sections.push(current);
            }
            current = Section {
                title: Some(title),
                body: Vec::new(),
            };
        } else {
            current.body.push(line);
        }
    }
    if !current.body.is_empty() {
        sections.push(current);
    }
    sections
}

/// Split text into overlapping, section-tagged chunks.
///
/// Empty input yields no chunks. See the module docs for the windowing
/// rules.
pub fn chunk_text(text: &str, params: &ChunkingParams) -> Vec<TextChunk> {
    let max = params.max_tokens.max(1);
    let step = params.step();
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for section in split_sections(text) {
        let body = section.body.join(" ");
        let words: Vec<&str> = body.split_whitespace().collect();
        let mut start = 0usize;
        let mut covered_to = 0usize;

        while start < words.len() {
            let end = (start + max).min(words.len());
            let window = if end - start < params.min_tokens && start > 0 {
                if end <= covered_to {
                    break;
                }
                // Tail-anchored: keeps the window full size without
                // dropping the uncovered tail.
                &words[words.len().saturating_sub(max)..]
            } else {
                &words[start..end]
            };

            chunks.push(TextChunk {
                text: window.join(" "),
                index,
                section_title: section.title.clone(),
            });
            index += 1;

            if end - start < params.min_tokens && start > 0 {
                break;
            }
            covered_to = end;
            start += step;
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize, prefix: &str) -> String {
        (0..n)
            .map(|i| format!("{}{}", prefix, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  a\t\tb\n\nc  "), "a b c");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \n\t "), "");
    }

    #[test]
    fn test_normalize_idempotent() {
        for s in ["", "x", "  a  b ", "line one\r\nline\u{000B}two", "\u{3000}wide\u{3000}space"] {
            let once = normalize_text(s);
            assert_eq!(normalize_text(&once), once);
        }
    }

    #[test]
    fn test_normalize_lines_keeps_breaks() {
        assert_eq!(normalize_lines("# Intro  \n\n  body   text\n"), "# Intro\nbody text");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text("", &ChunkingParams::default()).is_empty());
        assert!(chunk_text("# Only a heading", &ChunkingParams::default()).is_empty());
    }

    #[test]
    fn test_short_section_single_chunk() {
        let chunks = chunk_text("just a few words", &ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "just a few words");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].section_title, None);
    }

    #[test]
    fn test_heading_patterns() {
        assert_eq!(heading_title("# Intro"), Some("Intro".to_string()));
        assert_eq!(heading_title("### Deep #"), Some("Deep".to_string()));
        assert_eq!(heading_title("12. Scope"), Some("12. Scope".to_string()));
        assert_eq!(heading_title("#hashtag"), None);
        assert_eq!(heading_title("3.5 percent"), None);
        assert_eq!(heading_title("plain"), None);
    }

    #[test]
    fn test_sections_carry_titles_and_global_index() {
        let text = "preamble words\n# One\nalpha beta\n# Two\ngamma";
        let chunks = chunk_text(text, &ChunkingParams::default());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].section_title, None);
        assert_eq!(chunks[1].section_title.as_deref(), Some("One"));
        assert_eq!(chunks[2].section_title.as_deref(), Some("Two"));
        let idx: Vec<i64> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn test_long_section_windows() {
        let text = format!("# Details\n{}", words(2000, "w"));
        let chunks = chunk_text(&text, &ChunkingParams::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.split(' ').count(), 1200);
        assert_eq!(chunks[1].text.split(' ').count(), 980);
        assert!(chunks[1].text.starts_with("w1020 "));
        assert!(chunks.iter().all(|c| c.section_title.as_deref() == Some("Details")));
    }

    #[test]
    fn test_short_tail_is_tail_anchored() {
        // 0..1200, then 1020..1400 is only 380 tokens: the last 1200 are emitted.
        let chunks = chunk_text(&words(1400, "t"), &ChunkingParams::default());
        assert_eq!(chunks.len(), 2);
        let second: Vec<&str> = chunks[1].text.split(' ').collect();
        assert_eq!(second.len(), 1200);
        assert_eq!(second[0], "t200");
        assert_eq!(*second.last().unwrap(), "t1399");
    }

    #[test]
    fn test_covered_tail_is_dropped() {
        // First window covers all 1100 tokens; the 80-token remainder adds nothing.
        let chunks = chunk_text(&words(1100, "t"), &ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.split(' ').count(), 1100);
    }

    #[test]
    fn test_every_token_covered_and_bounds_hold() {
        let params = ChunkingParams::default();
        for n in [1, 399, 400, 1199, 1200, 1201, 1419, 1421, 2500, 3333] {
            let text = words(n, "x");
            let chunks = chunk_text(&text, &params);
            let mut seen = std::collections::HashSet::new();
            for (i, c) in chunks.iter().enumerate() {
                let count = c.text.split(' ').count();
                assert!(count <= params.max_tokens, "n={} chunk {} too big", n, i);
                if chunks.len() > 1 {
                    assert!(count >= params.min_tokens, "n={} chunk {} too small", n, i);
                }
                seen.extend(c.text.split(' ').map(str::to_string));
            }
            assert_eq!(seen.len(), n, "n={} dropped tokens", n);
        }
    }

    #[test]
    fn test_full_overlap_still_advances() {
        let params = ChunkingParams {
            max_tokens: 10,
            min_tokens: 1,
            overlap_ratio: 1.0,
        };
        assert_eq!(params.step(), 10);
        let chunks = chunk_text(&words(25, "z"), &params);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            content_checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_deterministic() {
        let text = format!("# A\n{}\n# B\n{}", words(900, "a"), words(1500, "b"));
        let c1 = chunk_text(&text, &ChunkingParams::default());
        let c2 = chunk_text(&text, &ChunkingParams::default());
        assert_eq!(c1, c2);
    }
}
