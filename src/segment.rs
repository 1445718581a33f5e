//! Deterministic segmentation of reference text into passages.
//!
//! Passage identity is load-bearing for citation checks, so the rule is
//! fixed and versioned:
//!
//! 1. A block ends at a blank line. A heading line (`# ...`, `1.2 Title`,
//!    `1.2.3`, `Section 4`, `Article IV`, `Chapter 2`) always starts a new block.
//! 2. Block text is its whitespace-separated words joined by single spaces.
//! 3. Blocks longer than `max_passage_chars` are split greedily. A split
//!    prefers the last sentence-ending word if that keeps at least half the
//!    cap; a single word longer than the cap is hard-split on char boundaries.
//! 4. Passages are numbered `P1..Pn` in document order. Offsets are byte
//!    offsets into the decoded text.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::canonical::canonical_hash_hex;
use crate::types::OffsetRange;

/// Version of the segmentation rule. Changing it changes passage identity.
pub const SEGMENTATION_VERSION: &str = "seg_v1";

/// Default passage cap in characters.
pub const DEFAULT_MAX_PASSAGE_CHARS: usize = 1200;

/// Segmentation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationPolicy {
    /// Maximum characters in a passage's normalized text.
    pub max_passage_chars: usize,
}

impl Default for SegmentationPolicy {
    fn default() -> Self {
        Self {
            max_passage_chars: DEFAULT_MAX_PASSAGE_CHARS,
        }
    }
}

impl SegmentationPolicy {
    /// Create a policy with a custom cap (clamped to at least 1).
    pub fn with_max_chars(max_passage_chars: usize) -> Self {
        Self {
            max_passage_chars: max_passage_chars.max(1),
        }
    }

    /// Hash of the policy and rule version.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(&(SEGMENTATION_VERSION, self.max_passage_chars))
    }
}

/// A passage before it is attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Byte range in the source text.
    pub range: OffsetRange,
    /// Normalized text.
    pub text: String,
}

fn heading_regex() -> &'static regex_lite::Regex {
    static HEADING: OnceLock<regex_lite::Regex> = OnceLock::new();
    HEADING.get_or_init(|| {
        regex_lite::Regex::new(
            r"^(#{1,6}\s|\d+(\.\d+)+\.?(\s|$)|\d+\.?\s+[A-Z]|(?i:section|article|chapter)\s+[0-9IVXLC]+\b)",
        )
        .expect("heading pattern is valid")
    })
}

/// Whether a trimmed line starts a new section.
pub fn is_heading(line: &str) -> bool {
    heading_regex().is_match(line.trim_start())
}

/// A word with its byte span in the source.
#[derive(Debug, Clone, Copy)]
struct Word<'a> {
    start: usize,
    text: &'a str,
}

impl Word<'_> {
    fn end(&self) -> usize {
        self.start + self.text.len()
    }

    fn chars(&self) -> usize {
        self.text.chars().count()
    }

    fn ends_sentence(&self) -> bool {
        matches!(self.text.chars().last(), Some('.' | '!' | '?' | ';' | ':'))
    }
}

/// Split decoded text into block byte ranges.
fn blocks(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);

        if content.trim().is_empty() {
            if let Some(block) = current.take() {
                out.push(block);
            }
            continue;
        }

        let line_end = line_start + content.len();
        current = match current {
            Some(block) if is_heading(content) => {
                out.push(block);
                Some((line_start, line_end))
            }
            Some((start, _)) => Some((start, line_end)),
            None => Some((line_start, line_end)),
        };
    }

    if let Some(block) = current {
        out.push(block);
    }
    out
}

fn words_in(text: &str, start: usize, end: usize) -> Vec<Word<'_>> {
    let slice = &text[start..end];
    let mut words = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in slice.char_indices() {
        match (c.is_whitespace(), word_start) {
            (true, Some(ws)) => {
                words.push(Word { start: start + ws, text: &slice[ws..i] });
                word_start = None;
            }
            (false, None) => word_start = Some(i),
            _ => {}
        }
    }
    if let Some(ws) = word_start {
        words.push(Word { start: start + ws, text: &slice[ws..] });
    }
    words
}

/// Hard-split an over-long word into pieces of at most `max` chars.
fn split_long_word(word: Word<'_>, max: usize) -> Vec<Word<'_>> {
    let mut pieces = Vec::new();
    let mut piece_start = 0;
    let mut count = 0;

    for (i, _) in word.text.char_indices() {
        if count == max {
            pieces.push(Word {
                start: word.start + piece_start,
                text: &word.text[piece_start..i],
            });
            piece_start = i;
            count = 0;
        }
        count += 1;
    }
    pieces.push(Word {
        start: word.start + piece_start,
        text: &word.text[piece_start..],
    });
    pieces
}

fn emit(words: &[Word<'_>], out: &mut Vec<Segment>) {
    if let (Some(first), Some(last)) = (words.first(), words.last()) {
        out.push(Segment {
            range: OffsetRange::new(first.start, last.end()),
            text: words.iter().map(|w| w.text).collect::<Vec<_>>().join(" "),
        });
    }
}

/// Pack a block's words into passages no longer than `max` chars.
fn pack(words: Vec<Word<'_>>, max: usize, out: &mut Vec<Segment>) {
    let mut current: Vec<Word<'_>> = Vec::new();
    let mut len = 0;

    for word in words {
        let wlen = word.chars();
        let needed = if current.is_empty() { wlen } else { len + 1 + wlen };
        if needed <= max {
            current.push(word);
            len = needed;
            continue;
        }

        // Current passage is full: cut at the last sentence end if it keeps
        // at least half the cap, otherwise cut everything.
        let mut carry = Vec::new();
        if !current.is_empty() {
            let mut cut = current.len();
            let mut prefix_len = 0;
            let mut best: Option<usize> = None;
            for (i, w) in current.iter().enumerate() {
                prefix_len += if i == 0 { w.chars() } else { 1 + w.chars() };
                if w.ends_sentence() && prefix_len * 2 >= max {
                    best = Some(i + 1);
                }
            }
            if let Some(b) = best {
                cut = b;
            }
            carry = current.split_off(cut);
            emit(&current, out);
        }

        current = carry;
        len = joined_len(&current);

        if wlen > max {
            emit(&current, out);
            current.clear();
            let mut pieces = split_long_word(word, max);
            let tail = pieces.pop();
            for piece in pieces {
                emit(&[piece], out);
            }
            if let Some(tail) = tail {
                len = tail.chars();
                current.push(tail);
            }
        } else {
            let needed = if current.is_empty() { wlen } else { len + 1 + wlen };
            if needed > max {
                emit(&current, out);
                current.clear();
                len = wlen;
            } else {
                len = needed;
            }
            current.push(word);
        }
    }
    emit(&current, out);
}

fn joined_len(words: &[Word<'_>]) -> usize {
    if words.is_empty() {
        return 0;
    }
    words.iter().map(|w| w.chars()).sum::<usize>() + words.len() - 1
}

/// Segment decoded text into passages, in document order.
///
/// Returns an empty vector when the text has no words.
pub fn segment(text: &str, policy: &SegmentationPolicy) -> Vec<Segment> {
    let max = policy.max_passage_chars.max(1);
    let mut out = Vec::new();
    for (start, end) in blocks(text) {
        let words = words_in(text, start, end);
        if !words.is_empty() {
            pack(words, max, &mut out);
        }
    }
    out
}
