//! Exclusion ranges: spans of markup that element scanning treats as inert.

use once_cell::sync::Lazy;
use regex::Regex;

static PHP_BLOCK_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\?(?:php|=)").unwrap());
static PHP_BLOCK_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?>").unwrap());
static COMMENT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"<!--").unwrap());
static COMMENT_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"-->").unwrap());

/// What kind of region an [`ExclusionRange`] covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionKind {
    /// An HTML comment.
    Comment,
    /// An embedded-language block such as `<?php ... ?>`.
    Embedded,
}

/// Half-open `[start, end)` byte span into a document's working text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionRange {
    pub start: usize,
    pub end: usize,
    pub kind: ExclusionKind,
}

impl ExclusionRange {
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

/// The exclusion ranges of one text snapshot.
///
/// Offsets are only valid for the exact text they were computed from. Any edit to the text
/// invalidates every range, so callers recompute instead of patching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionRanges {
    ranges: Vec<ExclusionRange>,
}

impl ExclusionRanges {
    /// Scan `text` for embedded-language blocks (when `embedded_language` is set) and comments.
    ///
    /// Unterminated blocks extend to the end of the text. Ranges are not guaranteed to be sorted.
    pub fn compute(text: &str, embedded_language: bool) -> Self {
        let mut ranges = Self::default();
        if embedded_language {
            ranges.collect(
                text,
                &PHP_BLOCK_START,
                &PHP_BLOCK_END,
                ExclusionKind::Embedded,
            );
        }
        ranges.collect(text, &COMMENT_START, &COMMENT_END, ExclusionKind::Comment);
        ranges
    }

    fn collect(&mut self, text: &str, start: &Regex, end: &Regex, kind: ExclusionKind) {
        let mut cursor = 0;
        while let Some(found) = start.find_at(text, cursor) {
            if self.is_excluded(found.start()) {
                cursor = found.end();
                continue;
            }

            let stop = end
                .find_at(text, found.end())
                .map_or(text.len(), |closing| closing.end());
            self.ranges.push(ExclusionRange {
                start: found.start(),
                end: stop,
                kind,
            });
            cursor = stop;
        }
    }

    pub fn is_excluded(&self, index: usize) -> bool {
        self.ranges.iter().any(|range| range.contains(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExclusionRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
