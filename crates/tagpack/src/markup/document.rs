//! A markup document being rewritten during one processing pass.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::app::tree::NodeId;
use crate::domain::errors::BundleError;
use crate::domain::model::{AnchorEdge, AnchorElement, InsertAnchor};
use crate::infra::config::Options;
use crate::markup::element::{TAG_ATTRIBUTES, is_markup_whitespace};
use crate::markup::exclusion::{ExclusionRange, ExclusionRanges};

static CRLF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n").unwrap());
static HEAD_OPEN: Lazy<Regex> = Lazy::new(|| opening_tag("head"));
static HEAD_CLOSE: Lazy<Regex> = Lazy::new(|| closing_tag("head"));
static BODY_OPEN: Lazy<Regex> = Lazy::new(|| opening_tag("body"));
static BODY_CLOSE: Lazy<Regex> = Lazy::new(|| closing_tag("body"));
static HTML_OPEN: Lazy<Regex> = Lazy::new(|| opening_tag("html"));
static HTML_CLOSE: Lazy<Regex> = Lazy::new(|| closing_tag("html"));

fn opening_tag(name: &str) -> Regex {
    Regex::new(&format!(r"(?i)<{name}{TAG_ATTRIBUTES}>")).unwrap()
}

fn closing_tag(name: &str) -> Regex {
    Regex::new(&format!(r"(?i)</{name}\s*>")).unwrap()
}

/// Processing stages of a document, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Loaded,
    ExclusionComputed,
    StyleElementsBundled,
    ScriptElementsBundled,
    PolyfillInserted,
    Minified,
    Finalized,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Loaded => "loaded",
            Stage::ExclusionComputed => "exclusion-computed",
            Stage::StyleElementsBundled => "style-elements-bundled",
            Stage::ScriptElementsBundled => "script-elements-bundled",
            Stage::PolyfillInserted => "polyfill-inserted",
            Stage::Minified => "minified",
            Stage::Finalized => "finalized",
        }
    }
}

/// Working state for one markup file.
#[derive(Debug)]
pub struct Document {
    /// Source-root relative path, `/`-separated.
    pub path: String,
    pub file: NodeId,
    /// Directory the document's relative references resolve from.
    pub dir: NodeId,
    /// Options after this document's overrides were applied.
    pub options: Options,
    text: String,
    embedded_language: bool,
    exclusions: ExclusionRanges,
    stage: Stage,
}

impl Document {
    /// Create a document from raw markup. CRLF line endings are normalized to LF.
    pub fn new(
        path: impl Into<String>,
        file: NodeId,
        dir: NodeId,
        raw_text: String,
        embedded_language: bool,
        options: Options,
    ) -> Self {
        let text = CRLF.replace_all(&raw_text, "\n").into_owned();
        let mut document = Self {
            path: path.into(),
            file,
            dir,
            options,
            text,
            embedded_language,
            exclusions: ExclusionRanges::default(),
            stage: Stage::Loaded,
        };
        document.update_exclusion_ranges();
        document.stage = Stage::ExclusionComputed;
        document
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the working text. Exclusion ranges are recomputed immediately.
    pub fn set_text(&mut self, text: String) {
        self.text = text;
        self.update_exclusion_ranges();
    }

    pub fn exclusions(&self) -> &ExclusionRanges {
        &self.exclusions
    }

    pub fn update_exclusion_ranges(&mut self) {
        self.exclusions = ExclusionRanges::compute(&self.text, self.embedded_language);
    }

    pub fn is_excluded(&self, index: usize) -> bool {
        self.exclusions.is_excluded(index)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `next`, which must come strictly after the current stage.
    pub fn advance(&mut self, next: Stage) -> Result<(), BundleError> {
        if next <= self.stage {
            return Err(BundleError::StageOrder {
                from: self.stage.as_str(),
                to: next.as_str(),
            });
        }
        tracing::trace!(document = %self.path, stage = next.as_str(), "document stage");
        self.stage = next;
        Ok(())
    }

    /// Commit the working text as the document's output.
    pub fn finalize(mut self) -> Result<String, BundleError> {
        self.advance(Stage::Finalized)?;
        Ok(self.text)
    }

    /// Whether `start..end` holds only whitespace or excluded text.
    pub fn is_empty_in_range(
        &self,
        start: usize,
        end: usize,
        additional: &[ExclusionRange],
    ) -> bool {
        let end = end.min(self.text.len());
        if start >= end {
            return true;
        }
        self.text[start..end].char_indices().all(|(offset, c)| {
            let index = start + offset;
            is_markup_whitespace(c)
                || self.is_excluded(index)
                || additional.iter().any(|range| range.contains(index))
        })
    }

    /// Byte offset for a document-wide anchor, falling back from head/body to the document and
    /// from the document to the file when the tag is absent.
    pub fn index_for_anchor(&self, anchor: InsertAnchor) -> usize {
        let pattern: &Regex = match (anchor.element, anchor.edge) {
            (AnchorElement::Head, AnchorEdge::Start) => &HEAD_OPEN,
            (AnchorElement::Head, AnchorEdge::End) => &HEAD_CLOSE,
            (AnchorElement::Body, AnchorEdge::Start) => &BODY_OPEN,
            (AnchorElement::Body, AnchorEdge::End) => &BODY_CLOSE,
            (AnchorElement::Document, AnchorEdge::Start) => &HTML_OPEN,
            (AnchorElement::Document, AnchorEdge::End) => &HTML_CLOSE,
            (AnchorElement::File, AnchorEdge::Start) => return 0,
            (AnchorElement::File, AnchorEdge::End) => return self.text.len(),
        };
        let found = pattern
            .find_iter(&self.text)
            .find(|found| !self.is_excluded(found.start()))
            .map(|found| match anchor.edge {
                AnchorEdge::Start => found.end(),
                AnchorEdge::End => found.start(),
            });

        match (found, anchor.fallback()) {
            (Some(index), _) => index,
            (None, Some(fallback)) => {
                tracing::warn!(
                    document = %self.path,
                    "{anchor} was not found, inserting at {fallback} instead"
                );
                self.index_for_anchor(fallback)
            }
            (None, None) => self.text.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::InsertPosition;

    fn document(text: &str) -> Document {
        let options = Options::default();
        Document::new("index.html", 1, 0, text.to_string(), false, options)
    }

    fn anchor(position: InsertPosition) -> InsertAnchor {
        position.anchor().expect("anchored position")
    }

    #[test]
    fn normalizes_line_endings_once() {
        let doc = document("<p>\r\n</p>\r\n");
        assert_eq!(doc.text(), "<p>\n</p>\n");
        assert_eq!(doc.stage(), Stage::ExclusionComputed);
    }

    #[test]
    fn resolves_anchors_outside_comments() {
        let doc = document("<html><head><!-- </head> --></head><body class=\"x\"></body></html>");
        assert_eq!(doc.index_for_anchor(anchor(InsertPosition::EndOfHead)), 28);
        assert_eq!(doc.index_for_anchor(anchor(InsertPosition::StartOfBody)), 51);
        assert_eq!(doc.index_for_anchor(anchor(InsertPosition::StartOfHead)), 12);
        assert_eq!(doc.index_for_anchor(anchor(InsertPosition::EndOfFile)), doc.text().len());
    }

    #[test]
    fn header_is_not_head() {
        let doc = document("<header></header><head></head>");
        assert_eq!(doc.index_for_anchor(anchor(InsertPosition::StartOfHead)), 23);
    }

    #[test]
    fn missing_anchors_fall_back() {
        let doc = document("<html><p>x</p></html>");
        assert_eq!(doc.index_for_anchor(anchor(InsertPosition::EndOfBody)), 14);

        let fragment = document("<p>x</p>");
        assert_eq!(fragment.index_for_anchor(anchor(InsertPosition::StartOfHead)), 0);
        assert_eq!(fragment.index_for_anchor(anchor(InsertPosition::EndOfHead)), 8);
    }

    #[test]
    fn empty_range_ignores_whitespace_and_comments() {
        let doc = document("<a>  <!-- c -->\n\t</a>x");
        assert!(doc.is_empty_in_range(3, 17, &[]));
        assert!(!doc.is_empty_in_range(3, 18, &[]));
        let extra = ExclusionRange {
            start: 17,
            end: 21,
            kind: crate::markup::exclusion::ExclusionKind::Comment,
        };
        assert!(doc.is_empty_in_range(3, 21, &[extra]));
    }

    #[test]
    fn stages_only_move_forward() {
        let mut doc = document("<p></p>");
        assert!(doc.advance(Stage::StyleElementsBundled).is_ok());
        assert!(doc.advance(Stage::ExclusionComputed).is_err());
        assert!(doc.advance(Stage::Minified).is_ok());
        assert_eq!(doc.finalize().ok().as_deref(), Some("<p></p>"));
    }
}
