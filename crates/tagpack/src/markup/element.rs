//! Regex-driven element scanning over raw markup.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::markup::attributes::AttributeList;
use crate::markup::exclusion::ExclusionRanges;

/// Opening-tag attribute run that tolerates `>` inside quoted values.
pub(crate) const TAG_ATTRIBUTES: &str = r#"(?:\s(?:"[^"]*"|'[^']*'|[^'">])*)?"#;

static SCRIPT_PATTERN: Lazy<Regex> = Lazy::new(|| Tag::Script.build_pattern());
static STYLE_PATTERN: Lazy<Regex> = Lazy::new(|| Tag::Style.build_pattern());
static LINK_PATTERN: Lazy<Regex> = Lazy::new(|| Tag::Link.build_pattern());

/// Tags the scanner knows how to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Script,
    Style,
    Link,
}

impl Tag {
    pub fn name(&self) -> &'static str {
        match self {
            Tag::Script => "script",
            Tag::Style => "style",
            Tag::Link => "link",
        }
    }

    /// Whether the element has a body terminated by a closing tag.
    pub fn has_closing_tag(&self) -> bool {
        !matches!(self, Tag::Link)
    }

    fn build_pattern(&self) -> Regex {
        let name = self.name();
        let mut pattern = format!(r"(?i)(<{name}{TAG_ATTRIBUTES}>)");
        if self.has_closing_tag() {
            pattern.push_str(&format!(r"([\s\S]*?)</{name}\s*>"));
        }
        Regex::new(&pattern).unwrap()
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            Tag::Script => &SCRIPT_PATTERN,
            Tag::Style => &STYLE_PATTERN,
            Tag::Link => &LINK_PATTERN,
        }
    }
}

/// One scanned element: its position, raw text and parsed attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: Tag,
    /// Byte offset of the `<` that opens the element.
    pub index: usize,
    /// The full matched text, opening tag through closing tag.
    pub matched: String,
    pub opening_tag: String,
    pub body: String,
    pub attributes: AttributeList,
}

impl Element {
    /// Byte offset one past the element's last byte.
    pub fn end(&self) -> usize {
        self.index + self.matched.len()
    }

    pub fn span(&self) -> Range<usize> {
        self.index..self.end()
    }

    /// The range to cut to remove this element from `text`.
    ///
    /// With `cut_line_if_empty`, an element alone on an otherwise whitespace-only line takes the
    /// whole line with it.
    pub fn cut_bounds(&self, text: &str, cut_line_if_empty: bool) -> Range<usize> {
        let (start, end) = (self.index, self.end());
        if !cut_line_if_empty {
            return start..end;
        }

        let before = linebreak_before(text, start);
        let after = linebreak_after(text, end);
        if !(before.empty && after.empty) {
            return start..end;
        }

        match before.newline {
            Some(newline) => newline..after.newline.unwrap_or(text.len()),
            // First line: take the trailing newline instead of a leading one.
            None => 0..after.newline.map_or(text.len(), |newline| newline + 1),
        }
    }
}

/// Find every `tag` element in `text` that does not start inside an exclusion range.
///
/// Results are in ascending source order.
pub fn scan_elements(text: &str, exclusions: &ExclusionRanges, tag: Tag) -> Vec<Element> {
    tag.pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let matched = caps.get(0)?;
            if exclusions.is_excluded(matched.start()) {
                return None;
            }
            let opening_tag = caps.get(1)?.as_str().to_string();
            let body = caps
                .get(2)
                .map_or_else(String::new, |m| m.as_str().to_string());
            Some(Element {
                tag,
                index: matched.start(),
                matched: matched.as_str().to_string(),
                attributes: AttributeList::parse(&opening_tag),
                opening_tag,
                body,
            })
        })
        .collect()
}

/// Serialize an element from its parts.
pub fn create_element_string(tag: Tag, attributes: &AttributeList, body: Option<&str>) -> String {
    let name = tag.name();
    let mut out = format!("<{name}{attributes}>");
    if tag.has_closing_tag() {
        if let Some(body) = body {
            out.push_str(body);
        }
        out.push_str(&format!("</{name}>"));
    }
    out
}

pub(crate) fn is_markup_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\n' | '\t' | '\r')
}

#[derive(Debug, Clone, Copy)]
struct Linebreak {
    /// Only whitespace between the newline (or text edge) and the given index.
    empty: bool,
    newline: Option<usize>,
}

fn linebreak_before(text: &str, index: usize) -> Linebreak {
    let mut empty = true;
    for (at, c) in text[..index].char_indices().rev() {
        if c == '\n' {
            return Linebreak {
                empty,
                newline: Some(at),
            };
        }
        if !is_markup_whitespace(c) {
            empty = false;
        }
    }
    Linebreak {
        empty,
        newline: None,
    }
}

fn linebreak_after(text: &str, index: usize) -> Linebreak {
    let mut empty = true;
    for (offset, c) in text[index..].char_indices() {
        if c == '\n' {
            return Linebreak {
                empty,
                newline: Some(index + offset),
            };
        }
        if !is_markup_whitespace(c) {
            empty = false;
        }
    }
    Linebreak {
        empty,
        newline: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str, tag: Tag) -> Vec<Element> {
        scan_elements(text, &ExclusionRanges::compute(text, false), tag)
    }

    #[test]
    fn scans_scripts_with_bodies_in_order() {
        let text = "<script src=\"a.js\"></script>\n<SCRIPT>let x = 1;</SCRIPT >";
        let elements = scan(text, Tag::Script);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].attributes.get("src"), Some("a.js"));
        assert_eq!(elements[0].body, "");
        assert_eq!(elements[1].body, "let x = 1;");
        assert_eq!(elements[1].index, 29);
        assert_eq!(elements[1].end(), text.len());
    }

    #[test]
    fn skips_elements_inside_comments() {
        let text =
            "<!-- <link rel=\"stylesheet\" href=\"x.css\"> --><link rel=\"stylesheet\" href=\"y.css\">";
        let elements = scan(text, Tag::Link);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].attributes.get("href"), Some("y.css"));
    }

    #[test]
    fn does_not_confuse_similar_tag_names() {
        let text = "<linkage></linkage><styles></styles><style>a{}</style>";
        assert!(scan(text, Tag::Link).is_empty());
        assert_eq!(scan(text, Tag::Style).len(), 1);
    }

    #[test]
    fn quoted_greater_than_stays_in_opening_tag() {
        let text = r#"<script data-cond="a > b" src="a.js"></script>"#;
        let elements = scan(text, Tag::Script);
        assert_eq!(elements[0].attributes.get("src"), Some("a.js"));
        assert_eq!(elements[0].attributes.get("data-cond"), Some("a > b"));
    }

    #[test]
    fn cut_bounds_take_empty_lines() {
        let text = "<head>\n    <script src=\"a.js\"></script>\n</head>";
        let element = &scan(text, Tag::Script)[0];
        let bounds = element.cut_bounds(text, true);
        let mut edited = text.to_string();
        edited.replace_range(bounds, "");
        assert_eq!(edited, "<head>\n</head>");
    }

    #[test]
    fn cut_bounds_keep_shared_lines() {
        let text = "<p>hi</p><script src=\"a.js\"></script>\n";
        let element = &scan(text, Tag::Script)[0];
        assert_eq!(element.cut_bounds(text, true), element.span());
    }

    #[test]
    fn cut_bounds_on_first_line_take_trailing_newline() {
        let text = "  <script></script>  \n<p>";
        let element = &scan(text, Tag::Script)[0];
        let mut edited = text.to_string();
        edited.replace_range(element.cut_bounds(text, true), "");
        assert_eq!(edited, "<p>");
    }

    #[test]
    fn serializes_elements() {
        let attributes = AttributeList::parse("<script src=\"x.js\" defer>");
        assert_eq!(
            create_element_string(Tag::Script, &attributes, None),
            "<script src=\"x.js\" defer></script>"
        );
        assert_eq!(
            create_element_string(
                Tag::Link,
                &AttributeList::parse("<link rel=stylesheet>"),
                None
            ),
            "<link rel=\"stylesheet\">"
        );
        assert_eq!(
            create_element_string(Tag::Style, &AttributeList::new(), Some("a{}")),
            "<style>a{}</style>"
        );
    }
}
