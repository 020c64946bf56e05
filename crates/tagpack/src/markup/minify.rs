//! Whitespace and comment minification of finished markup.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::markup::element::{TAG_ATTRIBUTES, is_markup_whitespace};
use crate::markup::exclusion::{ExclusionKind, ExclusionRanges};

/// Elements whose bodies are copied byte for byte.
static VERBATIM_ELEMENTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["pre", "textarea", "script", "style"]
        .iter()
        .map(|name| {
            Regex::new(&format!(
                r#"(?i)<{name}(?:\s(?:"[^"]*"|'[^']*'|[^'">])*)?>[\s\S]*?</{name}\s*>"#
            ))
            .unwrap()
        })
        .collect()
});

/// Any opening tag; attribute values are copied as written.
static OPENING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"<[A-Za-z][\w:.\-]*{TAG_ATTRIBUTES}>")).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Keep,
    Drop,
}

/// Drop comments (conditional comments excepted) and collapse whitespace runs.
///
/// A run containing a newline becomes one newline, any other run one space. Embedded-language
/// blocks, opening tags and the bodies of `pre`, `textarea`, `script` and `style` are untouched.
pub fn minify_markup(text: &str, exclusions: &ExclusionRanges) -> String {
    let mut spans: Vec<(usize, usize, Span)> = exclusions
        .iter()
        .filter(|range| range.kind == ExclusionKind::Embedded)
        .map(|range| (range.start, range.end, Span::Keep))
        .collect();
    for pattern in VERBATIM_ELEMENTS.iter().chain(Some(&*OPENING_TAG)) {
        spans.extend(
            pattern
                .find_iter(text)
                .filter(|found| !exclusions.is_excluded(found.start()))
                .map(|found| (found.start(), found.end(), Span::Keep)),
        );
    }
    let protected = spans.clone();
    spans.extend(
        exclusions
            .iter()
            .filter(|range| range.kind == ExclusionKind::Comment)
            .filter(|range| {
                !protected
                    .iter()
                    .any(|(start, end, _)| range.start >= *start && range.start < *end)
            })
            .map(|range| {
                let conditional = text[range.start..].starts_with("<!--[if")
                    || text[range.start..].starts_with("<!--<![endif]");
                let span = if conditional { Span::Keep } else { Span::Drop };
                (range.start, range.end, span)
            }),
    );
    spans.sort_by_key(|(start, end, _)| (*start, std::cmp::Reverse(*end)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut pending = spans.into_iter().peekable();
    while cursor < text.len() {
        while pending.next_if(|(start, _, _)| *start < cursor).is_some() {}
        if let Some((start, end, span)) = pending.next_if(|(start, _, _)| *start == cursor) {
            if span == Span::Keep {
                out.push_str(&text[start..end]);
            }
            cursor = end;
            continue;
        }

        let next_span = pending.peek().map_or(text.len(), |(start, _, _)| *start);
        let chunk = &text[cursor..next_span];
        collapse_whitespace(chunk, &mut out);
        cursor = next_span;
    }
    out
}

fn collapse_whitespace(chunk: &str, out: &mut String) {
    let mut run: Option<bool> = None;
    for c in chunk.chars() {
        if is_markup_whitespace(c) {
            let newline = run.unwrap_or(false) || c == '\n';
            run = Some(newline);
            continue;
        }
        if let Some(newline) = run.take() {
            out.push(if newline { '\n' } else { ' ' });
        }
        out.push(c);
    }
    if let Some(newline) = run {
        out.push(if newline { '\n' } else { ' ' });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minify(text: &str, php: bool) -> String {
        minify_markup(text, &ExclusionRanges::compute(text, php))
    }

    #[test]
    fn collapses_whitespace_and_drops_comments() {
        let text = "<html>\n\n  <body>   <!-- gone -->\n\t<p>a   b</p>\n</body>\n</html>\n";
        assert_eq!(minify(text, false), "<html>\n<body> \n<p>a b</p>\n</body>\n</html>\n");
    }

    #[test]
    fn keeps_verbatim_regions() {
        let text = concat!(
            "<pre>  a\n\n  b</pre>  <script>\n  if (a  <!-- b) {}\n</script>  ",
            "<!--[if IE]>x<![endif]-->",
        );
        assert_eq!(
            minify(text, false),
            concat!(
                "<pre>  a\n\n  b</pre> <script>\n  if (a  <!-- b) {}\n</script> ",
                "<!--[if IE]>x<![endif]-->",
            )
        );
    }

    #[test]
    fn attribute_values_keep_their_whitespace() {
        let text = "<input value=\"a   b\" title='x\n\n  y'>";
        assert_eq!(minify(text, false), text);

        let text = "<div\n  data-json='{\"a\":  1}'>\n\n  <p title=\"  t  \">  x  </p></div>";
        assert_eq!(
            minify(text, false),
            "<div\n  data-json='{\"a\":  1}'>\n<p title=\"  t  \"> x </p></div>"
        );
    }

    #[test]
    fn leaves_php_blocks_alone() {
        let text = "<p>\n\n<?php  echo  \"<!-- x -->\";  ?>\n\n</p>";
        assert_eq!(minify(text, true), "<p>\n<?php  echo  \"<!-- x -->\";  ?>\n</p>");
    }
}
