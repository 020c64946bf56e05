//! Ordered attribute lists parsed from an element's opening tag.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s([\w\-:.@]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

/// Name → value mapping preserving source order.
///
/// A `None` value is a flag attribute present without a value (`defer`, `async`). Names are kept
/// exactly as written; lookups compare names exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    entries: Vec<(String, Option<String>)>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the attributes of an opening tag such as `<script src="a.js" defer>`.
    pub fn parse(opening_tag: &str) -> Self {
        let mut list = Self::new();
        let inner = opening_tag
            .strip_prefix('<')
            .unwrap_or(opening_tag)
            .trim_end_matches('>')
            .trim_end_matches('/');
        // Skip the tag name so it is never read as an attribute.
        let body = inner
            .find(|c: char| c.is_whitespace())
            .map_or("", |at| &inner[at..]);

        for caps in ATTRIBUTE.captures_iter(body) {
            let name = caps[1].to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string());
            list.set(name, value);
        }
        list
    }

    /// Set an attribute, replacing an existing value in place or appending a new entry.
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| key != name);
        self.entries.len() != before
    }

    /// Whether the attribute is present, with or without a value.
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    /// Whether the attribute is present with exactly `value`.
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get(name) == Some(value)
    }

    /// The attribute's value; `None` when absent or when present as a bare flag.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }
}

impl fmt::Display for AttributeList {
    /// Serializes as ` name="value"` pairs, each with a leading space.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            match value {
                None => write!(f, " {name}")?,
                Some(value) if value.contains('"') => write!(f, " {name}='{value}'")?,
                Some(value) => write!(f, " {name}=\"{value}\"")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_unquoted_and_flag_attributes() {
        let list = AttributeList::parse(r#"<script src="js/a.js" type='module' data-x=1 defer>"#);
        assert_eq!(list.get("src"), Some("js/a.js"));
        assert_eq!(list.get("type"), Some("module"));
        assert_eq!(list.get("data-x"), Some("1"));
        assert!(list.has("defer"));
        assert_eq!(list.get("defer"), None);
        assert!(!list.has("script"));
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn parses_across_newlines_and_self_closing_tags() {
        let list = AttributeList::parse("<link\n  rel=\"stylesheet\"\n  href=\"a.css\" />");
        assert!(list.has_value("rel", "stylesheet"));
        assert_eq!(list.get("href"), Some("a.css"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn names_are_case_sensitive() {
        let list = AttributeList::parse("<script SRC=\"a.js\">");
        assert!(list.has("SRC"));
        assert!(!list.has("src"));
    }

    #[test]
    fn set_replaces_in_place_and_serializes_in_order() {
        let mut list = AttributeList::parse("<link rel=\"stylesheet\" href=\"a.css\" media=all>");
        list.set("href", Some("b.css".into()));
        assert!(list.remove("media"));
        assert!(!list.remove("media"));
        list.set("crossorigin", None);
        assert_eq!(
            list.to_string(),
            " rel=\"stylesheet\" href=\"b.css\" crossorigin"
        );
    }

    #[test]
    fn values_with_double_quotes_serialize_single_quoted() {
        let list = AttributeList::parse(r#"<script data-json='{"a":1}'>"#);
        assert_eq!(list.to_string(), r#" data-json='{"a":1}'"#);
    }

    #[test]
    fn clone_is_independent() {
        let original = AttributeList::parse("<script src=\"a.js\">");
        let mut copy = original.clone();
        copy.set("src", Some("b.js".into()));
        assert_eq!(original.get("src"), Some("a.js"));
        assert_eq!(copy.get("src"), Some("b.js"));
    }
}
