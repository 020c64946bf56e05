//! Polyfill script insertion.

use crate::domain::model::InsertPosition;
use crate::markup::attributes::AttributeList;
use crate::markup::document::Document;
use crate::markup::element::{Tag, create_element_string, scan_elements};
use crate::markup::splicer::StringSplicer;

/// Insert a `<script src="{url}">` at the start of the head when the document runs any script.
///
/// Returns whether the document changed.
pub fn insert_polyfill(document: &mut Document, url: &str) -> bool {
    let scripts = scan_elements(document.text(), document.exclusions(), Tag::Script);
    if url.trim().is_empty() || scripts.is_empty() {
        return false;
    }
    let Some(anchor) = InsertPosition::StartOfHead.anchor() else {
        return false;
    };

    let mut attributes = AttributeList::new();
    attributes.set("src", Some(url.to_string()));
    let element = create_element_string(Tag::Script, &attributes, Some(""));

    let mut splicer = StringSplicer::new(document.text());
    splicer.add_insert(document.index_for_anchor(anchor), element);
    document.set_text(splicer.execute());
    true
}
