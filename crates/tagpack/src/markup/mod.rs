//! Markup text engine and the per-document processing driver.

pub mod attributes;
pub mod document;
pub mod element;
pub mod exclusion;
pub mod minify;
pub mod polyfill;
pub mod splicer;

use anyhow::{Context, Result};

use crate::app::bundler::Bundler;
use crate::app::grouping::bundle_family;
use crate::app::tree::{NodeId, ROOT};
use crate::domain::model::AssetFamily;
use crate::infra::globs::OverrideSet;

use self::document::{Document, Stage};
use self::minify::minify_markup;
use self::polyfill::insert_polyfill;

/// Run one markup file through every stage and store the result as the file's output content.
pub fn process_markup(bundler: &mut Bundler, file: NodeId, overrides: &OverrideSet) -> Result<()> {
    let path = bundler.tree.relative_path(file);
    tracing::info!(path = %path, "processing markup");

    let options = overrides.resolve(&bundler.options, &path);
    let dir = bundler.tree.parent(file).unwrap_or(ROOT);
    let embedded_language = bundler.tree.file(file)?.is_php();
    let raw = bundler
        .tree
        .read_text(file)
        .with_context(|| format!("failed to read {path}"))?
        .to_string();
    let mut document = Document::new(path.clone(), file, dir, raw, embedded_language, options);

    bundle_family(bundler, &mut document, AssetFamily::Style)
        .with_context(|| format!("failed to bundle stylesheets of {path}"))?;
    document.advance(Stage::StyleElementsBundled)?;

    bundle_family(bundler, &mut document, AssetFamily::Script)
        .with_context(|| format!("failed to bundle scripts of {path}"))?;
    document.advance(Stage::ScriptElementsBundled)?;

    if document.options.insert_polyfill {
        let url = document.options.polyfill_url.clone();
        if insert_polyfill(&mut document, &url) {
            document.advance(Stage::PolyfillInserted)?;
        }
    }

    if document.options.minify_markup {
        let minified = minify_markup(document.text(), document.exclusions());
        document.set_text(minified);
        document.advance(Stage::Minified)?;
    }

    let output = document.finalize()?;
    bundler.tree.set_content(file, output)?;
    Ok(())
}
