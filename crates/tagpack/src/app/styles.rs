//! Stylesheet elements: `<link rel="stylesheet">` and `<style>`.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::app::bundler::{BundleRequest, Bundler, Placement};
use crate::app::grouping::{
    AssetElement, AssetSource, Classified, FamilySettings, Group, GroupKind, is_absolute_url,
};
use crate::app::tree::FileTree;
use crate::domain::errors::BundleError;
use crate::domain::model::AssetFamily;
use crate::infra::transform::{process_style, sanitize_inline};
use crate::markup::attributes::AttributeList;
use crate::markup::document::Document;
use crate::markup::element::{Element, Tag, create_element_string, scan_elements};

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^'"\s)][^)\s]*))\s*\)"#).unwrap()
});
static CSS_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Every `<link>` and `<style>` element, in source order.
pub fn scan(document: &Document) -> Vec<Element> {
    let mut elements = scan_elements(document.text(), document.exclusions(), Tag::Link);
    elements.extend(scan_elements(
        document.text(),
        document.exclusions(),
        Tag::Style,
    ));
    elements.sort_by_key(|element| element.index);
    elements
}

/// Decide whether a stylesheet element takes part in bundling.
///
/// Only plain stylesheets for every medium are merged; alternate sheets, non-CSS styles and
/// media-restricted sheets are left alone.
pub fn classify(
    tree: &FileTree,
    document: &Document,
    element: Element,
    settings: &FamilySettings,
) -> Classified {
    let attributes = &element.attributes;
    let all_media = attributes
        .get("media")
        .map(str::trim)
        .is_none_or(|media| media.is_empty() || media.eq_ignore_ascii_case("all"));

    let (eligible, reference) = match element.tag {
        Tag::Link => {
            let rel = attributes
                .get("rel")
                .unwrap_or_default()
                .to_ascii_lowercase();
            let mut tokens = rel.split_whitespace();
            let stylesheet = tokens.clone().any(|token| token == "stylesheet")
                && !tokens.any(|token| token == "alternate");
            let href = attributes
                .get("href")
                .filter(|href| !href.trim().is_empty());
            (stylesheet && href.is_some(), href)
        }
        _ => {
            let css = attributes.get("type").is_none_or(|kind| {
                kind.trim().is_empty() || kind.trim().eq_ignore_ascii_case("text/css")
            });
            (css, None)
        }
    };

    let source = AssetSource::resolve(tree, document.dir, reference);
    if !(eligible && all_media) {
        return Classified::Untouched(match source {
            AssetSource::Local(file) => Some(file),
            _ => None,
        });
    }

    match source {
        AssetSource::Inline if !settings.handle_inline => Classified::Untouched(None),
        AssetSource::Missing(url) => Classified::Missing { element, url },
        source => Classified::Asset(AssetElement {
            element,
            source,
            deferred: false,
            is_async: false,
            module: false,
        }),
    }
}

/// Turn one group into the markup that replaces it.
pub fn materialize(
    bundler: &mut Bundler,
    document: &Document,
    assets: &[AssetElement],
    group: &Group,
    settings: &FamilySettings,
) -> Result<String> {
    if group.kind == GroupKind::Standalone {
        let element = group
            .members
            .first()
            .map(|index| &assets[*index].element)
            .ok_or_else(|| BundleError::Invariant("empty stylesheet group".into()))?;
        return Ok(match element.tag {
            Tag::Link => create_element_string(Tag::Link, &element.attributes, None),
            _ => element.matched.clone(),
        });
    }

    // Relative URLs must keep working from wherever the merged sheet ends up.
    let target_dir = if settings.inject {
        bundler.tree.relative_path(document.dir)
    } else {
        bundler
            .options
            .bundle_directory
            .trim_matches('/')
            .to_string()
    };
    let document_dir = bundler.tree.relative_path(document.dir);

    let mut parts = Vec::with_capacity(group.members.len());
    let mut sources = Vec::new();
    for asset in group.members.iter().map(|index| &assets[*index]) {
        match &asset.source {
            AssetSource::Inline => {
                parts.push(rebase_urls(&asset.element.body, &document_dir, &target_dir));
            }
            AssetSource::Local(file) => {
                let from = bundler
                    .tree
                    .parent(*file)
                    .map(|dir| bundler.tree.relative_path(dir))
                    .unwrap_or_default();
                let code = bundler.tree.read_text(*file)?;
                parts.push(rebase_urls(code, &from, &target_dir));
                sources.push(*file);
            }
            other => {
                return Err(BundleError::Invariant(format!(
                    "stylesheet source {other:?} cannot be merged"
                ))
                .into());
            }
        }
    }
    let code = parts.join("\n\n");
    if code.trim().is_empty() {
        return Ok(String::new());
    }

    let snapshot = document
        .options
        .snapshot(AssetFamily::Style, settings.inject && settings.sanitize);
    let code = process_style(bundler.transformer(), &code, &snapshot)
        .with_context(|| format!("failed to transform stylesheets of {}", document.path))?;

    let placement = if settings.inject {
        Placement::Virtual
    } else {
        Placement::BundleDirectory
    };
    let id = bundler.create_or_reuse_bundle(BundleRequest {
        family: AssetFamily::Style,
        sources: sources.clone(),
        code,
        snapshot,
        placement,
    })?;
    bundler.add_membership(id, &sources)?;

    let bundle = bundler.bundle(id)?;
    if settings.inject {
        let body = if settings.sanitize {
            sanitize_inline(AssetFamily::Style, &bundle.code)
        } else {
            bundle.code.clone()
        };
        return Ok(create_element_string(
            Tag::Style,
            &AttributeList::new(),
            Some(&body),
        ));
    }

    let node = bundle
        .node()
        .ok_or_else(|| BundleError::Invariant(format!("bundle {} has no file", bundle.name)))?;
    let mut attributes = AttributeList::new();
    attributes.set("rel", Some("stylesheet".to_string()));
    attributes.set("href", Some(bundler.tree.path_between(document.file, node)));
    Ok(create_element_string(Tag::Link, &attributes, None))
}

/// Rewrite relative `url()` and `@import` references in `css` written for directory `from` so
/// they resolve from directory `to`. Both are source-root relative.
pub fn rebase_urls(css: &str, from: &str, to: &str) -> String {
    if from == to {
        return css.to_string();
    }

    let css = CSS_URL.replace_all(css, |caps: &Captures| {
        let (quote, url) = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(url), _, _) => ("\"", url.as_str()),
            (_, Some(url), _) => ("'", url.as_str()),
            (_, _, Some(url)) => ("", url.as_str()),
            _ => return caps[0].to_string(),
        };
        match rebase_reference(url, from, to) {
            Some(rebased) => format!("url({quote}{rebased}{quote})"),
            None => caps[0].to_string(),
        }
    });
    CSS_IMPORT
        .replace_all(&css, |caps: &Captures| {
            let (quote, url) = match caps.get(1) {
                Some(url) => ("\"", url.as_str()),
                None => ("'", caps.get(2).map_or("", |m| m.as_str())),
            };
            match rebase_reference(url, from, to) {
                Some(rebased) => format!("@import {quote}{rebased}{quote}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn rebase_reference(url: &str, from: &str, to: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() || url.starts_with(['#', '/']) || is_absolute_url(url) {
        return None;
    }

    let split = url.find(['?', '#']).unwrap_or(url.len());
    let (path, suffix) = url.split_at(split);

    let mut target: Vec<&str> = from.split('/').filter(|part| !part.is_empty()).collect();
    for step in path.split('/') {
        match step {
            "" | "." => {}
            ".." => {
                target.pop()?;
            }
            name => target.push(name),
        }
    }

    let base: Vec<&str> = to.split('/').filter(|part| !part.is_empty()).collect();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts = vec![".."; base.len() - common];
    parts.extend(&target[common..]);
    Some(format!("{}{suffix}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::app::tree::TreeFilters;
    use crate::infra::config::Options;

    #[test]
    fn rebases_relative_urls_only() {
        let css = "a{background:url(../img/a.png)}b{background:url( \"../img/b.png?v=1\" )}\
                   c{background:url('data:image/png;base64,xx')}d{background:url(/abs.png)}\
                   @import '../base.css';";
        assert_eq!(
            rebase_urls(css, "css", "bundles"),
            "a{background:url(../img/a.png)}b{background:url(\"../img/b.png?v=1\")}\
             c{background:url('data:image/png;base64,xx')}d{background:url(/abs.png)}\
             @import '../base.css';"
        );
        assert_eq!(
            rebase_urls("a{background:url(img/a.png)}", "css", ""),
            "a{background:url(css/img/a.png)}"
        );
        assert_eq!(
            rebase_urls("a{background:url(../../a.png)}", "css", "bundles"),
            "a{background:url(../../a.png)}"
        );
        assert_eq!(
            rebase_urls("@import \"theme/dark.css\";", "pages/css", "bundles"),
            "@import \"../pages/css/theme/dark.css\";"
        );
    }

    fn classify_all(markup: &str) -> Result<Vec<Classified>> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("a.css"), "a{}")?;
        let tree = FileTree::scan(temp.path(), TreeFilters::default())?;
        let options = Options::default();
        let document = Document::new("index.html", 1, 0, markup.to_string(), false, options);
        let settings = FamilySettings::new(&document.options, AssetFamily::Style);
        Ok(scan(&document)
            .into_iter()
            .map(|element| classify(&tree, &document, element, &settings))
            .collect())
    }

    #[test]
    fn classifies_stylesheets() -> Result<()> {
        let classified = classify_all(
            "<style>a{}</style>\
             <link rel=\"stylesheet\" href=\"a.css\">\
             <link rel=\"icon\" href=\"a.css\">\
             <link rel=\"alternate stylesheet\" href=\"a.css\">\
             <link rel=\"stylesheet\" href=\"a.css\" media=\"print\">\
             <link rel=\"stylesheet\" href=\"https://cdn/x.css\">\
             <link rel=\"stylesheet\" href=\"missing.css\">\
             <style type=\"text/less\">a{}</style>",
        )?;
        let shape: Vec<&str> = classified
            .iter()
            .map(|c| match c {
                Classified::Asset(asset) => match asset.source {
                    AssetSource::Inline => "inline",
                    AssetSource::Local(_) => "local",
                    AssetSource::Absolute(_) => "absolute",
                    AssetSource::Missing(_) => "missing-asset",
                },
                Classified::Missing { .. } => "missing",
                Classified::Untouched(Some(_)) => "untouched-local",
                Classified::Untouched(None) => "untouched",
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                "inline",
                "local",
                "untouched-local",
                "untouched-local",
                "untouched-local",
                "absolute",
                "missing",
                "untouched",
            ]
        );
        Ok(())
    }
}
