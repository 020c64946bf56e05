//! Script elements: classification and bundle output.

use anyhow::{Context, Result};

use crate::app::bundler::{BundleRequest, Bundler, Placement};
use crate::app::grouping::{AssetElement, AssetSource, Classified, FamilySettings, Group, GroupKind};
use crate::app::tree::{FileTree, NodeId};
use crate::domain::errors::BundleError;
use crate::domain::model::AssetFamily;
use crate::infra::transform::{process_script, sanitize_inline};
use crate::markup::attributes::AttributeList;
use crate::markup::document::Document;
use crate::markup::element::{Element, Tag, create_element_string, scan_elements};

const CLASSIC_TYPES: &[&str] = &["text/javascript", "application/javascript"];

pub fn scan(document: &Document) -> Vec<Element> {
    scan_elements(document.text(), document.exclusions(), Tag::Script)
}

/// Decide whether a `<script>` takes part in bundling.
///
/// Data blocks, templates and `nomodule` fallbacks are left alone, as are inline scripts when
/// inline handling is off.
pub fn classify(
    tree: &FileTree,
    document: &Document,
    element: Element,
    settings: &FamilySettings,
) -> Classified {
    let attributes = &element.attributes;
    let script_type = attributes
        .get("type")
        .map(|kind| kind.trim().to_ascii_lowercase());
    let module = script_type.as_deref() == Some("module");
    let classic = match script_type.as_deref() {
        None | Some("") => true,
        Some(kind) => CLASSIC_TYPES.contains(&kind),
    };

    let source = AssetSource::resolve(tree, document.dir, attributes.get("src"));
    let local = match source {
        AssetSource::Local(file) => Some(file),
        _ => None,
    };
    if !(classic || module) || attributes.has("nomodule") {
        return Classified::Untouched(local);
    }

    let external = source != AssetSource::Inline;
    match source {
        AssetSource::Inline if !settings.handle_inline => Classified::Untouched(None),
        AssetSource::Missing(url) => Classified::Missing { element, url },
        source => Classified::Asset(AssetElement {
            deferred: module || (external && attributes.has("defer")),
            is_async: attributes.has("async") && (external || module),
            module,
            source,
            element,
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
    let first = group
        .members
        .first()
        .map(|index| &assets[*index])
        .ok_or_else(|| BundleError::Invariant("empty script group".into()))?;

    match group.kind {
        GroupKind::Standalone => Ok(create_element_string(
            Tag::Script,
            &first.element.attributes,
            Some(&first.element.body),
        )),
        GroupKind::Module => {
            let graph = match &first.source {
                AssetSource::Local(file) => bundler.resolve_module_file(*file)?,
                AssetSource::Inline if first.element.body.trim().is_empty() => {
                    return Ok(String::new());
                }
                AssetSource::Inline => bundler.resolve_inline_module(
                    &first.element.body,
                    document.dir,
                    &document.path,
                )?,
                _ => {
                    return Err(BundleError::MissingModuleSource {
                        document: document.path.clone(),
                    }
                    .into());
                }
            };
            emit(
                bundler,
                document,
                settings,
                graph.code,
                graph.files,
                !first.is_async,
                first.is_async,
            )
        }
        GroupKind::Merged { deferred, is_async } => {
            let mut parts = Vec::with_capacity(group.members.len());
            let mut sources = Vec::new();
            for asset in group.members.iter().map(|index| &assets[*index]) {
                match &asset.source {
                    AssetSource::Inline => parts.push(asset.element.body.clone()),
                    AssetSource::Local(file) => {
                        parts.push(bundler.tree.read_text(*file)?.to_string());
                        sources.push(*file);
                    }
                    other => {
                        return Err(BundleError::Invariant(format!(
                            "script source {other:?} cannot be merged"
                        ))
                        .into());
                    }
                }
            }
            let code = parts.join("\n\n");
            if code.trim().is_empty() {
                return Ok(String::new());
            }
            emit(
                bundler,
                document,
                settings,
                code,
                sources,
                deferred,
                is_async,
            )
        }
    }
}

/// Transform merged code, register the bundle and build the element referencing it.
fn emit(
    bundler: &mut Bundler,
    document: &Document,
    settings: &FamilySettings,
    code: String,
    sources: Vec<NodeId>,
    deferred: bool,
    is_async: bool,
) -> Result<String> {
    let snapshot = document
        .options
        .snapshot(AssetFamily::Script, settings.inject && settings.sanitize);
    let code = process_script(bundler.transformer(), &code, &snapshot)
        .with_context(|| format!("failed to transform scripts of {}", document.path))?;

    let placement = if settings.inject {
        Placement::Virtual
    } else {
        Placement::BundleDirectory
    };
    let id = bundler.create_or_reuse_bundle(BundleRequest {
        family: AssetFamily::Script,
        sources: sources.clone(),
        code,
        snapshot,
        placement,
    })?;
    bundler.add_membership(id, &sources)?;

    let bundle = bundler.bundle(id)?;
    let mut attributes = AttributeList::new();
    if settings.inject {
        let body = if settings.sanitize {
            sanitize_inline(AssetFamily::Script, &bundle.code)
        } else {
            bundle.code.clone()
        };
        if deferred {
            attributes.set("defer", None);
        }
        return Ok(create_element_string(Tag::Script, &attributes, Some(&body)));
    }

    let node = bundle
        .node()
        .ok_or_else(|| BundleError::Invariant(format!("bundle {} has no file", bundle.name)))?;
    attributes.set("src", Some(bundler.tree.path_between(document.file, node)));
    if deferred {
        attributes.set("defer", None);
    }
    if is_async {
        attributes.set("async", None);
    }
    Ok(create_element_string(Tag::Script, &attributes, Some("")))
}
