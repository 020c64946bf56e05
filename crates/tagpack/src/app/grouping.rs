//! Grouping policy: which elements may share a bundle and where the result goes.
//!
//! Elements of one family are first split into segments, each with one insertion point. Inside
//! a segment elements are stably reordered so deferred ones come last, then accumulated into
//! groups following the compatibility rules. Every group materializes into one replacement
//! string; all originals are cut and the replacements inserted in a single splice.

use std::collections::HashSet;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::app::bundler::Bundler;
use crate::app::tree::{FileTree, NodeId};
use crate::app::{scripts, styles};
use crate::domain::model::{AssetFamily, InsertPosition, MissingTagAction};
use crate::infra::config::Options;
use crate::markup::document::Document;
use crate::markup::element::Element;
use crate::markup::splicer::StringSplicer;

static ABSOLUTE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:[a-z][a-z0-9+.\-]*:|//)").unwrap());

/// Whether `url` points outside the source tree (`https://`, `//cdn`, `data:` ...).
pub fn is_absolute_url(url: &str) -> bool {
    ABSOLUTE_URL.is_match(url.trim())
}

/// Where an element's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Inline,
    Absolute(String),
    Local(NodeId),
    /// A local reference with no file behind it.
    Missing(String),
}

impl AssetSource {
    /// Resolve an element's `src`/`href` value from the document directory.
    pub fn resolve(tree: &FileTree, dir: NodeId, reference: Option<&str>) -> Self {
        match reference.map(str::trim).filter(|url| !url.is_empty()) {
            None => AssetSource::Inline,
            Some(url) if is_absolute_url(url) => AssetSource::Absolute(url.to_string()),
            Some(url) => match tree.resolve_relative(dir, url) {
                Some(file) => AssetSource::Local(file),
                None => AssetSource::Missing(url.to_string()),
            },
        }
    }
}

/// A scanned element that takes part in bundling.
#[derive(Debug, Clone)]
pub struct AssetElement {
    pub element: Element,
    pub source: AssetSource,
    /// Runs after parsing: explicit `defer` on an external script, or any module.
    pub deferred: bool,
    pub is_async: bool,
    pub module: bool,
}

impl AssetElement {
    pub fn local_file(&self) -> Option<NodeId> {
        match self.source {
            AssetSource::Local(file) => Some(file),
            _ => None,
        }
    }
}

/// Classification outcome for one scanned element.
#[derive(Debug)]
pub enum Classified {
    Asset(AssetElement),
    /// Would participate, but its local reference does not exist.
    Missing { element: Element, url: String },
    /// Left exactly as written. Carries the local file it references, if any.
    Untouched(Option<NodeId>),
}

/// The options that steer one family through a document.
#[derive(Debug, Clone)]
pub struct FamilySettings {
    pub family: AssetFamily,
    pub bundle: bool,
    pub handle_inline: bool,
    pub inject: bool,
    pub sanitize: bool,
    pub position: InsertPosition,
    pub missing_action: MissingTagAction,
}

impl FamilySettings {
    pub fn new(options: &Options, family: AssetFamily) -> Self {
        match family {
            AssetFamily::Script => Self {
                family,
                bundle: options.bundle_script,
                handle_inline: options.handle_inline_script,
                inject: options.inject_script,
                sanitize: options.sanitize_injected_script,
                position: options.script_insert_position,
                missing_action: options.missing_script_file_tag_action,
            },
            AssetFamily::Style => Self {
                family,
                bundle: options.bundle_css,
                handle_inline: options.handle_inline_css,
                inject: options.inject_css,
                sanitize: options.sanitize_injected_css,
                position: options.css_insert_position,
                missing_action: options.missing_css_file_tag_action,
            },
        }
    }
}

/// A run of elements sharing one insertion point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Indices into the classified elements, in source order.
    pub members: Vec<usize>,
    pub insert_at: usize,
    /// The replacement takes the place of the first member rather than an anchor.
    pub in_place: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// An absolute reference, re-serialized on its own.
    Standalone,
    /// One module entry, rolled up with its imports.
    Module,
    /// Plain code merged from every member.
    Merged { deferred: bool, is_async: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub kind: GroupKind,
    pub members: Vec<usize>,
}

/// Stable partition moving every item flagged `deferred` behind the rest.
pub fn stable_defer_partition<T>(items: Vec<T>, deferred: impl Fn(&T) -> bool) -> Vec<T> {
    let (mut eager, late): (Vec<T>, Vec<T>) = items.into_iter().partition(|item| !deferred(item));
    eager.extend(late);
    eager
}

/// Split `assets` into segments for the configured insert position.
///
/// An anchored position collects every element into one segment at the anchor. Local mode
/// starts a new segment whenever real content separates two elements. Async scripts always
/// stay where they are, alone.
pub fn build_segments(
    document: &Document,
    assets: &[AssetElement],
    position: InsertPosition,
) -> Vec<Segment> {
    let in_place = |index: usize| Segment {
        members: vec![index],
        insert_at: assets[index].element.index,
        in_place: true,
    };

    let mut segments = Vec::new();
    if let Some(anchor) = position.anchor() {
        let members: Vec<usize> = (0..assets.len()).filter(|i| !assets[*i].is_async).collect();
        if !members.is_empty() {
            segments.push(Segment {
                members,
                insert_at: document.index_for_anchor(anchor),
                in_place: false,
            });
        }
        let pinned = (0..assets.len()).filter(|i| assets[*i].is_async);
        segments.extend(pinned.map(in_place));
        segments.sort_by_key(|segment| segment.members[0]);
        return segments;
    }

    let mut current: Option<Segment> = None;
    for (index, asset) in assets.iter().enumerate() {
        if asset.is_async {
            segments.extend(current.take());
            segments.push(in_place(index));
            continue;
        }
        if let Some(segment) = current.as_mut() {
            let previous = &assets[*segment.members.last().unwrap_or(&index)].element;
            if document.is_empty_in_range(previous.end(), asset.element.index, &[]) {
                segment.members.push(index);
                continue;
            }
            segments.extend(current.take());
        }
        current = Some(in_place(index));
    }
    segments.extend(current);
    segments
}

/// Accumulate reordered script elements into groups.
///
/// Absolute references stand alone. A module is resolved alone, and a module whose file was
/// already included in this document is dropped. An async script is never merged. Plain scripts
/// merge while they agree on being deferred.
pub fn accumulate_scripts(
    assets: &[AssetElement],
    ordered: &[usize],
    seen_modules: &mut HashSet<NodeId>,
) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current = Vec::new();

    for &index in ordered {
        let asset = &assets[index];
        if matches!(asset.source, AssetSource::Absolute(_)) {
            flush(&mut groups, &mut current, assets);
            groups.push(Group {
                kind: GroupKind::Standalone,
                members: vec![index],
            });
            continue;
        }
        if asset.module {
            flush(&mut groups, &mut current, assets);
            if let Some(file) = asset.local_file() {
                if !seen_modules.insert(file) {
                    tracing::debug!(index = asset.element.index, "dropping repeated module script");
                    continue;
                }
            }
            groups.push(Group {
                kind: GroupKind::Module,
                members: vec![index],
            });
            continue;
        }
        if asset.is_async {
            flush(&mut groups, &mut current, assets);
            groups.push(Group {
                kind: GroupKind::Merged {
                    deferred: false,
                    is_async: true,
                },
                members: vec![index],
            });
            continue;
        }
        if let Some(&first) = current.first() {
            if assets[first].deferred != asset.deferred {
                flush(&mut groups, &mut current, assets);
            }
        }
        current.push(index);
    }

    flush(&mut groups, &mut current, assets);
    groups
}

/// Accumulate style elements: only absolute references break a run.
pub fn accumulate_styles(assets: &[AssetElement], ordered: &[usize]) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    for &index in ordered {
        if matches!(assets[index].source, AssetSource::Absolute(_)) {
            flush(&mut groups, &mut current, assets);
            groups.push(Group {
                kind: GroupKind::Standalone,
                members: vec![index],
            });
        } else {
            current.push(index);
        }
    }
    flush(&mut groups, &mut current, assets);
    groups
}

fn flush(groups: &mut Vec<Group>, current: &mut Vec<usize>, assets: &[AssetElement]) {
    let Some(&first) = current.first() else {
        return;
    };
    groups.push(Group {
        kind: GroupKind::Merged {
            deferred: assets[first].deferred,
            is_async: false,
        },
        members: std::mem::take(current),
    });
}

fn scan(document: &Document, family: AssetFamily) -> Vec<Element> {
    match family {
        AssetFamily::Script => scripts::scan(document),
        AssetFamily::Style => styles::scan(document),
    }
}

fn classify(
    tree: &FileTree,
    document: &Document,
    element: Element,
    settings: &FamilySettings,
) -> Classified {
    match settings.family {
        AssetFamily::Script => scripts::classify(tree, document, element, settings),
        AssetFamily::Style => styles::classify(tree, document, element, settings),
    }
}

/// Bundle every participating element of `family` in `document`.
pub fn bundle_family(
    bundler: &mut Bundler,
    document: &mut Document,
    family: AssetFamily,
) -> Result<()> {
    let settings = FamilySettings::new(&document.options, family);
    remove_missing(&bundler.tree, document, &settings);

    let mut assets = Vec::new();
    for element in scan(document, family) {
        match classify(&bundler.tree, document, element, &settings) {
            Classified::Asset(asset) => assets.push(asset),
            Classified::Missing { url, .. } => {
                tracing::warn!(
                    document = %document.path,
                    reference = %url,
                    "keeping tag for missing file"
                );
            }
            Classified::Untouched(Some(file)) => bundler.mark_necessary(file, false)?,
            Classified::Untouched(None) => {}
        }
    }

    if !settings.bundle {
        for asset in &assets {
            if let Some(file) = asset.local_file() {
                bundler.mark_necessary(file, asset.module)?;
            }
        }
        return Ok(());
    }
    if assets.is_empty() {
        return Ok(());
    }

    let mut splicer = StringSplicer::new(document.text());
    let mut seen_modules = HashSet::new();
    for segment in build_segments(document, &assets, settings.position) {
        let ordered = stable_defer_partition(segment.members.clone(), |i| assets[*i].deferred);
        let groups = match family {
            AssetFamily::Script => accumulate_scripts(&assets, &ordered, &mut seen_modules),
            AssetFamily::Style => accumulate_styles(&assets, &ordered),
        };

        let mut replacement = String::new();
        for group in &groups {
            let output = match family {
                AssetFamily::Script => {
                    scripts::materialize(bundler, document, &assets, group, &settings)?
                }
                AssetFamily::Style => {
                    styles::materialize(bundler, document, &assets, group, &settings)?
                }
            };
            replacement.push_str(&output);
        }

        for (position, index) in segment.members.iter().enumerate() {
            let exact = segment.in_place && position == 0;
            let cut = assets[*index].element.cut_bounds(document.text(), !exact);
            splicer.add_cut(cut.start, cut.len());
        }
        splicer.add_insert(segment.insert_at, replacement);
    }

    document.set_text(splicer.execute());
    tracing::debug!(
        document = %document.path,
        family = %family,
        elements = assets.len(),
        "bundled elements"
    );
    Ok(())
}

/// Cut every element whose local reference is missing when the policy says so.
fn remove_missing(tree: &FileTree, document: &mut Document, settings: &FamilySettings) {
    if settings.missing_action != MissingTagAction::Remove {
        return;
    }

    let mut splicer = StringSplicer::new(document.text());
    for element in scan(document, settings.family) {
        if let Classified::Missing { element, url } = classify(tree, document, element, settings) {
            tracing::warn!(
                document = %document.path,
                reference = %url,
                "removing tag for missing file"
            );
            let cut = element.cut_bounds(document.text(), true);
            splicer.add_cut(cut.start, cut.len());
        }
    }
    if !splicer.is_empty() {
        document.set_text(splicer.execute());
    }
}
