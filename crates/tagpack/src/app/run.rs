//! The whole-run pipeline: markup, handled files, pruning and the staged write.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::app::bundler::{Bundle, Bundler, Provenance};
use crate::app::handled::process_handled_files;
use crate::app::tree::{FileEntry, NodeId, NodeKind, ROOT};
use crate::domain::model::{AssetFamily, FileAction};
use crate::infra::config::Options;
use crate::infra::globs::{OverrideSet, PathMatcher};
use crate::infra::output::{OutputEntry, OutputPlan, ensure_separate};
use crate::markup::process_markup;

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Source-relative paths of the processed markup documents.
    pub documents: Vec<String>,
    pub bundles: Vec<BundleSummary>,
    pub handled_files: usize,
    pub files_written: usize,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub name: String,
    pub family: AssetFamily,
    pub provenance: Provenance,
    #[serde(rename = "virtual")]
    pub virtual_bundle: bool,
    /// Output-relative path; absent for bundles injected inline.
    pub path: Option<String>,
    pub sources: Vec<String>,
}

/// Load the tree below `options.src`, bundle it and write `options.dist`.
pub fn run(options: Options) -> Result<RunReport> {
    ensure_separate(&options.dist, &options.src)?;
    Bundler::new(options)?.run()
}

impl Bundler {
    /// Process every document and handled file, then replace the output directory.
    pub fn run(mut self) -> Result<RunReport> {
        let ignore = PathMatcher::new(self.options.ignore.as_slice())?;
        let keep = PathMatcher::new(self.options.keep.as_slice())?;
        let overrides = OverrideSet::new(&self.options.markup_overrides)?;

        let mut documents = Vec::new();
        for id in self.tree.files() {
            let file = self.tree.file(id)?;
            if !file.is_markup() || file.generated {
                continue;
            }
            let path = self.tree.relative_path(id);
            if ignore.is_match(&path) {
                tracing::debug!(path = %path, "skipping ignored markup");
                continue;
            }
            process_markup(&mut self, id, &overrides)?;
            documents.push(path);
        }

        let handled_files = process_handled_files(&mut self, &ignore)?;

        self.prune(&ignore, &keep)?;
        let plan = self.output_plan()?;
        let files_written = plan.file_count();
        plan.write(&self.options.dist, self.tree.root_path())
            .with_context(|| format!("failed to write {}", self.options.dist.display()))?;

        let bundles = self
            .bundles()
            .iter()
            .map(|bundle| self.summarize(bundle))
            .collect();
        tracing::info!(
            documents = documents.len(),
            files = files_written,
            output = %self.options.dist.display(),
            "run complete"
        );
        Ok(RunReport {
            documents,
            bundles,
            handled_files,
            files_written,
            output: self.options.dist.clone(),
        })
    }

    /// Flag every node that must not reach the output.
    fn prune(&mut self, ignore: &PathMatcher, keep: &PathMatcher) -> Result<()> {
        for id in self.tree.descendants(ROOT) {
            let path = self.tree.relative_path(id);
            let dropped = if ignore.is_match(&path) {
                true
            } else if keep.is_match(&path) {
                false
            } else {
                match &self.tree.node(id)?.kind {
                    NodeKind::File(file) => !self.survives(id, file),
                    NodeKind::Directory(_) => false,
                }
            };
            if dropped {
                tracing::trace!(path = %path, "pruned");
                self.tree.node_mut(id)?.ignored = true;
            }
        }

        if self.options.remove_empty_directories {
            // Children come after their parents, so walk backwards.
            for id in self.tree.descendants(ROOT).into_iter().rev() {
                if self.tree.is_file(id) || self.tree.node(id)?.ignored {
                    continue;
                }
                let empty = self
                    .tree
                    .children(id)
                    .iter()
                    .all(|child| self.tree.node(*child).map_or(true, |node| node.ignored));
                if empty {
                    self.tree.node_mut(id)?.ignored = true;
                }
            }
        }
        Ok(())
    }

    fn survives(&self, id: NodeId, file: &FileEntry) -> bool {
        if file.generated {
            return true;
        }
        let in_place = self
            .bundles()
            .iter()
            .any(|bundle| bundle.provenance == Provenance::Individual && bundle.node() == Some(id));
        if in_place {
            return true;
        }

        let action = if file.is_script() {
            self.options.script_file_action
        } else if file.is_style() {
            self.options.css_file_action
        } else {
            return true;
        };
        match action {
            FileAction::RemoveAll => false,
            FileAction::RemoveBundled => file.bundles.is_empty(),
            FileAction::KeepAll => true,
            FileAction::KeepNecessary => file.necessary,
        }
    }

    fn output_plan(&self) -> Result<OutputPlan> {
        let mut plan = OutputPlan::new();
        let mut pending: Vec<NodeId> = self.tree.children(ROOT).iter().rev().copied().collect();
        while let Some(id) = pending.pop() {
            let node = self.tree.node(id)?;
            if node.ignored {
                continue;
            }
            let path = PathBuf::from(self.tree.relative_path(id));
            match &node.kind {
                NodeKind::Directory(children) => {
                    plan.push(OutputEntry::Directory(path));
                    pending.extend(children.iter().rev());
                }
                NodeKind::File(file) => match &file.content_override {
                    Some(content) => plan.push(OutputEntry::Write {
                        path,
                        content: content.clone(),
                    }),
                    None => plan.push(OutputEntry::Copy {
                        from: self.tree.absolute_path(id),
                        path,
                    }),
                },
            }
        }
        Ok(plan)
    }

    fn summarize(&self, bundle: &Bundle) -> BundleSummary {
        let name = match bundle.provenance {
            Provenance::Individual => bundle.name.clone(),
            Provenance::Markup => bundle.file_name(),
        };
        BundleSummary {
            name,
            family: bundle.family,
            provenance: bundle.provenance,
            virtual_bundle: bundle.is_virtual(),
            path: bundle.node().map(|node| self.tree.relative_path(node)),
            sources: bundle
                .sources
                .iter()
                .map(|source| self.tree.relative_path(*source))
                .collect(),
        }
    }
}
