//! Bundle registry, naming and source-file bookkeeping for one run.
//!
//! A [`Bundler`] owns everything that is shared between documents: the file tree, the list of
//! bundles created so far and the module resolution cache. Documents are processed one at a
//! time against it, so bundle identity and sequential naming stay deterministic.

use std::collections::HashMap;

use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;

use crate::app::tree::{FileTree, NodeId, ROOT, TreeFilters};
use crate::domain::errors::BundleError;
use crate::domain::model::{AssetFamily, TransformSnapshot};
use crate::infra::config::Options;
use crate::infra::transform::{BuiltinTransformer, ModuleEntry, ResolvedModule, Transformer};

pub type BundleId = usize;

const RANDOM_NAME_DIGITS: usize = 12;

/// Where a bundle's code ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Injected inline into markup; no file is written unless later promoted.
    Virtual,
    /// Written as a generated file in the bundle directory.
    BundleDirectory,
    /// Replaces the content of an individually handled file.
    InPlace(NodeId),
}

/// How a bundle came to be, which also decides how it is matched for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Merged from elements found in markup. Reused on byte-identical code.
    Markup,
    /// One individually handled file or module entry. Reused on identical sources and options.
    Individual,
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub id: BundleId,
    /// Base name without extension; the source-relative path for in-place bundles.
    pub name: String,
    pub family: AssetFamily,
    /// Transformed code, before any inline sanitizing.
    pub code: String,
    pub sources: Vec<NodeId>,
    pub snapshot: TransformSnapshot,
    pub provenance: Provenance,
    virtual_bundle: bool,
    node: Option<NodeId>,
}

impl Bundle {
    pub fn is_virtual(&self) -> bool {
        self.virtual_bundle
    }

    /// The tree node holding this bundle's output, if it is real.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.family.extension())
    }
}

/// Everything needed to create a bundle or find an equivalent existing one.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub family: AssetFamily,
    pub sources: Vec<NodeId>,
    pub code: String,
    pub snapshot: TransformSnapshot,
    pub placement: Placement,
}

/// Shared bundling state for one run.
pub struct Bundler {
    pub options: Options,
    pub tree: FileTree,
    bundles: Vec<Bundle>,
    bundle_dir: Option<NodeId>,
    transformer: Box<dyn Transformer>,
    resolved_modules: HashMap<NodeId, ResolvedGraph>,
}

/// Cached result of resolving one module entry file.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    pub code: String,
    /// Every file in the graph that lives inside the source tree, entry last.
    pub files: Vec<NodeId>,
}

impl Bundler {
    /// Scan `options.src` and prepare an empty bundle registry.
    pub fn new(options: Options) -> Result<Self> {
        let filters = TreeFilters {
            ignore_git: options.ignore_git,
            ignore_ds_store: options.ignore_ds_store,
            exclude: Some(options.dist.clone()),
        };
        let tree = FileTree::scan(&options.src, filters)
            .with_context(|| format!("failed to read source tree {}", options.src.display()))?;
        Ok(Self::with_tree(options, tree))
    }

    fn with_tree(options: Options, tree: FileTree) -> Self {
        Self {
            options,
            tree,
            bundles: Vec::new(),
            bundle_dir: None,
            transformer: Box::new(BuiltinTransformer),
            resolved_modules: HashMap::new(),
        }
    }

    /// Replace the built-in transforms.
    pub fn with_transformer(mut self, transformer: Box<dyn Transformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn transformer(&self) -> &dyn Transformer {
        self.transformer.as_ref()
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    pub fn bundle(&self, id: BundleId) -> Result<&Bundle, BundleError> {
        self.bundles
            .get(id)
            .ok_or_else(|| BundleError::Invariant(format!("bundle {id} does not exist")))
    }

    /// The generated bundle directory, created on first use.
    pub fn bundle_directory(&mut self) -> NodeId {
        if let Some(dir) = self.bundle_dir {
            return dir;
        }
        let name = self.options.bundle_directory.clone();
        let dir = match self.tree.child_named(ROOT, &name) {
            Some(existing) if !self.tree.is_file(existing) => existing,
            _ => self.tree.create_directory(ROOT, name),
        };
        self.bundle_dir = Some(dir);
        dir
    }

    /// An existing individually handled bundle built from exactly `sources` with `snapshot`.
    pub fn find_individual(
        &self,
        family: AssetFamily,
        sources: &[NodeId],
        snapshot: &TransformSnapshot,
    ) -> Option<BundleId> {
        self.bundles
            .iter()
            .find(|bundle| {
                bundle.provenance == Provenance::Individual
                    && bundle.family == family
                    && bundle.sources == sources
                    && bundle.snapshot == *snapshot
            })
            .map(|bundle| bundle.id)
    }

    fn find_markup(&self, family: AssetFamily, code: &str) -> Option<BundleId> {
        self.bundles
            .iter()
            .find(|bundle| {
                bundle.provenance == Provenance::Markup
                    && bundle.family == family
                    && bundle.code == code
            })
            .map(|bundle| bundle.id)
    }

    /// Return an equivalent existing bundle, or register a new one.
    ///
    /// Markup bundles match on identical transformed code. In-place bundles match on the exact
    /// ordered source list plus transform options. Reusing a virtual bundle for a file
    /// reference promotes it to a real one.
    pub fn create_or_reuse_bundle(
        &mut self,
        request: BundleRequest,
    ) -> Result<BundleId, BundleError> {
        let existing = match request.placement {
            Placement::InPlace(_) => {
                self.find_individual(request.family, &request.sources, &request.snapshot)
            }
            Placement::Virtual | Placement::BundleDirectory => {
                self.find_markup(request.family, &request.code)
            }
        };
        if let Some(id) = existing {
            if request.placement == Placement::BundleDirectory {
                self.ensure_real(id)?;
            }
            tracing::debug!(bundle = %self.bundles[id].file_name(), "reusing bundle");
            return Ok(id);
        }

        let id = self.bundles.len();
        let (name, provenance, node) = match request.placement {
            Placement::InPlace(file) => {
                (self.tree.relative_path(file), Provenance::Individual, Some(file))
            }
            Placement::Virtual | Placement::BundleDirectory => {
                (self.generate_bundle_name(request.family), Provenance::Markup, None)
            }
        };
        self.bundles.push(Bundle {
            id,
            name,
            family: request.family,
            code: request.code,
            sources: request.sources,
            snapshot: request.snapshot,
            provenance,
            virtual_bundle: request.placement == Placement::Virtual,
            node,
        });
        if request.placement == Placement::BundleDirectory {
            self.materialize(id)?;
        }

        let bundle = &self.bundles[id];
        tracing::debug!(
            bundle = %bundle.file_name(),
            sources = bundle.sources.len(),
            virtual_bundle = bundle.virtual_bundle,
            "created bundle"
        );
        Ok(id)
    }

    /// Promote a virtual bundle to a written file. Real bundles stay real.
    pub fn ensure_real(&mut self, id: BundleId) -> Result<NodeId, BundleError> {
        let bundle = self.bundle(id)?;
        if let Some(node) = bundle.node {
            return Ok(node);
        }
        tracing::debug!(bundle = %bundle.file_name(), "promoting virtual bundle");
        self.materialize(id)
    }

    fn materialize(&mut self, id: BundleId) -> Result<NodeId, BundleError> {
        let dir = self.bundle_directory();
        let bundle = self
            .bundles
            .get_mut(id)
            .ok_or_else(|| BundleError::Invariant(format!("bundle {id} does not exist")))?;
        let node = self
            .tree
            .create_file(dir, bundle.file_name(), bundle.code.clone());
        bundle.virtual_bundle = false;
        bundle.node = Some(node);
        Ok(node)
    }

    /// A fresh bundle base name for `family`.
    ///
    /// Random names are retried until no existing bundle name starts with the candidate.
    /// Sequential names count the markup bundles that share the family's extension.
    pub fn generate_bundle_name(&self, family: AssetFamily) -> String {
        if self.options.random_bundle_names {
            let mut rng = rand::thread_rng();
            loop {
                let candidate: String = (0..RANDOM_NAME_DIGITS)
                    .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
                    .collect();
                if !self.bundles.iter().any(|b| b.name.starts_with(&candidate)) {
                    return candidate;
                }
            }
        }

        self.bundles
            .iter()
            .filter(|b| b.provenance == Provenance::Markup && b.family == family)
            .count()
            .to_string()
    }

    /// Record that every file in `sources` contributed to bundle `id`.
    pub fn add_membership(&mut self, id: BundleId, sources: &[NodeId]) -> Result<(), BundleError> {
        for source in sources {
            self.tree.add_bundle_membership(*source, id)?;
        }
        Ok(())
    }

    /// Resolve a module entry file once per run.
    pub fn resolve_module_file(&mut self, entry: NodeId) -> Result<ResolvedGraph> {
        if let Some(cached) = self.resolved_modules.get(&entry) {
            return Ok(cached.clone());
        }
        let path = self.tree.absolute_path(entry);
        let resolved = self
            .transformer
            .resolve_module(&ModuleEntry::File(path.clone()))
            .with_context(|| format!("failed to resolve module {}", path.display()))?;
        let graph = self.graph_from(resolved);
        self.resolved_modules.insert(entry, graph.clone());
        Ok(graph)
    }

    /// Resolve an inline module body whose imports are relative to `dir`.
    pub fn resolve_inline_module(
        &self,
        code: &str,
        dir: NodeId,
        document: &str,
    ) -> Result<ResolvedGraph> {
        let entry = ModuleEntry::Inline {
            code: code.to_string(),
            base_dir: self.tree.absolute_path(dir),
        };
        let resolved = self
            .transformer
            .resolve_module(&entry)
            .with_context(|| format!("failed to resolve inline module in {document}"))?;
        Ok(self.graph_from(resolved))
    }

    fn graph_from(&self, resolved: ResolvedModule) -> ResolvedGraph {
        let files = resolved
            .files
            .iter()
            .filter_map(|path| self.tree.node_for_path(path))
            .collect();
        ResolvedGraph {
            code: resolved.code,
            files,
        }
    }

    /// Mark a referenced file, and for module entries its whole import graph, as necessary.
    pub fn mark_necessary(&mut self, file: NodeId, module: bool) -> Result<()> {
        self.tree.mark_necessary(file)?;
        if !module {
            return Ok(());
        }
        match self.resolve_module_file(file) {
            Ok(graph) => {
                for dependency in graph.files {
                    self.tree.mark_necessary(dependency)?;
                }
            }
            Err(err) => {
                tracing::warn!(
                    module = %self.tree.relative_path(file),
                    error = %format!("{err:#}"),
                    "could not follow module imports; only the entry is kept"
                );
            }
        }
        Ok(())
    }
}
