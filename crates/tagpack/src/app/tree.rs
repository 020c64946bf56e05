//! In-memory mirror of the source directory.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use once_cell::unsync::OnceCell;

use crate::app::bundler::BundleId;
use crate::domain::errors::BundleError;

pub type NodeId = usize;

/// The source root directory.
pub const ROOT: NodeId = 0;

const MARKUP_EXTENSIONS: &[&str] = &[".html", ".htm", ".php"];

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    /// Ignored nodes are never written to the output tree.
    pub ignored: bool,
}

#[derive(Debug)]
pub enum NodeKind {
    File(FileEntry),
    Directory(Vec<NodeId>),
}

/// A file in the tree together with its bundling bookkeeping.
#[derive(Debug, Default)]
pub struct FileEntry {
    /// Lowercased extension including the dot, or empty.
    pub extension: String,
    raw: OnceCell<String>,
    /// Replacement output content; files without one are copied from the source.
    pub content_override: Option<String>,
    /// Referenced by markup and must survive `KEEP_NECESSARY` pruning.
    pub necessary: bool,
    /// Bundles this file contributed code to.
    pub bundles: BTreeSet<BundleId>,
    /// Created by the bundler rather than discovered on disk.
    pub generated: bool,
}

impl FileEntry {
    pub fn is_markup(&self) -> bool {
        MARKUP_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn is_php(&self) -> bool {
        self.extension == ".php"
    }

    pub fn is_script(&self) -> bool {
        matches!(self.extension.as_str(), ".js" | ".mjs")
    }

    pub fn is_style(&self) -> bool {
        self.extension == ".css"
    }
}

/// Filters applied while reading the source directory.
#[derive(Debug, Clone, Default)]
pub struct TreeFilters {
    pub ignore_git: bool,
    pub ignore_ds_store: bool,
    /// Skipped along with everything below it, e.g. an output directory inside the source.
    pub exclude: Option<PathBuf>,
}

/// Arena-backed file tree rooted at the source directory.
#[derive(Debug)]
pub struct FileTree {
    root_path: PathBuf,
    nodes: Vec<Node>,
}

impl FileTree {
    /// An empty tree rooted at `root_path`.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            nodes: vec![Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::Directory(Vec::new()),
                ignored: false,
            }],
        }
    }

    /// Read the directory at `root_path` recursively.
    pub fn scan(root_path: &Path, filters: TreeFilters) -> Result<Self> {
        let root_path = root_path
            .canonicalize()
            .with_context(|| format!("source directory {} not found", root_path.display()))?;
        let mut tree = Self::new(root_path.clone());
        let mut directories: HashMap<PathBuf, NodeId> = HashMap::new();
        directories.insert(PathBuf::new(), ROOT);

        let exclude = filters
            .exclude
            .as_deref()
            .and_then(|path| path.canonicalize().ok());
        let mut builder = WalkBuilder::new(&root_path);
        builder
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                let git = filters.ignore_git && (name == ".git" || name == ".gitignore");
                let ds_store = filters.ignore_ds_store && name == ".DS_Store";
                let excluded = exclude.as_deref() == Some(entry.path());
                entry.depth() == 0 || !(git || ds_store || excluded)
            });

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&root_path)
                .unwrap_or(entry.path())
                .to_path_buf();
            let parent = relative
                .parent()
                .and_then(|parent| directories.get(parent).copied())
                .unwrap_or(ROOT);
            let name = entry.file_name().to_string_lossy().into_owned();

            if entry.file_type().is_some_and(|kind| kind.is_dir()) {
                let id = tree.create_directory(parent, name);
                directories.insert(relative, id);
            } else {
                tree.push_file(parent, name, None, false);
            }
        }

        Ok(tree)
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, BundleError> {
        self.nodes.get(id).ok_or(BundleError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, BundleError> {
        self.nodes.get_mut(id).ok_or(BundleError::UnknownNode(id))
    }

    pub fn file(&self, id: NodeId) -> Result<&FileEntry, BundleError> {
        match &self.node(id)?.kind {
            NodeKind::File(file) => Ok(file),
            NodeKind::Directory(_) => Err(BundleError::Invariant(format!(
                "node {id} is a directory, expected a file"
            ))),
        }
    }

    pub fn file_mut(&mut self, id: NodeId) -> Result<&mut FileEntry, BundleError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::File(file) => Ok(file),
            NodeKind::Directory(_) => Err(BundleError::Invariant(format!(
                "node {id} is a directory, expected a file"
            ))),
        }
    }

    pub fn is_file(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id).map(|n| &n.kind), Some(NodeKind::File(_)))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id).map(|node| &node.kind) {
            Some(NodeKind::Directory(children)) => children,
            _ => &[],
        }
    }

    /// Every node below `id`, depth first, in directory listing order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Every file node in the tree, depth first.
    pub fn files(&self) -> Vec<NodeId> {
        self.descendants(ROOT)
            .into_iter()
            .filter(|id| self.is_file(*id))
            .collect()
    }

    pub fn create_directory(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.into(),
            parent: Some(parent),
            kind: NodeKind::Directory(Vec::new()),
            ignored: false,
        });
        self.attach(parent, id);
        id
    }

    /// Add a bundler-generated file with fixed content.
    pub fn create_file(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        content: String,
    ) -> NodeId {
        self.push_file(parent, name.into(), Some(content), true)
    }

    fn push_file(
        &mut self,
        parent: NodeId,
        name: String,
        content: Option<String>,
        generated: bool,
    ) -> NodeId {
        let extension = Path::new(&name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let id = self.nodes.len();
        self.nodes.push(Node {
            name,
            parent: Some(parent),
            kind: NodeKind::File(FileEntry {
                extension,
                content_override: content,
                generated,
                ..FileEntry::default()
            }),
            ignored: false,
        });
        self.attach(parent, id);
        id
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(Node {
            kind: NodeKind::Directory(children),
            ..
        }) = self.nodes.get_mut(parent)
        {
            children.push(child);
        }
    }

    pub fn child_named(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.children(dir)
            .iter()
            .copied()
            .find(|child| self.nodes[*child].name == name)
    }

    /// Source-root relative path using `/` separators.
    pub fn relative_path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|at| self.nodes.get(at)) {
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            current = node.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    pub fn absolute_path(&self, id: NodeId) -> PathBuf {
        let relative = self.relative_path(id);
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root_path.clone(), |path, part| path.join(part))
    }

    /// Resolve a markup reference such as `../js/app.js?v=2` from directory `dir`.
    ///
    /// A leading `/` resolves from the source root. Returns `None` unless the target is an existing
    /// file.
    pub fn resolve_relative(&self, dir: NodeId, reference: &str) -> Option<NodeId> {
        let path = reference
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim();
        if path.is_empty() {
            return None;
        }

        let mut here = if path.starts_with('/') { ROOT } else { dir };
        for step in path.split('/') {
            match step {
                "" | "." => {}
                ".." => here = self.parent(here).unwrap_or(here),
                name => here = self.child_named(here, name)?,
            }
        }
        self.is_file(here).then_some(here)
    }

    /// Map an absolute filesystem path back onto a node.
    pub fn node_for_path(&self, path: &Path) -> Option<NodeId> {
        let relative = path.strip_prefix(&self.root_path).ok()?;
        let mut here = ROOT;
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    here = self.child_named(here, &name.to_string_lossy())?;
                }
                Component::ParentDir => here = self.parent(here).unwrap_or(here),
                _ => {}
            }
        }
        Some(here)
    }

    /// Shortest relative `/` path from the directory containing `from` to `to`.
    pub fn path_between(&self, from: NodeId, to: NodeId) -> String {
        let from_dir = self.parent(from).unwrap_or(ROOT);
        self.path_from_directory(from_dir, to)
    }

    /// Shortest relative `/` path from directory `dir` to node `to`.
    pub fn path_from_directory(&self, dir: NodeId, to: NodeId) -> String {
        let from_chain = self.ancestry(dir);
        let to_chain = self.ancestry(self.parent(to).unwrap_or(ROOT));
        let common = from_chain
            .iter()
            .zip(&to_chain)
            .take_while(|(a, b)| a == b)
            .count();

        let mut parts: Vec<&str> = Vec::new();
        let back = from_chain.len() - common;
        if back == 0 {
            parts.push(".");
        } else {
            parts.extend(std::iter::repeat_n("..", back));
        }
        for dir in &to_chain[common..] {
            parts.push(&self.nodes[*dir].name);
        }
        parts.push(&self.nodes[to].name);
        parts.join("/")
    }

    /// Directories from the root down to and including `dir`.
    fn ancestry(&self, dir: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(dir);
        while let Some(at) = current {
            chain.push(at);
            current = self.parent(at);
        }
        chain.reverse();
        chain
    }

    /// The file's source text, read once and cached. Invalid UTF-8 is replaced lossily.
    pub fn read_text(&self, id: NodeId) -> Result<&str> {
        let path = self.absolute_path(id);
        let file = self.file(id)?;
        if file.generated {
            return Ok(file.content_override.as_deref().unwrap_or_default());
        }
        let text = file.raw.get_or_try_init(|| {
            fs::read(&path)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .with_context(|| format!("failed to read {}", path.display()))
        })?;
        Ok(text.as_str())
    }

    pub fn mark_necessary(&mut self, id: NodeId) -> Result<(), BundleError> {
        self.file_mut(id)?.necessary = true;
        Ok(())
    }

    pub fn add_bundle_membership(
        &mut self,
        id: NodeId,
        bundle: BundleId,
    ) -> Result<(), BundleError> {
        self.file_mut(id)?.bundles.insert(bundle);
        Ok(())
    }

    pub fn set_content(&mut self, id: NodeId, content: String) -> Result<(), BundleError> {
        self.file_mut(id)?.content_override = Some(content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Result<(tempfile::TempDir, FileTree)> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        fs::create_dir_all(root.join("js/lib"))?;
        fs::create_dir_all(root.join("pages"))?;
        fs::create_dir_all(root.join(".git"))?;
        fs::write(root.join("index.html"), "<html></html>")?;
        fs::write(root.join("js/app.js"), "app()")?;
        fs::write(root.join("js/lib/util.js"), "util()")?;
        fs::write(root.join("pages/about.html"), "<p>about</p>")?;
        fs::write(root.join(".htaccess"), "Options -Indexes")?;
        fs::write(root.join(".git/HEAD"), "ref")?;
        fs::create_dir_all(root.join("dist"))?;
        fs::write(root.join("dist/index.html"), "<html></html>")?;

        let tree = FileTree::scan(
            root,
            TreeFilters {
                ignore_git: true,
                ignore_ds_store: true,
                exclude: Some(root.join("dist")),
            },
        )?;
        Ok((temp, tree))
    }

    fn find(tree: &FileTree, relative: &str) -> NodeId {
        tree.files()
            .into_iter()
            .find(|id| tree.relative_path(*id) == relative)
            .unwrap_or_else(|| panic!("{relative} present"))
    }

    #[test]
    fn mirrors_dotfiles_but_skips_git() -> Result<()> {
        let (_temp, tree) = sample_tree()?;
        let paths: Vec<_> = tree
            .files()
            .iter()
            .map(|id| tree.relative_path(*id))
            .collect();
        assert!(paths.contains(&".htaccess".to_string()));
        assert!(paths.contains(&"js/lib/util.js".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with(".git/")));
        assert!(!paths.iter().any(|p| p.starts_with("dist/")));
        Ok(())
    }

    #[test]
    fn resolves_relative_references() -> Result<()> {
        let (_temp, tree) = sample_tree()?;
        let about = find(&tree, "pages/about.html");
        let pages = tree.parent(about).expect("pages dir");

        let app = tree.resolve_relative(pages, "../js/app.js?v=3#x");
        assert_eq!(app.map(|id| tree.relative_path(id)).as_deref(), Some("js/app.js"));
        assert_eq!(
            tree.resolve_relative(pages, "/js/./lib/util.js"),
            Some(find(&tree, "js/lib/util.js"))
        );
        assert_eq!(tree.resolve_relative(pages, "../js/missing.js"), None);
        assert_eq!(tree.resolve_relative(pages, "../js"), None);
        Ok(())
    }

    #[test]
    fn computes_shortest_paths_between_files() -> Result<()> {
        let (_temp, mut tree) = sample_tree()?;
        let bundles = tree.create_directory(ROOT, "bundles");
        let bundle = tree.create_file(bundles, "0.js", "x".into());

        let about = find(&tree, "pages/about.html");
        let index = find(&tree, "index.html");
        let util = find(&tree, "js/lib/util.js");

        assert_eq!(tree.path_between(about, bundle), "../bundles/0.js");
        assert_eq!(tree.path_between(index, bundle), "./bundles/0.js");
        assert_eq!(tree.path_between(util, about), "../../pages/about.html");
        assert_eq!(tree.read_text(bundle)?, "x");
        Ok(())
    }

    #[test]
    fn maps_absolute_paths_back_to_nodes() -> Result<()> {
        let (_temp, tree) = sample_tree()?;
        let util = find(&tree, "js/lib/util.js");
        let absolute = tree.absolute_path(util);
        assert_eq!(tree.node_for_path(&absolute), Some(util));
        assert_eq!(tree.read_text(util)?, "util()");
        Ok(())
    }
}
