//! Individually handled files: standalone scripts, modules and stylesheets transformed in place.

use anyhow::{Context, Result};

use crate::app::bundler::{BundleRequest, Bundler, Placement};
use crate::app::tree::NodeId;
use crate::domain::model::AssetFamily;
use crate::infra::config::{FileSelector, HandledFiles, Options};
use crate::infra::globs::{OverrideSet, PathMatcher};
use crate::infra::transform::{process_script, process_style};

/// Compiled form of one `handled_*_files` setting.
enum Selection {
    Nothing,
    Necessary,
    Everything,
    Matching(PathMatcher),
}

impl Selection {
    fn new(setting: &HandledFiles) -> Result<Self> {
        Ok(match setting {
            HandledFiles::Selector(FileSelector::None) => Selection::Nothing,
            HandledFiles::Selector(FileSelector::Necessary) => Selection::Necessary,
            HandledFiles::Selector(FileSelector::All) => Selection::Everything,
            HandledFiles::Globs(globs) if globs.is_empty() => Selection::Nothing,
            HandledFiles::Globs(globs) => Selection::Matching(PathMatcher::new(globs.as_slice())?),
        })
    }

    fn selects(&self, relative_path: &str, necessary: bool) -> bool {
        match self {
            Selection::Nothing => false,
            Selection::Necessary => necessary,
            Selection::Everything => true,
            Selection::Matching(matcher) => matcher.is_match(relative_path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handling {
    Script,
    Module,
    Style,
}

/// Transform every selected standalone file in place. Returns the number of files handled.
///
/// Runs after markup so that `"necessary"` selections see the final necessity flags.
pub fn process_handled_files(bundler: &mut Bundler, ignore: &PathMatcher) -> Result<usize> {
    let options = &bundler.options;
    let scripts = Selection::new(&options.handled_script_files)?;
    let modules = Selection::new(&options.handled_module_files)?;
    let styles = Selection::new(&options.handled_css_files)?;
    let overrides = OverrideSet::new(&options.handled_file_overrides)?;

    let mut selected: Vec<(NodeId, Handling)> = Vec::new();
    for id in bundler.tree.files() {
        let file = bundler.tree.file(id)?;
        if file.generated {
            continue;
        }
        let path = bundler.tree.relative_path(id);
        if ignore.is_match(&path) {
            continue;
        }
        let handling = if file.is_script() && modules.selects(&path, file.necessary) {
            Handling::Module
        } else if file.is_script() && scripts.selects(&path, file.necessary) {
            Handling::Script
        } else if file.is_style() && styles.selects(&path, file.necessary) {
            Handling::Style
        } else {
            continue;
        };
        selected.push((id, handling));
    }

    for (id, handling) in &selected {
        let path = bundler.tree.relative_path(*id);
        let options = overrides.resolve(&bundler.options, &path);
        tracing::debug!(path = %path, handling = ?handling, "handling file");
        handle_file(bundler, *id, *handling, &options)
            .with_context(|| format!("failed to process {path}"))?;
    }
    Ok(selected.len())
}

fn handle_file(
    bundler: &mut Bundler,
    id: NodeId,
    handling: Handling,
    options: &Options,
) -> Result<()> {
    let family = match handling {
        Handling::Script | Handling::Module => AssetFamily::Script,
        Handling::Style => AssetFamily::Style,
    };
    let snapshot = options.snapshot(family, false);

    let (code, sources) = match handling {
        Handling::Module => {
            let graph = bundler.resolve_module_file(id)?;
            (graph.code, graph.files)
        }
        Handling::Script | Handling::Style => (bundler.tree.read_text(id)?.to_string(), vec![id]),
    };

    let bundle = match bundler.find_individual(family, &sources, &snapshot) {
        Some(existing) => existing,
        None => {
            let code = match family {
                AssetFamily::Script => process_script(bundler.transformer(), &code, &snapshot)?,
                AssetFamily::Style => process_style(bundler.transformer(), &code, &snapshot)?,
            };
            bundler.create_or_reuse_bundle(BundleRequest {
                family,
                sources: sources.clone(),
                code,
                snapshot,
                placement: Placement::InPlace(id),
            })?
        }
    };

    // Module dependencies now live inside the entry file.
    let dependencies: Vec<NodeId> = sources.into_iter().filter(|source| *source != id).collect();
    bundler.add_membership(bundle, &dependencies)?;

    let code = bundler.bundle(bundle)?.code.clone();
    bundler.tree.set_content(id, code)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::app::tree::ROOT;

    fn bundler(configure: impl FnOnce(&mut Options)) -> Result<(tempfile::TempDir, Bundler)> {
        let temp = tempfile::tempdir()?;
        fs::create_dir_all(temp.path().join("js"))?;
        fs::write(
            temp.path().join("js/util.js"),
            "export const twice = (n) => n * 2;\n",
        )?;
        fs::write(
            temp.path().join("js/main.js"),
            "import { twice } from './util.js';\nconsole.log(twice(2));\n",
        )?;
        fs::write(temp.path().join("js/plain.js"), "// note\nvar a = 1;\n")?;
        fs::write(temp.path().join("site.css"), "body {\n  color: red;\n}\n")?;

        let mut options = Options {
            src: temp.path().to_path_buf(),
            dist: temp.path().join("dist"),
            ..Options::default()
        };
        configure(&mut options);
        Ok((temp, Bundler::new(options)?))
    }

    fn node(bundler: &Bundler, path: &str) -> NodeId {
        path.split('/')
            .try_fold(ROOT, |dir, name| bundler.tree.child_named(dir, name))
            .unwrap_or_else(|| panic!("{path} present"))
    }

    fn rewritten(bundler: &Bundler, path: &str) -> Result<String> {
        let file = bundler.tree.file(node(bundler, path))?;
        Ok(file.content_override.clone().expect("rewritten"))
    }

    #[test]
    fn transforms_selected_files_in_place() -> Result<()> {
        let (_temp, mut bundler) = bundler(|options| {
            options.handled_script_files = HandledFiles::Globs(vec!["plain.js".into()]);
            options.handled_css_files = HandledFiles::Selector(FileSelector::All);
            options.iife_script = false;
        })?;

        let handled = process_handled_files(&mut bundler, &PathMatcher::empty())?;
        assert_eq!(handled, 2);

        let plain = rewritten(&bundler, "js/plain.js")?;
        assert!(plain.contains("var a=1;"));
        assert!(!plain.contains("note"));
        let css = rewritten(&bundler, "site.css")?;
        assert_eq!(css.trim(), "body{color:red;}");
        let main = node(&bundler, "js/main.js");
        assert!(bundler.tree.file(main)?.content_override.is_none());
        Ok(())
    }

    #[test]
    fn module_entries_absorb_their_dependencies() -> Result<()> {
        let (_temp, mut bundler) = bundler(|options| {
            options.handled_module_files = HandledFiles::Globs(vec!["js/main.js".into()]);
            options.minify_script = false;
            options.iife_script = false;
        })?;

        process_handled_files(&mut bundler, &PathMatcher::empty())?;

        let main = node(&bundler, "js/main.js");
        let util = node(&bundler, "js/util.js");
        let code = rewritten(&bundler, "js/main.js")?;
        assert!(code.contains("const twice"));
        assert!(!code.contains("import"));
        assert!(!bundler.tree.file(util)?.bundles.is_empty());
        assert!(bundler.tree.file(main)?.bundles.is_empty());
        Ok(())
    }

    #[test]
    fn necessary_selection_uses_markup_flags() -> Result<()> {
        let (_temp, mut bundler) = bundler(|options| {
            options.handled_script_files = HandledFiles::Selector(FileSelector::Necessary);
        })?;
        let plain = node(&bundler, "js/plain.js");
        bundler.tree.mark_necessary(plain)?;

        assert_eq!(process_handled_files(&mut bundler, &PathMatcher::empty())?, 1);
        assert!(bundler.tree.file(plain)?.content_override.is_some());
        Ok(())
    }

    #[test]
    fn ignored_paths_are_skipped() -> Result<()> {
        let (_temp, mut bundler) = bundler(|options| {
            options.handled_css_files = HandledFiles::Selector(FileSelector::All);
        })?;
        let ignore = PathMatcher::new(&["*.css"])?;
        assert_eq!(process_handled_files(&mut bundler, &ignore)?, 0);
        Ok(())
    }
}
