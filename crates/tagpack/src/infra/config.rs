//! Layered bundler options.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};

use crate::domain::model::{
    AssetFamily, FileAction, InsertPosition, MissingTagAction, TransformSnapshot, TranspileTarget,
};

static DEFAULT_CONFIG: &str = include_str!("../../assets/default-config.toml");
static DEFAULT_PROJECT_CONFIG_PATH: &str = "tagpack.toml";

/// Which standalone files are transformed in place outside of markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandledFiles {
    Selector(FileSelector),
    Globs(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSelector {
    None,
    /// Every file flagged necessary while processing markup.
    Necessary,
    All,
}

impl Default for HandledFiles {
    fn default() -> Self {
        HandledFiles::Globs(Vec::new())
    }
}

/// Effective options for a run or for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default = "Options::default_src")]
    pub src: PathBuf,
    #[serde(default = "Options::default_dist")]
    pub dist: PathBuf,
    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "enabled")]
    pub bundle_script: bool,
    #[serde(default = "enabled")]
    pub minify_script: bool,
    #[serde(default = "enabled")]
    pub iife_script: bool,
    #[serde(default)]
    pub transpile_script: TranspileTarget,
    #[serde(default = "enabled")]
    pub handle_inline_script: bool,
    #[serde(default)]
    pub inject_script: bool,
    #[serde(default = "enabled")]
    pub sanitize_injected_script: bool,
    #[serde(default = "Options::default_script_insert_position")]
    pub script_insert_position: InsertPosition,
    #[serde(default = "Options::default_missing_tag_action")]
    pub missing_script_file_tag_action: MissingTagAction,
    #[serde(default = "Options::default_file_action")]
    pub script_file_action: FileAction,
    #[serde(default)]
    pub handled_script_files: HandledFiles,
    #[serde(default)]
    pub handled_module_files: HandledFiles,

    #[serde(default = "enabled")]
    pub bundle_css: bool,
    #[serde(default = "enabled")]
    pub minify_css: bool,
    #[serde(default)]
    pub optimize_css: bool,
    #[serde(default)]
    pub autoprefix_css: bool,
    #[serde(default = "enabled")]
    pub handle_inline_css: bool,
    #[serde(default)]
    pub inject_css: bool,
    #[serde(default = "enabled")]
    pub sanitize_injected_css: bool,
    #[serde(default = "Options::default_css_insert_position")]
    pub css_insert_position: InsertPosition,
    #[serde(default = "Options::default_missing_tag_action")]
    pub missing_css_file_tag_action: MissingTagAction,
    #[serde(default = "Options::default_file_action")]
    pub css_file_action: FileAction,
    #[serde(default)]
    pub handled_css_files: HandledFiles,

    #[serde(default = "enabled")]
    pub minify_markup: bool,
    #[serde(default)]
    pub insert_polyfill: bool,
    #[serde(default = "Options::default_polyfill_url")]
    pub polyfill_url: String,

    #[serde(default = "enabled")]
    pub remove_empty_directories: bool,
    #[serde(default)]
    pub keep: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "enabled")]
    pub ignore_git: bool,
    #[serde(default = "enabled")]
    pub ignore_ds_store: bool,
    #[serde(default = "enabled")]
    pub random_bundle_names: bool,
    #[serde(default = "Options::default_bundle_directory")]
    pub bundle_directory: String,

    /// Glob → overrides applied to matching markup documents, in key order.
    #[serde(default)]
    pub markup_overrides: BTreeMap<String, OptionsOverride>,
    /// Glob → overrides applied to matching individually handled files, in key order.
    #[serde(default)]
    pub handled_file_overrides: BTreeMap<String, OptionsOverride>,
}

fn enabled() -> bool {
    true
}

impl Options {
    fn default_src() -> PathBuf {
        PathBuf::from("src")
    }

    fn default_dist() -> PathBuf {
        PathBuf::from("dist")
    }

    fn default_script_insert_position() -> InsertPosition {
        InsertPosition::EndOfBody
    }

    fn default_css_insert_position() -> InsertPosition {
        InsertPosition::EndOfHead
    }

    fn default_missing_tag_action() -> MissingTagAction {
        MissingTagAction::Keep
    }

    fn default_file_action() -> FileAction {
        FileAction::RemoveBundled
    }

    fn default_polyfill_url() -> String {
        "https://cdnjs.cloudflare.com/polyfill/v3/polyfill.min.js".into()
    }

    fn default_bundle_directory() -> String {
        "bundles".into()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            src: Self::default_src(),
            dist: Self::default_dist(),
            verbose: false,
            bundle_script: true,
            minify_script: true,
            iife_script: true,
            transpile_script: TranspileTarget::Off,
            handle_inline_script: true,
            inject_script: false,
            sanitize_injected_script: true,
            script_insert_position: Self::default_script_insert_position(),
            missing_script_file_tag_action: Self::default_missing_tag_action(),
            script_file_action: Self::default_file_action(),
            handled_script_files: HandledFiles::default(),
            handled_module_files: HandledFiles::default(),
            bundle_css: true,
            minify_css: true,
            optimize_css: false,
            autoprefix_css: false,
            handle_inline_css: true,
            inject_css: false,
            sanitize_injected_css: true,
            css_insert_position: Self::default_css_insert_position(),
            missing_css_file_tag_action: Self::default_missing_tag_action(),
            css_file_action: Self::default_file_action(),
            handled_css_files: HandledFiles::default(),
            minify_markup: true,
            insert_polyfill: false,
            polyfill_url: Self::default_polyfill_url(),
            remove_empty_directories: true,
            keep: Vec::new(),
            ignore: Vec::new(),
            ignore_git: true,
            ignore_ds_store: true,
            random_bundle_names: true,
            bundle_directory: Self::default_bundle_directory(),
            markup_overrides: BTreeMap::new(),
            handled_file_overrides: BTreeMap::new(),
        }
    }
}

/// A partial layer of options; only the fields that are set overlay the base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsOverride {
    pub src: Option<PathBuf>,
    pub dist: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub bundle_script: Option<bool>,
    pub minify_script: Option<bool>,
    pub iife_script: Option<bool>,
    pub transpile_script: Option<TranspileTarget>,
    pub handle_inline_script: Option<bool>,
    pub inject_script: Option<bool>,
    pub sanitize_injected_script: Option<bool>,
    pub script_insert_position: Option<InsertPosition>,
    pub missing_script_file_tag_action: Option<MissingTagAction>,
    pub script_file_action: Option<FileAction>,
    pub handled_script_files: Option<HandledFiles>,
    pub handled_module_files: Option<HandledFiles>,
    pub bundle_css: Option<bool>,
    pub minify_css: Option<bool>,
    pub optimize_css: Option<bool>,
    pub autoprefix_css: Option<bool>,
    pub handle_inline_css: Option<bool>,
    pub inject_css: Option<bool>,
    pub sanitize_injected_css: Option<bool>,
    pub css_insert_position: Option<InsertPosition>,
    pub missing_css_file_tag_action: Option<MissingTagAction>,
    pub css_file_action: Option<FileAction>,
    pub handled_css_files: Option<HandledFiles>,
    pub minify_markup: Option<bool>,
    pub insert_polyfill: Option<bool>,
    pub polyfill_url: Option<String>,
    pub remove_empty_directories: Option<bool>,
    pub keep: Option<Vec<String>>,
    pub ignore: Option<Vec<String>>,
    pub ignore_git: Option<bool>,
    pub ignore_ds_store: Option<bool>,
    pub random_bundle_names: Option<bool>,
    pub bundle_directory: Option<String>,
    pub markup_overrides: Option<BTreeMap<String, OptionsOverride>>,
    pub handled_file_overrides: Option<BTreeMap<String, OptionsOverride>>,
}

macro_rules! overlay {
    ($base:ident, $layer:ident; $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = $layer.$field {
                $base.$field = value;
            }
        )*
    };
}

impl OptionsOverride {
    fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&data)
            .with_context(|| format!("failed to parse TOML config: {}", path.display()))
    }
}

/// Environment overrides for the source and output directories.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    src: Option<PathBuf>,
    dist: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            src: env::var_os("TAGPACK_SRC").map(PathBuf::from),
            dist: env::var_os("TAGPACK_DIST").map(PathBuf::from),
        }
    }

    fn into_layer(self) -> OptionsOverride {
        OptionsOverride {
            src: self.src,
            dist: self.dist,
            ..OptionsOverride::default()
        }
    }
}

impl Options {
    /// Load options from defaults, the global user config, the project config and the env.
    ///
    /// `project` replaces the default `tagpack.toml` lookup in the working directory.
    pub fn load(project: Option<PathBuf>) -> Result<Self> {
        let project = match project {
            Some(path) => Some(path),
            None => Some(env::current_dir()?.join(DEFAULT_PROJECT_CONFIG_PATH)),
        };
        Self::load_with_layers(global_config_path(), project, EnvOverrides::from_env())
    }

    pub fn load_with_layers(
        global: Option<PathBuf>,
        project: Option<PathBuf>,
        env_overrides: EnvOverrides,
    ) -> Result<Self> {
        let mut options = Self::from_str(DEFAULT_CONFIG)?;

        if let Some(global_path) = global.filter(|path| path.exists()) {
            options.apply(OptionsOverride::from_file(&global_path)?);
        }

        if let Some(project_path) = project.filter(|path| path.exists()) {
            options.apply(OptionsOverride::from_file(&project_path)?);
        }

        options.apply(env_overrides.into_layer());
        Ok(options)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse TOML config")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize options")
    }

    /// Overlay every field `layer` sets.
    pub fn apply(&mut self, layer: OptionsOverride) {
        let base = self;
        overlay!(base, layer;
            src, dist, verbose,
            bundle_script, minify_script, iife_script, transpile_script, handle_inline_script,
            inject_script, sanitize_injected_script, script_insert_position,
            missing_script_file_tag_action, script_file_action, handled_script_files,
            handled_module_files,
            bundle_css, minify_css, optimize_css, autoprefix_css, handle_inline_css, inject_css,
            sanitize_injected_css, css_insert_position, missing_css_file_tag_action,
            css_file_action, handled_css_files,
            minify_markup, insert_polyfill, polyfill_url,
            remove_empty_directories, keep, ignore, ignore_git, ignore_ds_store,
            random_bundle_names, bundle_directory, markup_overrides, handled_file_overrides,
        );
    }

    /// The transform-relevant option values for one family.
    pub fn snapshot(&self, family: AssetFamily, sanitize: bool) -> TransformSnapshot {
        match family {
            AssetFamily::Script => TransformSnapshot {
                minify_script: self.minify_script,
                iife_script: self.iife_script,
                transpile_script: self.transpile_script,
                sanitize,
                ..TransformSnapshot::default()
            },
            AssetFamily::Style => TransformSnapshot {
                minify_css: self.minify_css,
                optimize_css: self.optimize_css,
                autoprefix_css: self.autoprefix_css,
                sanitize,
                ..TransformSnapshot::default()
            },
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|base| base.join("tagpack/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_uses_defaults_when_no_files() -> Result<()> {
        let options = Options::load_with_layers(None, None, EnvOverrides::default())?;
        assert_eq!(options, Options::default());
        assert_eq!(options.script_insert_position, InsertPosition::EndOfBody);
        assert_eq!(options.css_insert_position, InsertPosition::EndOfHead);
        Ok(())
    }

    #[test]
    fn merge_global_and_project() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let global = temp.path().join("config.toml");
        fs::write(
            &global,
            r#"
minify_script = false
ignore = ["*.map"]
"#,
        )?;

        let project = temp.path().join("tagpack.toml");
        fs::write(
            &project,
            r#"
script_insert_position = "LOCAL"
transpile_script = "es5"
handled_css_files = "necessary"

[markup_overrides."about.html"]
inject_css = true
"#,
        )?;

        let options =
            Options::load_with_layers(Some(global), Some(project), EnvOverrides::default())?;

        assert!(!options.minify_script);
        assert_eq!(options.ignore, vec!["*.map".to_string()]);
        assert_eq!(options.script_insert_position, InsertPosition::Local);
        assert_eq!(options.transpile_script, TranspileTarget::Es5);
        assert_eq!(
            options.handled_css_files,
            HandledFiles::Selector(FileSelector::Necessary)
        );
        let about = options
            .markup_overrides
            .get("about.html")
            .expect("override present");
        assert_eq!(about.inject_css, Some(true));
        assert_eq!(about.minify_css, None);
        Ok(())
    }

    #[test]
    fn env_overrides_take_precedence() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let project = temp.path().join("tagpack.toml");
        fs::write(&project, "src = \"site\"\n")?;

        let env = EnvOverrides {
            src: Some(PathBuf::from("public")),
            dist: None,
        };
        let options = Options::load_with_layers(None, Some(project), env)?;
        assert_eq!(options.src, PathBuf::from("public"));
        assert_eq!(options.dist, PathBuf::from("dist"));
        Ok(())
    }

    #[test]
    fn handled_files_accept_glob_lists() -> Result<()> {
        let layer: OptionsOverride = toml::from_str("handled_script_files = [\"vendor/**\"]")?;
        assert_eq!(
            layer.handled_script_files,
            Some(HandledFiles::Globs(vec!["vendor/**".into()]))
        );
        Ok(())
    }

    #[test]
    fn invalid_config_returns_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("broken.toml");
        fs::write(&file, "this is not toml")?;
        assert!(OptionsOverride::from_file(&file).is_err());
        Ok(())
    }

    #[test]
    fn options_round_trip_through_toml() -> Result<()> {
        let rendered = Options::default().to_toml()?;
        assert_eq!(Options::from_str(&rendered)?, Options::default());
        Ok(())
    }
}
