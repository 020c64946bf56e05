//! Glob matching for ignore/keep lists and per-path option overrides.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::infra::config::{Options, OptionsOverride};

/// Matches source-root relative, `/`-separated paths against a list of patterns.
///
/// A pattern without a `/` matches a file or directory name at any depth, and a pattern naming a
/// directory also matches everything below it.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    globs: Option<GlobSet>,
}

impl PathMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::empty());
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            for expanded in expand_pattern(pattern.as_ref()) {
                let glob = Glob::new(&expanded)
                    .with_context(|| format!("invalid glob pattern '{}'", pattern.as_ref()))?;
                builder.add(glob);
            }
        }
        let globs = builder.build().context("failed to build glob matcher")?;
        Ok(Self { globs: Some(globs) })
    }

    pub fn empty() -> Self {
        Self { globs: None }
    }

    pub fn is_match(&self, relative_path: &str) -> bool {
        self.globs
            .as_ref()
            .is_some_and(|set| set.is_match(relative_path))
    }
}

fn expand_pattern(raw: &str) -> Vec<String> {
    let trimmed = raw.trim().trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut expanded = vec![trimmed.to_owned(), format!("{trimmed}/**")];
    if !trimmed.contains('/') {
        expanded.push(format!("**/{trimmed}"));
        expanded.push(format!("**/{trimmed}/**"));
    }
    expanded
}

/// Glob-keyed option overrides, applied in key order to every matching path.
#[derive(Debug, Clone)]
pub struct OverrideSet {
    entries: Vec<(PathMatcher, OptionsOverride)>,
}

impl OverrideSet {
    pub fn new(overrides: &BTreeMap<String, OptionsOverride>) -> Result<Self> {
        let entries = overrides
            .iter()
            .map(|(pattern, layer)| Ok((PathMatcher::new(&[pattern])?, layer.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// `base` with every override whose pattern matches `relative_path` applied.
    pub fn resolve(&self, base: &Options, relative_path: &str) -> Options {
        let mut options = base.clone();
        for (matcher, layer) in &self.entries {
            if matcher.is_match(relative_path) {
                options.apply(layer.clone());
            }
        }
        options
    }
}
