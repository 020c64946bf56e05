//! Staged output writing.
//!
//! The whole output tree is planned in memory first; nothing touches the output directory until
//! [`OutputPlan::write`] runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// One step of the output tree, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEntry {
    Directory(PathBuf),
    Write { path: PathBuf, content: String },
    Copy { from: PathBuf, path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct OutputPlan {
    entries: Vec<OutputEntry>,
}

impl OutputPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Parents must be added before their children.
    pub fn push(&mut self, entry: OutputEntry) {
        self.entries.push(entry);
    }

    /// Number of files the plan writes or copies.
    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !matches!(entry, OutputEntry::Directory(_)))
            .count()
    }

    /// Replace `dist` with the planned tree.
    ///
    /// Refuses to run when `dist` contains `protected` (the source directory).
    pub fn write(&self, dist: &Path, protected: &Path) -> Result<()> {
        ensure_separate(dist, protected)?;

        if dist.exists() {
            fs::remove_dir_all(dist)
                .with_context(|| format!("failed to clear output directory {}", dist.display()))?;
        }
        fs::create_dir_all(dist)
            .with_context(|| format!("failed to create output directory {}", dist.display()))?;

        for entry in &self.entries {
            match entry {
                OutputEntry::Directory(path) => {
                    let target = dist.join(path);
                    fs::create_dir_all(&target)
                        .with_context(|| format!("failed to create {}", target.display()))?;
                }
                OutputEntry::Write { path, content } => {
                    let target = dist.join(path);
                    tracing::trace!(path = %path.display(), "writing file");
                    fs::write(&target, content)
                        .with_context(|| format!("failed to write {}", target.display()))?;
                }
                OutputEntry::Copy { from, path } => {
                    let target = dist.join(path);
                    tracing::trace!(path = %path.display(), "copying file");
                    fs::copy(from, &target).with_context(|| {
                        format!("failed to copy {} to {}", from.display(), target.display())
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Fail when replacing `dist` would delete `protected`.
pub fn ensure_separate(dist: &Path, protected: &Path) -> Result<()> {
    if let (Ok(dist), Ok(protected)) = (dist.canonicalize(), protected.canonicalize()) {
        if protected.starts_with(&dist) {
            bail!(
                "refusing to replace {}: it contains the source directory",
                dist.display()
            );
        }
    }
    Ok(())
}
